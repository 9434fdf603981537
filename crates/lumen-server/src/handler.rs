//! Route handlers.
//!
//! Handlers are thin: by the time one runs, the pipeline has already
//! established the caller, checked access and rate limits, and resolved the
//! target resource. A handler returns a [`HandlerResponse`] or a
//! [`PipelineError`], and the server renders either as JSON.
//!
//! # Example
//!
//! ```rust
//! use lumen_core::{AuthContext, PipelineError};
//! use lumen_middleware::Request;
//! use lumen_server::handler::{FnHandler, HandlerResponse};
//!
//! let handler = FnHandler::new(|ctx: AuthContext, _request: Request| async move {
//!     let caller = ctx.caller().map(|user| user.id().to_string());
//!     Ok::<_, PipelineError>(HandlerResponse::ok(serde_json::json!({ "caller": caller })))
//! });
//! # let _ = handler;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use lumen_core::{AuthContext, PipelineError, ResourceRef};
use lumen_middleware::{PathParams, Request, ResolvedTarget, Response, ResponseExt};
use serde::de::DeserializeOwned;

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResponse {
    status: StatusCode,
    data: Option<serde_json::Value>,
}

impl HandlerResponse {
    /// A response with an explicit status and optional body.
    #[must_use]
    pub fn new(status: StatusCode, data: Option<serde_json::Value>) -> Self {
        Self { status, data }
    }

    /// `200 OK` with a JSON body.
    #[must_use]
    pub fn ok(data: serde_json::Value) -> Self {
        Self::new(StatusCode::OK, Some(data))
    }

    /// `202 Accepted` linking to a newly created resource.
    #[must_use]
    pub fn created(resource: &ResourceRef, public_url: &str) -> Self {
        Self::new(
            StatusCode::ACCEPTED,
            Some(serde_json::json!({
                "id": resource.id(),
                "url": resource.to_url(public_url),
            })),
        )
    }

    /// `204 No Content`.
    #[must_use]
    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT, None)
    }

    /// Returns the status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the body.
    #[must_use]
    pub fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }

    /// Renders the response. The JSON content type is left to the pipeline.
    #[must_use]
    pub fn into_response(self) -> Response {
        match self.data {
            Some(data) => Response::json(self.status, &data),
            None => {
                let mut response = http::Response::new(Full::new(Bytes::new()));
                *response.status_mut() = self.status;
                response
            }
        }
    }
}

/// A route's business logic.
#[async_trait]
pub trait RouteHandler: Send + Sync + 'static {
    /// Handles a request that passed every pipeline stage.
    async fn call(&self, ctx: AuthContext, request: Request)
        -> Result<HandlerResponse, PipelineError>;
}

/// Adapts an async closure into a [`RouteHandler`].
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F> {
    /// Wraps `func`.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> RouteHandler for FnHandler<F>
where
    F: Fn(AuthContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerResponse, PipelineError>> + Send + 'static,
{
    async fn call(
        &self,
        ctx: AuthContext,
        request: Request,
    ) -> Result<HandlerResponse, PipelineError> {
        (self.func)(ctx, request).await
    }
}

/// Shared handler reference.
pub type SharedHandler = Arc<dyn RouteHandler>;

/// Returns a path parameter captured by the router.
pub fn path_param<'a>(request: &'a Request, name: &str) -> Result<&'a str, PipelineError> {
    request
        .extensions()
        .get::<PathParams>()
        .and_then(|params| params.get(name))
        .ok_or_else(|| PipelineError::validation(format!("missing path parameter '{name}'")))
}

/// Returns the target resolved by the permission stage.
pub fn resolved_target(request: &Request) -> Result<&ResourceRef, PipelineError> {
    request
        .extensions()
        .get::<ResolvedTarget>()
        .map(|target| &target.0)
        .ok_or_else(|| PipelineError::internal("route has no resolved target"))
}

/// Consumes the request and deserializes its body as JSON.
pub async fn json_body<T: DeserializeOwned>(request: Request) -> Result<T, PipelineError> {
    let bytes = match request.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    };
    serde_json::from_slice(&bytes)
        .map_err(|e| PipelineError::validation(format!("invalid request body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    fn request(body: &'static str) -> Request {
        http::Request::builder()
            .uri("/images/abc")
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    #[derive(Debug, serde::Deserialize)]
    struct Caption {
        caption: String,
    }

    #[test]
    fn test_created_links_resource() {
        let response =
            HandlerResponse::created(&ResourceRef::image("abc"), "https://lumen.example/");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            response.data(),
            Some(&serde_json::json!({
                "id": "abc",
                "url": "https://lumen.example/images/abc",
            }))
        );
    }

    #[test]
    fn test_no_content_has_no_body_or_content_type() {
        let response = HandlerResponse::no_content().into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().get(CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn test_fn_handler_calls_closure() {
        let handler = FnHandler::new(|ctx: AuthContext, _request: Request| async move {
            Ok(HandlerResponse::ok(serde_json::json!({
                "anonymous": ctx.caller().is_none(),
            })))
        });

        let response = handler
            .call(AuthContext::ingress(None), request(""))
            .await
            .unwrap();
        assert_eq!(response.data(), Some(&serde_json::json!({"anonymous": true})));
    }

    #[test]
    fn test_path_param_missing() {
        let mut req = request("");
        assert!(matches!(
            path_param(&req, "id"),
            Err(PipelineError::Validation { .. })
        ));

        req.extensions_mut().insert(PathParams::new().with("id", "abc"));
        assert_eq!(tokio_test::assert_ok!(path_param(&req, "id")), "abc");
    }

    #[test]
    fn test_resolved_target() {
        let mut req = request("");
        tokio_test::assert_err!(resolved_target(&req));

        req.extensions_mut()
            .insert(ResolvedTarget(ResourceRef::image("abc")));
        assert_eq!(resolved_target(&req).unwrap(), &ResourceRef::image("abc"));
    }

    #[tokio::test]
    async fn test_json_body() {
        let caption: Caption = json_body(request(r#"{"caption":"sunset"}"#)).await.unwrap();
        assert_eq!(caption.caption, "sunset");

        let result: Result<Caption, _> = json_body(request("not json")).await;
        assert_eq!(result.unwrap_err().status_code(), StatusCode::BAD_REQUEST);
    }
}
