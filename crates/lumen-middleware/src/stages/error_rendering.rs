//! Error rendering stage.
//!
//! Converts any `Err(PipelineError)` returned further down the chain into a
//! single `{code, err}` JSON response with the matching status. Runs inside
//! the request span, so the log line carries the correlation id.
//!
//! Internal errors are logged with their full source chain at `error` level
//! and rendered with a generic message. Expected errors are logged at
//! `debug`/`info` and rendered with their caller-safe message.
//!
//! A panic in a downstream stage or handler is caught here and rendered as
//! an internal error.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use futures_util::FutureExt;
use lumen_core::{AuthContext, ErrorCategory, PipelineError, PipelineResult};
use std::any::Any;
use std::panic::AssertUnwindSafe;

/// Stage that renders errors into `{code, err}` responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorRenderingMiddleware;

impl ErrorRenderingMiddleware {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Logs `error` at a level matching its category.
pub fn log_error(error: &PipelineError) {
    let status = error.status_code().as_u16();
    match error.category() {
        ErrorCategory::Internal => {
            let chain = error_chain(error);
            tracing::error!(status, error = %chain, "request failed with internal error");
        }
        ErrorCategory::Timeout => tracing::warn!(status, "request deadline exceeded"),
        ErrorCategory::RateLimited => tracing::info!(status, "request rate limited"),
        category => {
            tracing::debug!(status, category = category.as_str(), error = %error, "request rejected");
        }
    }
}

fn error_chain(error: &PipelineError) -> String {
    let mut rendered = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Extracts a printable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

impl Middleware for ErrorRenderingMiddleware {
    fn name(&self) -> &'static str {
        "error_rendering"
    }

    fn process<'a>(
        &'a self,
        ctx: AuthContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            let outcome = AssertUnwindSafe(next.run(ctx, request))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(PipelineError::internal(format!(
                        "handler panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });

            match outcome {
                Ok(response) => Ok(response),
                Err(error) => {
                    log_error(&error);
                    Ok(Response::from_error(&error))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::test_support::{context, ok_handler, request};
    use http::{Method, StatusCode};
    use http_body_util::BodyExt;

    fn failing_handler<'a>(error: PipelineError) -> Next<'a> {
        Next::handler(move |_ctx, _req| Box::pin(async move { Err(error) }))
    }

    async fn body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_passes_success_through() {
        let response = ErrorRenderingMiddleware::new()
            .process(context(), request(Method::GET, "/"), ok_handler())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_renders_expected_error() {
        let response = ErrorRenderingMiddleware::new()
            .process(
                context(),
                request(Method::GET, "/"),
                failing_handler(PipelineError::validation("wrong collection kind")),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body(response).await,
            serde_json::json!({"code": 400, "err": "wrong collection kind"})
        );
    }

    #[tokio::test]
    async fn test_masks_internal_error() {
        let error = PipelineError::internal_with_source(
            "acl check failed",
            anyhow::anyhow!("dial tcp 10.0.0.3:5432: connection refused"),
        );
        let response = ErrorRenderingMiddleware::new()
            .process(context(), request(Method::GET, "/"), failing_handler(error))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body(response).await;
        assert_eq!(body["code"], 500);
        assert!(!body["err"].as_str().unwrap().contains("10.0.0.3"));
    }

    #[tokio::test]
    async fn test_recovers_from_panic() {
        let handler = Next::handler(|_ctx, _req| {
            Box::pin(async {
                if true {
                    panic!("boom");
                }
                Ok(http::Response::new(http_body_util::Full::new(bytes::Bytes::new())))
            })
        });

        let response = ErrorRenderingMiddleware::new()
            .process(context(), request(Method::GET, "/"), handler)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let error = PipelineError::internal_with_source("outer", anyhow::anyhow!("inner"));
        let chain = error_chain(&error);
        assert!(chain.contains("outer"));
        assert!(chain.contains("inner"));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
