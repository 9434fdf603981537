//! Common types used throughout the middleware pipeline.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::StatusCode;
use http_body_util::Full;
use lumen_core::{PipelineError, ResourceRef};
use std::collections::HashMap;

/// The HTTP request type used in the pipeline.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the pipeline.
pub type Response = http::Response<Full<Bytes>>;

/// JSON content type.
pub const APPLICATION_JSON: &str = "application/json";

/// Extension trait for building JSON responses.
pub trait ResponseExt {
    /// Creates a JSON response from raw body bytes.
    fn json_bytes(status: StatusCode, body: Bytes) -> Response;

    /// Creates a JSON response from a value.
    fn json(status: StatusCode, value: &serde_json::Value) -> Response;

    /// Renders a pipeline error as a `{code, err}` response.
    ///
    /// Rate-limited errors also carry a `Retry-After` header.
    fn from_error(error: &PipelineError) -> Response;
}

impl ResponseExt for Response {
    fn json_bytes(status: StatusCode, body: Bytes) -> Response {
        let mut response = http::Response::new(Full::new(body));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        response
    }

    fn json(status: StatusCode, value: &serde_json::Value) -> Response {
        Self::json_bytes(status, Bytes::from(value.to_string()))
    }

    fn from_error(error: &PipelineError) -> Response {
        let body = serde_json::to_vec(&error.to_envelope())
            .map(Bytes::from)
            .unwrap_or_else(|_| {
                Bytes::from_static(br#"{"code":500,"err":"Internal Server Error"}"#)
            });

        let mut response = Self::json_bytes(error.status_code(), body);
        if let Some(retry_after) = error.retry_after() {
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        response
    }
}

/// Path parameters captured by the router, carried in request extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    /// Creates an empty set of parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds a parameter in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Returns the value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// The canonical target resolved by the permission stage.
///
/// Inserted into request extensions once access has been granted, so the
/// handler does not repeat the lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget(pub ResourceRef);

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::time::Duration;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_response_shape() {
        let response = Response::from_error(&PipelineError::not_found("gone"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            APPLICATION_JSON
        );
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"code": 404, "err": "gone"})
        );
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let response =
            Response::from_error(&PipelineError::rate_limited(Duration::from_millis(200)));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "1");

        let response =
            Response::from_error(&PipelineError::rate_limited(Duration::from_millis(2500)));
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "3");
    }

    #[test]
    fn test_path_params() {
        let params = PathParams::new().with("id", "abc");
        assert_eq!(params.get("id"), Some("abc"));
        assert_eq!(params.get("missing"), None);
    }
}
