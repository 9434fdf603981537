//! Response cache stage.
//!
//! Serves idempotent GET responses from a [`CacheStore`]. The key is the
//! exact request path and query. On a hit the stored status, headers and
//! body are replayed and nothing downstream runs. On a miss the downstream
//! response is captured in full, returned to the caller, and stored only when
//! its status is exactly 200.
//!
//! Entries have no TTL. Concurrent misses on the same key may both run the
//! handler and both write through.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use lumen_core::{AuthContext, CacheStore, PipelineResult};
use lumen_telemetry::metrics::record_cache_lookup;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Serialized form of a cached response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Status code.
    pub status: u16,
    /// Header names with base64-encoded values, in original order.
    /// Repeated names are kept.
    pub headers: Vec<(String, String)>,
    /// Base64-encoded body.
    pub body: String,
}

impl CachedResponse {
    /// Captures a response's parts and body.
    pub fn capture(parts: &http::response::Parts, body: &Bytes) -> Self {
        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), STANDARD.encode(value.as_bytes())))
            .collect();

        Self {
            status: parts.status.as_u16(),
            headers,
            body: STANDARD.encode(body),
        }
    }

    /// Rebuilds the response. Returns `None` if the entry is corrupt.
    pub fn replay(&self) -> Option<Response> {
        let status = StatusCode::from_u16(self.status).ok()?;
        let body = STANDARD.decode(&self.body).ok()?;

        let mut response = http::Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
            let value = HeaderValue::from_bytes(&STANDARD.decode(value).ok()?).ok()?;
            response.headers_mut().append(name, value);
        }
        Some(response)
    }

    /// Encodes the entry for the store.
    pub fn to_bytes(&self) -> serde_json::Result<Bytes> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Decodes an entry read from the store.
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Returns the cache key for a request: its path plus query string.
pub fn cache_key(request: &Request) -> String {
    request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), ToString::to_string)
}

/// Stage that serves and stores cached responses.
#[derive(Clone)]
pub struct ResponseCacheMiddleware {
    store: Arc<dyn CacheStore>,
}

impl std::fmt::Debug for ResponseCacheMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCacheMiddleware").finish_non_exhaustive()
    }
}

impl ResponseCacheMiddleware {
    /// Creates the stage over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    async fn lookup(&self, key: &str) -> Option<Response> {
        let stored = match self.store.get(key).await {
            Ok(stored) => stored?,
            Err(error) => {
                tracing::warn!(%error, cache_key = key, "cache read failed, treating as miss");
                return None;
            }
        };

        let replayed = CachedResponse::from_bytes(&stored)
            .ok()
            .and_then(|entry| entry.replay());
        if replayed.is_none() {
            tracing::warn!(cache_key = key, "discarding undecodable cache entry");
        }
        replayed
    }

    async fn store(&self, key: &str, entry: &CachedResponse) {
        let bytes = match entry.to_bytes() {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(%error, cache_key = key, "cache entry encoding failed");
                return;
            }
        };
        if let Err(error) = self.store.set(key, bytes).await {
            tracing::warn!(%error, cache_key = key, "cache write failed");
        }
    }
}

impl Middleware for ResponseCacheMiddleware {
    fn name(&self) -> &'static str {
        "response_cache"
    }

    fn process<'a>(
        &'a self,
        ctx: AuthContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            if request.method() != Method::GET {
                return next.run(ctx, request).await;
            }

            let key = cache_key(&request);
            if let Some(response) = self.lookup(&key).await {
                record_cache_lookup(true);
                tracing::debug!(cache = "hit", cache_key = %key, "served from cache");
                return Ok(response);
            }
            record_cache_lookup(false);

            let response = next.run(ctx, request).await?;
            if response.status() != StatusCode::OK {
                return Ok(response);
            }

            let (parts, body) = response.into_parts();
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(never) => match never {},
            };

            self.store(&key, &CachedResponse::capture(&parts, &body))
                .await;
            tracing::debug!(cache = "store", cache_key = %key, "response cached");
            Ok(http::Response::from_parts(parts, Full::new(body)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::test_support::{context, request};
    use lumen_core::fixtures::InMemoryCacheStore;
    use lumen_core::PipelineError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler<'a>(calls: Arc<AtomicUsize>, status: StatusCode) -> Next<'a> {
        Next::handler(move |_ctx, _req| {
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(http::Response::builder()
                    .status(status)
                    .header("content-type", "application/json")
                    .header("x-served-by", "handler")
                    .body(Full::new(Bytes::from(format!("{{\"n\":{n}}}"))))
                    .unwrap())
            })
        })
    }

    async fn body(response: Response) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_hit_skips_handler() {
        let store = Arc::new(InMemoryCacheStore::new());
        let stage = ResponseCacheMiddleware::new(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let first = stage
            .process(
                context(),
                request(Method::GET, "/images/abc"),
                counting_handler(calls.clone(), StatusCode::OK),
            )
            .await
            .unwrap();
        let second = stage
            .process(
                context(),
                request(Method::GET, "/images/abc"),
                counting_handler(calls.clone(), StatusCode::OK),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(second.headers().get("x-served-by").unwrap(), "handler");
        assert_eq!(body(first).await, body(second).await);
        assert!(store.contains("/images/abc"));
    }

    #[tokio::test]
    async fn test_key_includes_query() {
        let store = Arc::new(InMemoryCacheStore::new());
        let stage = ResponseCacheMiddleware::new(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        for uri in ["/images/abc?size=small", "/images/abc?size=large", "/images/abc?size=small"] {
            stage
                .process(
                    context(),
                    request(Method::GET, uri),
                    counting_handler(calls.clone(), StatusCode::OK),
                )
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_non_ok_is_not_cached() {
        let store = Arc::new(InMemoryCacheStore::new());
        let stage = ResponseCacheMiddleware::new(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        for status in [StatusCode::NOT_FOUND, StatusCode::ACCEPTED, StatusCode::INTERNAL_SERVER_ERROR] {
            stage
                .process(
                    context(),
                    request(Method::GET, "/images/abc"),
                    counting_handler(calls.clone(), status),
                )
                .await
                .unwrap();
        }
        assert!(store.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let store = Arc::new(InMemoryCacheStore::new());
        let stage = ResponseCacheMiddleware::new(store.clone());
        let failing = Next::handler(|_ctx, _req| {
            Box::pin(async { Err(PipelineError::not_found("gone")) })
        });

        let err = stage
            .process(context(), request(Method::GET, "/images/abc"), failing)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_non_get_bypasses_cache() {
        let store = Arc::new(InMemoryCacheStore::new());
        let stage = ResponseCacheMiddleware::new(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        stage
            .process(
                context(),
                request(Method::POST, "/images/abc"),
                counting_handler(calls.clone(), StatusCode::OK),
            )
            .await
            .unwrap();
        assert_eq!(store.gets(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_falls_through() {
        let store = Arc::new(InMemoryCacheStore::new());
        store.set_failing(true);
        let stage = ResponseCacheMiddleware::new(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let response = stage
                .process(
                    context(),
                    request(Method::GET, "/images/abc"),
                    counting_handler(calls.clone(), StatusCode::OK),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let store = Arc::new(InMemoryCacheStore::new());
        store
            .set("/images/abc", Bytes::from_static(b"not json"))
            .await
            .unwrap();
        let stage = ResponseCacheMiddleware::new(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        stage
            .process(
                context(),
                request(Method::GET, "/images/abc"),
                counting_handler(calls.clone(), StatusCode::OK),
            )
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cached_response_preserves_repeated_headers() {
        let response = http::Response::builder()
            .status(StatusCode::OK)
            .header("vary", "accept")
            .header("vary", "authorization")
            .body(())
            .unwrap();
        let (parts, ()) = response.into_parts();

        let entry = CachedResponse::capture(&parts, &Bytes::from_static(b"{}"));
        let replayed = entry.replay().unwrap();
        assert_eq!(replayed.headers().get_all("vary").iter().count(), 2);
    }

    #[test]
    fn test_cached_response_keeps_opaque_header_bytes() {
        let mut response = http::Response::new(());
        response.headers_mut().insert(
            "x-caption",
            HeaderValue::from_bytes(b"caf\xe9 \xff").unwrap(),
        );
        let (parts, ()) = response.into_parts();

        let entry = CachedResponse::capture(&parts, &Bytes::new());
        let decoded = CachedResponse::from_bytes(&entry.to_bytes().unwrap()).unwrap();
        let replayed = decoded.replay().unwrap();

        assert_eq!(replayed.headers(), &parts.headers);
    }
}
