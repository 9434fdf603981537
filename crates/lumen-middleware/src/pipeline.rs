//! Fixed-order middleware pipeline.
//!
//! Stages are registered against a [`Stage`] slot and always run in slot
//! order, whatever order they were added in:
//!
//! 1. **Response Cache** - optional, outermost
//! 2. **Context Propagation** - correlation id, client IP, raw token
//! 3. **Error Rendering** - any `Err` below becomes a `{code, err}` response
//! 4. **Rate Limit** - token bucket per caller
//! 5. **Authentication** - verify the bearer token
//! 6. **Permission** - per-route ACL guard
//! 7. **Content Type** - JSON by default
//!
//! The pipeline itself enforces the overall request deadline and recovers
//! from panics that escape every stage, so [`Pipeline::process`] always
//! yields a response.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::stages::error_rendering::{log_error, panic_message};
use crate::types::{Request, Response, ResponseExt};
use futures_util::FutureExt;
use lumen_core::{AuthContext, PipelineError, PipelineResult};
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Default overall request deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);

/// The fixed-order middleware pipeline for one route.
///
/// # Example
///
/// ```ignore
/// use lumen_middleware::pipeline::{Pipeline, Stage};
/// use lumen_middleware::stages::{ContextPropagationMiddleware, ErrorRenderingMiddleware};
///
/// let pipeline = Pipeline::builder()
///     .stage(Stage::ErrorRendering, ErrorRenderingMiddleware::new())
///     .stage(Stage::ContextPropagation, ContextPropagationMiddleware::new())
///     .build();
///
/// assert_eq!(pipeline.stage_names(), vec!["context_propagation", "error_rendering"]);
/// ```
pub struct Pipeline {
    stages: Vec<(Stage, BoxedMiddleware)>,
    deadline: Option<Duration>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Processes a request through every stage and then `handler`.
    ///
    /// A fresh [`AuthContext`] is created from the transport peer address.
    /// Errors and panics that escape the chain are rendered here; if the
    /// deadline elapses first, the request is abandoned and a timeout
    /// response is returned.
    pub async fn process<H>(
        &self,
        peer_addr: Option<SocketAddr>,
        request: Request,
        handler: H,
    ) -> Response
    where
        H: FnOnce(AuthContext, Request) -> BoxFuture<'static, PipelineResult<Response>>
            + Send
            + 'static,
    {
        let ctx = AuthContext::ingress(peer_addr);
        let chain = AssertUnwindSafe(self.build_chain(handler).run(ctx, request)).catch_unwind();

        let outcome = match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, chain).await {
                Ok(outcome) => outcome,
                Err(_elapsed) => Ok(Err(PipelineError::Timeout)),
            },
            None => chain.await,
        };

        let result = outcome.unwrap_or_else(|payload| {
            Err(PipelineError::internal(format!(
                "pipeline panicked: {}",
                panic_message(payload.as_ref())
            )))
        });

        match result {
            Ok(response) => response,
            Err(error) => {
                log_error(&error);
                Response::from_error(&error)
            }
        }
    }

    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(AuthContext, Request) -> BoxFuture<'static, PipelineResult<Response>>
            + Send
            + 'a,
    {
        self.stages
            .iter()
            .rev()
            .fold(Next::handler(handler), |next, (_, middleware)| {
                Next::new(middleware.as_ref(), next)
            })
    }

    /// Returns the names of all stages in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|(_, mw)| mw.name()).collect()
    }

    /// Returns the occupied stage slots in execution order.
    #[must_use]
    pub fn stages(&self) -> Vec<Stage> {
        self.stages.iter().map(|(stage, _)| *stage).collect()
    }

    /// Returns `true` if `stage` is occupied.
    #[must_use]
    pub fn has_stage(&self, stage: Stage) -> bool {
        self.stages.iter().any(|(s, _)| *s == stage)
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the overall request deadline.
    #[must_use]
    pub const fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

/// Builder for constructing a [`Pipeline`].
pub struct PipelineBuilder {
    stages: Vec<(Stage, BoxedMiddleware)>,
    deadline: Option<Duration>,
}

impl PipelineBuilder {
    /// Creates a builder with no stages and the default deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            deadline: Some(DEFAULT_DEADLINE),
        }
    }

    /// Places `middleware` in the `stage` slot, replacing any previous
    /// occupant.
    #[must_use]
    pub fn stage<M: Middleware>(self, stage: Stage, middleware: M) -> Self {
        self.stage_arc(stage, Arc::new(middleware))
    }

    /// Places a shared middleware in the `stage` slot.
    #[must_use]
    pub fn stage_arc(mut self, stage: Stage, middleware: BoxedMiddleware) -> Self {
        self.stages.retain(|(s, _)| *s != stage);
        self.stages.push((stage, middleware));
        self
    }

    /// Sets the overall request deadline.
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Removes the overall request deadline.
    #[must_use]
    pub fn no_deadline(mut self) -> Self {
        self.deadline = None;
        self
    }

    /// Builds the pipeline with stages sorted into slot order.
    #[must_use]
    pub fn build(mut self) -> Pipeline {
        self.stages.sort_by_key(|(stage, _)| *stage);
        Pipeline {
            stages: self.stages,
            deadline: self.deadline,
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pipeline stage slots, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Stage 1: Response cache (cacheable routes only)
    ResponseCache = 1,
    /// Stage 2: Correlation id, client IP, raw token
    ContextPropagation = 2,
    /// Stage 3: Error rendering and panic recovery
    ErrorRendering = 3,
    /// Stage 4: Rate limiting
    RateLimit = 4,
    /// Stage 5: Authentication
    Authentication = 5,
    /// Stage 6: Permission guard (guarded routes only)
    Permission = 6,
    /// Stage 7: Default JSON content type
    ContentType = 7,
}

impl Stage {
    /// Returns the stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ResponseCache => "response_cache",
            Self::ContextPropagation => "context_propagation",
            Self::ErrorRendering => "error_rendering",
            Self::RateLimit => "rate_limit",
            Self::Authentication => "authentication",
            Self::Permission => "permission",
            Self::ContentType => "content_type",
        }
    }

    /// Returns all stages in order.
    #[must_use]
    pub const fn all() -> [Stage; 7] {
        [
            Self::ResponseCache,
            Self::ContextPropagation,
            Self::ErrorRendering,
            Self::RateLimit,
            Self::Authentication,
            Self::Permission,
            Self::ContentType,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::test_support::request;
    use bytes::Bytes;
    use http::{Method, StatusCode};
    use http_body_util::{BodyExt, Full};
    use std::sync::Mutex;

    struct OrderTrackingMiddleware {
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Middleware for OrderTrackingMiddleware {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(
            &'a self,
            ctx: AuthContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, PipelineResult<Response>> {
            Box::pin(async move {
                self.order.lock().unwrap().push(self.name);
                next.run(ctx, request).await
            })
        }
    }

    fn tracker(name: &'static str, order: &Arc<Mutex<Vec<&'static str>>>) -> OrderTrackingMiddleware {
        OrderTrackingMiddleware {
            name,
            order: Arc::clone(order),
        }
    }

    fn ok(_ctx: AuthContext, _req: Request) -> BoxFuture<'static, PipelineResult<Response>> {
        Box::pin(async {
            Ok(http::Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::from("OK")))
                .unwrap())
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_stages_run_in_slot_order() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let pipeline = Pipeline::builder()
            .stage(Stage::Authentication, tracker("authentication", &order))
            .stage(Stage::ContextPropagation, tracker("context", &order))
            .stage(Stage::RateLimit, tracker("rate_limit", &order))
            .build();

        let response = pipeline
            .process(None, request(Method::GET, "/test"), ok)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["context", "rate_limit", "authentication"]
        );
        assert_eq!(
            pipeline.stages(),
            vec![Stage::ContextPropagation, Stage::RateLimit, Stage::Authentication]
        );
    }

    #[tokio::test]
    async fn test_slot_is_replaced() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .stage(Stage::RateLimit, tracker("first", &order))
            .stage(Stage::RateLimit, tracker("second", &order))
            .build();

        assert_eq!(pipeline.stage_count(), 1);
        assert_eq!(pipeline.stage_names(), vec!["second"]);
    }

    #[tokio::test]
    async fn test_empty_pipeline_reaches_handler() {
        let pipeline = Pipeline::builder().build();
        let response = pipeline
            .process(None, request(Method::GET, "/test"), ok)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_escaping_error_is_rendered() {
        let pipeline = Pipeline::builder().build();
        let response = pipeline
            .process(None, request(Method::GET, "/test"), |_ctx, _req| {
                Box::pin(async { Err(PipelineError::validation("bad ref")) })
            })
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"code": 400, "err": "bad ref"})
        );
    }

    #[tokio::test]
    async fn test_escaping_panic_is_rendered() {
        let pipeline = Pipeline::builder().build();
        let response = pipeline
            .process(None, request(Method::GET, "/test"), |_ctx, _req| {
                Box::pin(async {
                    if true {
                        panic!("handler bug");
                    }
                    Ok(http::Response::new(Full::new(Bytes::new())))
                })
            })
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["err"], "Internal Server Error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cuts_off_slow_handler() {
        let pipeline = Pipeline::builder()
            .deadline(Duration::from_secs(60))
            .build();

        let response = pipeline
            .process(None, request(Method::GET, "/slow"), |_ctx, _req| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(http::Response::new(Full::new(Bytes::new())))
                })
            })
            .await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"code": 503, "err": "Application has timed out."})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_handler_beats_deadline() {
        let pipeline = Pipeline::builder()
            .deadline(Duration::from_secs(1))
            .build();

        let response = pipeline
            .process(None, request(Method::GET, "/fast"), |_ctx, _req| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(http::Response::new(Full::new(Bytes::new())))
                })
            })
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_stage_ordering() {
        let all = Stage::all();
        assert!(all.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(Stage::ResponseCache.name(), "response_cache");
        assert_eq!(Stage::ContentType.name(), "content_type");
    }
}
