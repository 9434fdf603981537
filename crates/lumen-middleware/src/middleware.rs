//! Core middleware trait and types.
//!
//! This module defines the [`Middleware`] trait that all pipeline stages
//! implement. A stage receives the request context *by value*, may extend it,
//! and hands the extended copy to [`Next::run`]. Nothing is shared or mutated
//! behind the stage's back.
//!
//! Stages short-circuit by returning `Err(PipelineError)` without calling
//! `next`. They never write a partial response before failing.
//!
//! # Example
//!
//! ```ignore
//! use lumen_middleware::{BoxFuture, Middleware, Next, Request, Response};
//! use lumen_core::{AuthContext, PipelineResult};
//!
//! struct LoggingMiddleware;
//!
//! impl Middleware for LoggingMiddleware {
//!     fn name(&self) -> &'static str {
//!         "logging"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: AuthContext,
//!         request: Request,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, PipelineResult<Response>> {
//!         Box::pin(async move {
//!             tracing::info!(identity = %ctx.identity().log_id(), "before");
//!             next.run(ctx, request).await
//!         })
//!     }
//! }
//! ```

use crate::types::{Request, Response};
use lumen_core::{AuthContext, PipelineResult};
use std::future::Future;
use std::pin::Pin;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The terminal step of a chain: the route handler.
pub type BoxHandler<'a> =
    Box<dyn FnOnce(AuthContext, Request) -> BoxFuture<'static, PipelineResult<Response>> + Send + 'a>;

/// The core middleware trait.
///
/// # Invariants
///
/// - A stage calls `next.run()` at most once
/// - A stage that fails returns `Err` and does not call `next`
/// - A stage never overwrites a context field that is already set
pub trait Middleware: Send + Sync + 'static {
    /// Returns the unique name of this stage, used in logs.
    fn name(&self) -> &'static str;

    /// Processes the request through this stage.
    fn process<'a>(
        &'a self,
        ctx: AuthContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>>;
}

/// Callback to invoke the rest of the chain.
///
/// Consumed by [`Next::run`], so it can only be called once.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    Handler(BoxHandler<'a>),
}

impl<'a> Next<'a> {
    /// Creates a `Next` that will invoke `middleware`, then `next`.
    pub(crate) fn new(middleware: &'a dyn Middleware, next: Next<'a>) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                next: Box::new(next),
            },
        }
    }

    /// Creates a terminal `Next` that invokes the handler.
    pub(crate) fn handler<F>(f: F) -> Self
    where
        F: FnOnce(AuthContext, Request) -> BoxFuture<'static, PipelineResult<Response>> + Send + 'a,
    {
        Self {
            inner: NextInner::Handler(Box::new(f)),
        }
    }

    /// Invokes the next stage or the handler.
    pub async fn run(self, ctx: AuthContext, request: Request) -> PipelineResult<Response> {
        match self.inner {
            NextInner::Chain { middleware, next } => middleware.process(ctx, request, *next).await,
            NextInner::Handler(handler) => handler(ctx, request).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;

    pub fn request(method: http::Method, uri: &str) -> Request {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    pub fn ok_handler<'a>() -> Next<'a> {
        Next::handler(|_ctx, _req| {
            Box::pin(async {
                Ok(http::Response::builder()
                    .status(StatusCode::OK)
                    .body(Full::new(Bytes::from("OK")))
                    .unwrap())
            })
        })
    }

    pub fn context() -> AuthContext {
        AuthContext::ingress(Some("198.51.100.7:4000".parse().unwrap()))
    }
}
