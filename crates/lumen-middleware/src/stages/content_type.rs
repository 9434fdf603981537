//! JSON content type stage.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, APPLICATION_JSON};
use http::header::{HeaderValue, CONTENT_TYPE};
use lumen_core::{AuthContext, PipelineResult};

/// Sets `Content-Type: application/json` on responses that carry none.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentTypeMiddleware;

impl ContentTypeMiddleware {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for ContentTypeMiddleware {
    fn name(&self) -> &'static str {
        "content_type"
    }

    fn process<'a>(
        &'a self,
        ctx: AuthContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            let mut response = next.run(ctx, request).await?;
            response
                .headers_mut()
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static(APPLICATION_JSON));
            Ok(response)
        })
    }
}
