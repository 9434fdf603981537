//! Context propagation stage.
//!
//! Establishes per-request identity before any business logic runs:
//!
//! 1. Assigns a fresh correlation id
//! 2. Derives the client IP (see [`crate::client_ip`])
//! 3. Extracts the raw bearer token from `Authorization`, unverified
//!
//! Absence of any of these is valid. The rest of the chain runs inside a
//! `request` tracing span carrying the correlation id, so every downstream
//! log line is correlated.

use crate::client_ip::ClientIpResolver;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use http::header::AUTHORIZATION;
use http::HeaderMap;
use lumen_core::{AuthContext, BearerToken, CorrelationId, PipelineResult};
use tracing::Instrument;

/// Stage that assigns correlation id, client IP and raw token.
#[derive(Debug, Clone, Default)]
pub struct ContextPropagationMiddleware {
    resolver: ClientIpResolver,
}

impl ContextPropagationMiddleware {
    /// Creates the stage with the default forwarded headers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the stage with a custom client IP resolver.
    #[must_use]
    pub fn with_resolver(resolver: ClientIpResolver) -> Self {
        Self { resolver }
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively. Other schemes and empty tokens
/// yield `None`.
pub fn bearer_token(headers: &HeaderMap) -> Option<BearerToken> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| BearerToken::new(token))
}

impl Middleware for ContextPropagationMiddleware {
    fn name(&self) -> &'static str {
        "context_propagation"
    }

    fn process<'a>(
        &'a self,
        ctx: AuthContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            let correlation_id = CorrelationId::new();
            let mut ctx = ctx.with_correlation_id(correlation_id)?;

            let client_ip = self.resolver.resolve(request.headers(), ctx.peer_addr());
            if let Some(ip) = client_ip {
                ctx = ctx.with_client_ip(ip)?;
            }
            if let Some(token) = bearer_token(request.headers()) {
                ctx = ctx.with_token(token)?;
            }

            let span = tracing::info_span!(
                "request",
                correlation_id = %correlation_id,
                client_ip = client_ip.map(tracing::field::display),
                method = %request.method(),
                path = %request.uri().path(),
            );

            next.run(ctx, request).instrument(span).await
        })
    }
}
