//! Authentication stage.
//!
//! Turns the raw bearer token captured by context propagation into a
//! verified [`Identity`].
//!
//! | Token            | `Optional`  | `Required`            |
//! |------------------|-------------|-----------------------|
//! | absent           | anonymous   | 401                   |
//! | valid            | user        | user                  |
//! | invalid          | anonymous   | verifier's `AuthError`|
//! | verifier failure | 500         | 500                   |

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use lumen_core::{AuthContext, Identity, PipelineError, PipelineResult, TokenVerdict, TokenVerifier};
use lumen_telemetry::metrics::record_auth_outcome;
use std::sync::Arc;

/// Whether a route needs an authenticated caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthRequirement {
    /// Absent or soft-invalid tokens proceed as anonymous.
    #[default]
    Optional,
    /// Only a valid token proceeds.
    Required,
}

/// Stage that resolves the caller's identity.
#[derive(Clone)]
pub struct AuthenticationMiddleware {
    verifier: Arc<dyn TokenVerifier>,
    requirement: AuthRequirement,
}

impl std::fmt::Debug for AuthenticationMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationMiddleware")
            .field("requirement", &self.requirement)
            .finish_non_exhaustive()
    }
}

impl AuthenticationMiddleware {
    /// Creates a stage that lets anonymous callers through.
    #[must_use]
    pub fn optional(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self::new(verifier, AuthRequirement::Optional)
    }

    /// Creates a stage that rejects anonymous callers.
    #[must_use]
    pub fn required(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self::new(verifier, AuthRequirement::Required)
    }

    /// Creates a stage with an explicit requirement.
    #[must_use]
    pub fn new(verifier: Arc<dyn TokenVerifier>, requirement: AuthRequirement) -> Self {
        Self {
            verifier,
            requirement,
        }
    }

    /// Returns the route's requirement.
    #[must_use]
    pub const fn requirement(&self) -> AuthRequirement {
        self.requirement
    }

    async fn authenticate(&self, ctx: &AuthContext) -> PipelineResult<Identity> {
        let Some(token) = ctx.token() else {
            return match self.requirement {
                AuthRequirement::Optional => {
                    record_auth_outcome("anonymous");
                    Ok(Identity::Anonymous)
                }
                AuthRequirement::Required => {
                    record_auth_outcome("anonymous");
                    Err(PipelineError::unauthenticated("authentication required"))
                }
            };
        };

        match self.verifier.verify(token).await {
            Ok(TokenVerdict::Valid(user)) => {
                record_auth_outcome("user");
                Ok(Identity::User(user))
            }
            Ok(TokenVerdict::Invalid(error)) => {
                record_auth_outcome("invalid");
                match self.requirement {
                    AuthRequirement::Optional => {
                        tracing::debug!(reason = %error, "ignoring invalid token on optional route");
                        Ok(Identity::Anonymous)
                    }
                    AuthRequirement::Required => Err(error.into()),
                }
            }
            Err(error) => {
                record_auth_outcome("error");
                Err(PipelineError::internal_with_source(
                    "token verification failed",
                    error,
                ))
            }
        }
    }
}

impl Middleware for AuthenticationMiddleware {
    fn name(&self) -> &'static str {
        "authentication"
    }

    fn process<'a>(
        &'a self,
        ctx: AuthContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            let identity = self.authenticate(&ctx).await?;
            tracing::debug!(user = %identity.log_id(), "caller identified");

            let ctx = ctx.with_identity(identity)?;
            next.run(ctx, request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::test_support::{context, request};
    use http::{Method, StatusCode};
    use lumen_core::fixtures::StaticTokenVerifier;
    use lumen_core::{AuthError, BearerToken, ResourceRef};
    use std::sync::Mutex;

    fn verifier() -> Arc<StaticTokenVerifier> {
        Arc::new(
            StaticTokenVerifier::new()
                .with_user("tok-devin", "devin")
                .with_invalid("tok-expired", AuthError::unauthorized("token expired"))
                .with_failing("tok-broken"),
        )
    }

    fn ctx_with(token: Option<&str>) -> AuthContext {
        let ctx = context();
        match token {
            Some(token) => ctx.with_token(BearerToken::new(token)).unwrap(),
            None => ctx,
        }
    }

    async fn run(
        stage: &AuthenticationMiddleware,
        token: Option<&str>,
    ) -> PipelineResult<Identity> {
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        let next = Next::handler(move |ctx: AuthContext, _req| {
            Box::pin(async move {
                *slot.lock().unwrap() = Some(ctx.identity().clone());
                Ok(http::Response::new(http_body_util::Full::new(bytes::Bytes::new())))
            })
        });

        stage
            .process(ctx_with(token), request(Method::GET, "/images/abc"), next)
            .await?;
        let identity = seen.lock().unwrap().take().unwrap();
        Ok(identity)
    }

    #[tokio::test]
    async fn test_absent_token_is_anonymous_when_optional() {
        let stage = AuthenticationMiddleware::optional(verifier());
        assert_eq!(run(&stage, None).await.unwrap(), Identity::Anonymous);
    }

    #[tokio::test]
    async fn test_absent_token_is_rejected_when_required() {
        let stage = AuthenticationMiddleware::required(verifier());
        let err = run(&stage, None).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_token_yields_user() {
        let stage = AuthenticationMiddleware::required(verifier());
        assert_eq!(
            run(&stage, Some("tok-devin")).await.unwrap(),
            Identity::User(ResourceRef::user("devin"))
        );
    }

    #[tokio::test]
    async fn test_invalid_token_soft_fails_when_optional() {
        let stage = AuthenticationMiddleware::optional(verifier());
        assert_eq!(
            run(&stage, Some("tok-expired")).await.unwrap(),
            Identity::Anonymous
        );
    }

    #[tokio::test]
    async fn test_invalid_token_carries_auth_error_when_required() {
        let stage = AuthenticationMiddleware::required(verifier());
        let err = run(&stage, Some("tok-expired")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.message(), "token expired");
    }

    #[tokio::test]
    async fn test_verifier_failure_is_internal() {
        for stage in [
            AuthenticationMiddleware::optional(verifier()),
            AuthenticationMiddleware::required(verifier()),
        ] {
            let err = run(&stage, Some("tok-broken")).await.unwrap_err();
            assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
            assert!(!err.is_expected());
        }
    }

    #[tokio::test]
    async fn test_skips_verifier_without_token() {
        let verifier = verifier();
        let stage = AuthenticationMiddleware::optional(verifier.clone());
        run(&stage, None).await.unwrap();
        assert_eq!(verifier.calls(), 0);
    }
}
