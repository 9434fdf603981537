//! Per-route pipeline composition.
//!
//! [`compose`] turns the shared [`Collaborators`], process-wide
//! [`PipelineSettings`] and a route's [`RoutePolicy`] into a [`Pipeline`]
//! with every stage in its fixed slot. Routes differ only in which optional
//! slots are filled and how authentication is enforced.

use crate::client_ip::{ClientIpResolver, DEFAULT_FORWARDED_HEADERS};
use crate::pipeline::{Pipeline, Stage, DEFAULT_DEADLINE};
use crate::stages::{
    AuthRequirement, AuthenticationMiddleware, BucketPolicy, ContentTypeMiddleware,
    ContextPropagationMiddleware, ErrorRenderingMiddleware, Locators, PermissionGuard,
    PermissionMiddleware, RateLimitKey, RateLimitMiddleware, RateLimitStore,
    ResponseCacheMiddleware,
};
use lumen_core::{AclChecker, CacheStore, CollectionKind, PermissionLevel, TokenVerifier};
use std::sync::Arc;
use std::time::Duration;

/// External services shared by every route.
#[derive(Clone)]
pub struct Collaborators {
    /// Identity service.
    pub verifier: Arc<dyn TokenVerifier>,
    /// Resource lookups, one per collection kind.
    pub locators: Locators,
    /// Authorization store.
    pub acl: Arc<dyn AclChecker>,
    /// Response cache store.
    pub cache: Arc<dyn CacheStore>,
    /// Rate limit buckets. Shared so all routes draw from the same bucket.
    pub rate_limits: Arc<dyn RateLimitStore>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("locators", &self.locators)
            .finish_non_exhaustive()
    }
}

/// Operating mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OperatingMode {
    /// Development: the response cache is bypassed.
    Local,
    /// Normal operation.
    #[default]
    Production,
}

/// Rate limit settings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateLimitSettings {
    /// Bucket parameters.
    pub policy: BucketPolicy,
    /// Bucket key.
    pub key: RateLimitKey,
}

/// Process-wide pipeline settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Operating mode.
    pub mode: OperatingMode,
    /// Overall request deadline.
    pub deadline: Duration,
    /// Rate limiting, or `None` to disable it.
    pub rate_limit: Option<RateLimitSettings>,
    /// Forwarded headers consulted for the client IP, in priority order.
    pub forwarded_headers: Vec<String>,
    /// Whether cacheable routes use the response cache.
    pub cache_enabled: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            mode: OperatingMode::Production,
            deadline: DEFAULT_DEADLINE,
            rate_limit: Some(RateLimitSettings::default()),
            forwarded_headers: DEFAULT_FORWARDED_HEADERS
                .iter()
                .map(ToString::to_string)
                .collect(),
            cache_enabled: true,
        }
    }
}

impl PipelineSettings {
    /// Returns `true` if cacheable routes should be cached.
    #[must_use]
    pub fn caching(&self) -> bool {
        self.cache_enabled && self.mode != OperatingMode::Local
    }
}

/// How a single route is protected.
///
/// # Example
///
/// ```
/// use lumen_core::{CollectionKind, PermissionLevel};
/// use lumen_middleware::compose::RoutePolicy;
///
/// let delete_image = RoutePolicy::guarded(PermissionLevel::CanDelete, CollectionKind::Images);
/// let public_feed = RoutePolicy::public().cacheable();
/// assert!(delete_image.permission().is_some());
/// assert!(public_feed.is_cacheable());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutePolicy {
    auth: AuthRequirement,
    permission: Option<PermissionGuard>,
    cacheable: bool,
}

impl RoutePolicy {
    /// A route open to anonymous callers.
    #[must_use]
    pub fn public() -> Self {
        Self::default()
    }

    /// A route that needs a valid token.
    #[must_use]
    pub fn authenticated() -> Self {
        Self {
            auth: AuthRequirement::Required,
            ..Self::default()
        }
    }

    /// A route guarded by `level` on the `kind` resource named by `{id}`.
    ///
    /// Authentication stays optional so the permission stage decides the
    /// status for anonymous callers.
    #[must_use]
    pub fn guarded(level: PermissionLevel, kind: CollectionKind) -> Self {
        Self {
            permission: Some(PermissionGuard::new(level, kind)),
            ..Self::default()
        }
    }

    /// Reads the guarded identifier from a different path parameter.
    #[must_use]
    pub fn param(mut self, param: impl Into<String>) -> Self {
        self.permission = self.permission.map(|guard| guard.param(param));
        self
    }

    /// Requires a valid token.
    #[must_use]
    pub fn require_auth(mut self) -> Self {
        self.auth = AuthRequirement::Required;
        self
    }

    /// Marks GET responses of this route as cacheable.
    ///
    /// Cached responses are served before authentication runs, so this is
    /// honored only on public routes without a permission guard.
    #[must_use]
    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    /// Returns the authentication requirement.
    #[must_use]
    pub const fn auth(&self) -> AuthRequirement {
        self.auth
    }

    /// Returns the permission guard.
    #[must_use]
    pub fn permission(&self) -> Option<&PermissionGuard> {
        self.permission.as_ref()
    }

    /// Returns `true` if the route was marked cacheable.
    #[must_use]
    pub const fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    fn caller_independent(&self) -> bool {
        self.permission.is_none() && self.auth == AuthRequirement::Optional
    }
}

/// Builds the pipeline for one route.
pub fn compose(
    collaborators: &Collaborators,
    settings: &PipelineSettings,
    policy: &RoutePolicy,
) -> Pipeline {
    let resolver = ClientIpResolver::new(settings.forwarded_headers.iter().cloned());

    let mut builder = Pipeline::builder()
        .deadline(settings.deadline)
        .stage(
            Stage::ContextPropagation,
            ContextPropagationMiddleware::with_resolver(resolver),
        )
        .stage(Stage::ErrorRendering, ErrorRenderingMiddleware::new())
        .stage(
            Stage::Authentication,
            AuthenticationMiddleware::new(Arc::clone(&collaborators.verifier), policy.auth),
        )
        .stage(Stage::ContentType, ContentTypeMiddleware::new());

    if let Some(rate_limit) = settings.rate_limit {
        builder = builder.stage(
            Stage::RateLimit,
            RateLimitMiddleware::builder()
                .policy(rate_limit.policy)
                .key(rate_limit.key)
                .store(Arc::clone(&collaborators.rate_limits))
                .build(),
        );
    }

    if let Some(guard) = &policy.permission {
        builder = builder.stage(
            Stage::Permission,
            PermissionMiddleware::new(
                guard.clone(),
                collaborators.locators.clone(),
                Arc::clone(&collaborators.acl),
            ),
        );
    }

    if policy.cacheable && settings.caching() {
        if policy.caller_independent() {
            builder = builder.stage(
                Stage::ResponseCache,
                ResponseCacheMiddleware::new(Arc::clone(&collaborators.cache)),
            );
        } else {
            tracing::warn!(
                ?policy,
                "ignoring cacheable flag on a route whose response depends on the caller"
            );
        }
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::InMemoryBuckets;
    use lumen_core::fixtures::{
        InMemoryCacheStore, MapResourceLocator, OwnerAclChecker, StaticTokenVerifier,
    };

    fn collaborators() -> Collaborators {
        Collaborators {
            verifier: Arc::new(StaticTokenVerifier::new()),
            locators: Locators::uniform(Arc::new(MapResourceLocator::new())),
            acl: Arc::new(OwnerAclChecker::new()),
            cache: Arc::new(InMemoryCacheStore::new()),
            rate_limits: Arc::new(InMemoryBuckets::default()),
        }
    }

    #[test]
    fn test_public_route_stages() {
        let pipeline = compose(
            &collaborators(),
            &PipelineSettings::default(),
            &RoutePolicy::public(),
        );
        assert_eq!(
            pipeline.stages(),
            vec![
                Stage::ContextPropagation,
                Stage::ErrorRendering,
                Stage::RateLimit,
                Stage::Authentication,
                Stage::ContentType,
            ]
        );
        assert_eq!(pipeline.deadline(), Some(DEFAULT_DEADLINE));
    }

    #[test]
    fn test_guarded_route_has_permission_stage() {
        let pipeline = compose(
            &collaborators(),
            &PipelineSettings::default(),
            &RoutePolicy::guarded(PermissionLevel::CanEdit, CollectionKind::Images),
        );
        assert!(pipeline.has_stage(Stage::Permission));
        assert!(!pipeline.has_stage(Stage::ResponseCache));
    }

    #[test]
    fn test_cache_wraps_cacheable_public_route() {
        let pipeline = compose(
            &collaborators(),
            &PipelineSettings::default(),
            &RoutePolicy::public().cacheable(),
        );
        assert_eq!(pipeline.stages()[0], Stage::ResponseCache);
    }

    #[test]
    fn test_local_mode_disables_cache() {
        let settings = PipelineSettings {
            mode: OperatingMode::Local,
            ..PipelineSettings::default()
        };
        let pipeline = compose(&collaborators(), &settings, &RoutePolicy::public().cacheable());
        assert!(!pipeline.has_stage(Stage::ResponseCache));
    }

    #[test]
    fn test_cache_refused_on_caller_dependent_route() {
        let pipeline = compose(
            &collaborators(),
            &PipelineSettings::default(),
            &RoutePolicy::guarded(PermissionLevel::CanView, CollectionKind::Images).cacheable(),
        );
        assert!(!pipeline.has_stage(Stage::ResponseCache));

        let pipeline = compose(
            &collaborators(),
            &PipelineSettings::default(),
            &RoutePolicy::authenticated().cacheable(),
        );
        assert!(!pipeline.has_stage(Stage::ResponseCache));
    }

    #[test]
    fn test_rate_limit_can_be_disabled() {
        let settings = PipelineSettings {
            rate_limit: None,
            ..PipelineSettings::default()
        };
        let pipeline = compose(&collaborators(), &settings, &RoutePolicy::public());
        assert!(!pipeline.has_stage(Stage::RateLimit));
    }

    #[test]
    fn test_param_override() {
        let policy = RoutePolicy::guarded(PermissionLevel::CanView, CollectionKind::Collections)
            .param("collection_id");
        assert_eq!(
            policy.permission(),
            Some(&PermissionGuard::new(PermissionLevel::CanView, CollectionKind::Collections).param("collection_id"))
        );
    }
}
