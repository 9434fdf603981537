//! Permission stage.
//!
//! Authorizes the caller against the route's target resource:
//!
//! 1. Read the target identifier from the route's path parameters
//! 2. Resolve it to a canonical reference through the locator for its kind
//! 3. Reject anonymous callers outright for any level other than view
//! 4. Ask the ACL checker for the exact requested level
//!
//! # Status mapping
//!
//! | Outcome                        | Status |
//! |--------------------------------|--------|
//! | target does not exist          | 404    |
//! | locator or ACL store failure   | 500    |
//! | view denied                    | 403    |
//! | any other level denied         | 404    |
//! | anonymous, non-view level      | 404    |
//! | identity not yet resolved      | 500    |
//!
//! Non-view denials use the same message as a missing resource, so a caller
//! without access cannot tell the two apart. Internally they stay distinct
//! error variants and metric outcomes.

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{PathParams, Request, ResolvedTarget, Response};
use lumen_core::{
    AclChecker, AuthContext, CollectionKind, LookupError, PermissionLevel, PipelineError,
    PipelineResult, ResourceLocator, ResourceRef,
};
use lumen_telemetry::metrics::record_permission_decision;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Path parameter holding the target identifier by default.
pub const DEFAULT_ID_PARAM: &str = "id";

/// Permission requirement attached to a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGuard {
    level: PermissionLevel,
    kind: CollectionKind,
    param: String,
}

impl PermissionGuard {
    /// Requires `level` on the `kind` resource named by the `id` parameter.
    #[must_use]
    pub fn new(level: PermissionLevel, kind: CollectionKind) -> Self {
        Self {
            level,
            kind,
            param: DEFAULT_ID_PARAM.to_string(),
        }
    }

    /// Reads the identifier from a different path parameter.
    #[must_use]
    pub fn param(mut self, param: impl Into<String>) -> Self {
        self.param = param.into();
        self
    }

    /// Returns the requested level.
    #[must_use]
    pub const fn level(&self) -> PermissionLevel {
        self.level
    }

    /// Returns the target collection kind.
    #[must_use]
    pub const fn kind(&self) -> CollectionKind {
        self.kind
    }
}

/// Resource locators, one per collection kind.
#[derive(Clone, Default)]
pub struct Locators {
    by_kind: HashMap<CollectionKind, Arc<dyn ResourceLocator>>,
}

impl fmt::Debug for Locators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.by_kind.keys()).finish()
    }
}

impl Locators {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the locator for `kind`.
    #[must_use]
    pub fn with(mut self, kind: CollectionKind, locator: Arc<dyn ResourceLocator>) -> Self {
        self.by_kind.insert(kind, locator);
        self
    }

    /// Registers one locator for every collection kind.
    #[must_use]
    pub fn uniform(locator: Arc<dyn ResourceLocator>) -> Self {
        CollectionKind::all()
            .into_iter()
            .fold(Self::new(), |locators, kind| {
                locators.with(kind, Arc::clone(&locator))
            })
    }

    /// Returns the locator for `kind`.
    #[must_use]
    pub fn get(&self, kind: CollectionKind) -> Option<&Arc<dyn ResourceLocator>> {
        self.by_kind.get(&kind)
    }
}

/// Stage that enforces a [`PermissionGuard`].
#[derive(Clone)]
pub struct PermissionMiddleware {
    guard: PermissionGuard,
    locators: Locators,
    acl: Arc<dyn AclChecker>,
}

impl fmt::Debug for PermissionMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionMiddleware")
            .field("guard", &self.guard)
            .field("locators", &self.locators)
            .finish_non_exhaustive()
    }
}

impl PermissionMiddleware {
    /// Creates the stage.
    #[must_use]
    pub fn new(guard: PermissionGuard, locators: Locators, acl: Arc<dyn AclChecker>) -> Self {
        Self {
            guard,
            locators,
            acl,
        }
    }

    /// Returns the guard this stage enforces.
    #[must_use]
    pub fn guard(&self) -> &PermissionGuard {
        &self.guard
    }

    async fn resolve(&self, identifier: &str) -> PipelineResult<ResourceRef> {
        let kind = self.guard.kind;
        let locator = self
            .locators
            .get(kind)
            .ok_or_else(|| PipelineError::internal(format!("no locator registered for {kind}")))?;

        match locator.resolve(kind, identifier).await {
            Ok(target) => {
                target.expect_kind(kind)?;
                Ok(target)
            }
            Err(LookupError::NotFound { .. }) => {
                self.record("not_found");
                Err(PipelineError::not_found_resource(kind, identifier))
            }
            Err(LookupError::Backend(error)) => {
                self.record("error");
                Err(PipelineError::internal_with_source(
                    format!("resolving {kind} '{identifier}' failed"),
                    error,
                ))
            }
        }
    }

    async fn authorize(&self, ctx: &AuthContext, identifier: &str) -> PipelineResult<ResourceRef> {
        let PermissionGuard { level, kind, .. } = self.guard;

        if !ctx.identity().is_resolved() {
            return Err(PipelineError::internal(
                "permission check ran before authentication",
            ));
        }

        let target = self.resolve(identifier).await?;
        let caller = ctx.caller();

        if caller.is_none() && !level.is_view() {
            self.record("masked");
            tracing::debug!(%target, level = level.as_str(), "anonymous caller denied");
            return Err(PipelineError::masked(kind, identifier));
        }

        let granted = self.acl.check(caller, level, &target).await.map_err(|error| {
            self.record("error");
            PipelineError::internal_with_source("acl check failed", error)
        })?;

        if granted {
            self.record("granted");
            Ok(target)
        } else if level.is_view() {
            self.record("denied");
            tracing::debug!(%target, "view denied");
            Err(PipelineError::forbidden(&target))
        } else {
            self.record("masked");
            tracing::debug!(%target, level = level.as_str(), "denial masked as not found");
            Err(PipelineError::masked(kind, identifier))
        }
    }

    fn record(&self, outcome: &'static str) {
        record_permission_decision(self.guard.level.as_str(), outcome);
    }
}

impl Middleware for PermissionMiddleware {
    fn name(&self) -> &'static str {
        "permission"
    }

    fn process<'a>(
        &'a self,
        ctx: AuthContext,
        mut request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            let identifier = request
                .extensions()
                .get::<PathParams>()
                .and_then(|params| params.get(&self.guard.param))
                .map(ToString::to_string)
                .ok_or_else(|| {
                    PipelineError::validation(format!(
                        "missing route parameter '{}'",
                        self.guard.param
                    ))
                })?;

            let target = self.authorize(&ctx, &identifier).await?;
            request.extensions_mut().insert(ResolvedTarget(target));
            next.run(ctx, request).await
        })
    }
}
