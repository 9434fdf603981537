//! In-memory collaborators for tests and local development.
//!
//! Every fixture counts its invocations so tests can assert how often the
//! pipeline consulted it (for example, that a cache hit did not reach the
//! ACL checker).
//!
//! # Example
//!
//! ```
//! use lumen_core::fixtures::{MapResourceLocator, OwnerAclChecker, StaticTokenVerifier};
//! use lumen_core::ResourceRef;
//!
//! let verifier = StaticTokenVerifier::new().with_user("tok-devin", "devin");
//! let locator = MapResourceLocator::new().with(ResourceRef::image("abc"));
//! let acl = OwnerAclChecker::new()
//!     .with_owner(ResourceRef::image("abc"), ResourceRef::user("devin"));
//!
//! assert_eq!(verifier.calls(), 0);
//! assert_eq!(locator.len(), 1);
//! assert_eq!(acl.calls(), 0);
//! ```

use crate::collaborators::{
    AclChecker, CacheStore, LookupError, ResourceLocator, TokenVerdict, TokenVerifier,
};
use crate::context::BearerToken;
use crate::error::{AuthError, CollaboratorError};
use crate::permission::PermissionLevel;
use crate::reference::{CollectionKind, ResourceRef};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Token verifier backed by a fixed token table.
///
/// Unknown tokens are reported as invalid with a 401.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    users: HashMap<String, ResourceRef>,
    invalid: HashMap<String, AuthError>,
    failing: Vec<String>,
    calls: AtomicUsize,
}

impl StaticTokenVerifier {
    /// Creates an empty verifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` as identifying user `user_id`.
    #[must_use]
    pub fn with_user(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.users.insert(token.into(), ResourceRef::user(user_id));
        self
    }

    /// Registers `token` as semantically invalid with a specific error.
    #[must_use]
    pub fn with_invalid(mut self, token: impl Into<String>, error: AuthError) -> Self {
        self.invalid.insert(token.into(), error);
        self
    }

    /// Registers `token` as one whose verification fails in transport.
    #[must_use]
    pub fn with_failing(mut self, token: impl Into<String>) -> Self {
        self.failing.push(token.into());
        self
    }

    /// Returns how many times `verify` was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &BearerToken) -> Result<TokenVerdict, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let raw = token.as_str();

        if self.failing.iter().any(|t| t == raw) {
            return Err(CollaboratorError::Unavailable {
                service: "token verifier",
            });
        }
        if let Some(user) = self.users.get(raw) {
            return Ok(TokenVerdict::Valid(user.clone()));
        }
        let error = self
            .invalid
            .get(raw)
            .cloned()
            .unwrap_or_else(|| AuthError::unauthorized("invalid token"));
        Ok(TokenVerdict::Invalid(error))
    }
}

/// Resource locator backed by a set of known references.
#[derive(Debug, Default)]
pub struct MapResourceLocator {
    known: DashSet<ResourceRef>,
    failing_kinds: DashSet<CollectionKind>,
    calls: AtomicUsize,
}

impl MapResourceLocator {
    /// Creates an empty locator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource.
    #[must_use]
    pub fn with(self, resource: ResourceRef) -> Self {
        self.insert(resource);
        self
    }

    /// Makes every lookup for `kind` fail as a backend outage.
    #[must_use]
    pub fn with_failing_kind(self, kind: CollectionKind) -> Self {
        self.failing_kinds.insert(kind);
        self
    }

    /// Adds a resource to a shared locator.
    pub fn insert(&self, resource: ResourceRef) {
        self.known.insert(resource);
    }

    /// Returns the number of known resources.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Returns `true` if no resources are known.
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Returns how many times `resolve` was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ResourceLocator for MapResourceLocator {
    async fn resolve(
        &self,
        kind: CollectionKind,
        identifier: &str,
    ) -> Result<ResourceRef, LookupError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if self.failing_kinds.contains(&kind) {
            return Err(CollaboratorError::Unavailable {
                service: "resource locator",
            }
            .into());
        }

        let candidate = ResourceRef::new(kind, identifier);
        if self.known.contains(&candidate) {
            Ok(candidate)
        } else {
            Err(LookupError::NotFound {
                kind,
                identifier: identifier.to_string(),
            })
        }
    }
}

/// ACL checker granting owners every level on their resources.
///
/// Resources marked public are viewable by anyone, including anonymous
/// callers. Explicit grants allow exactly the granted level.
#[derive(Debug, Default)]
pub struct OwnerAclChecker {
    owners: DashMap<ResourceRef, ResourceRef>,
    public: DashSet<ResourceRef>,
    grants: DashSet<(ResourceRef, PermissionLevel, ResourceRef)>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl OwnerAclChecker {
    /// Creates an empty checker that denies everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `owner` as the owner of `target`.
    #[must_use]
    pub fn with_owner(self, target: ResourceRef, owner: ResourceRef) -> Self {
        self.owners.insert(target, owner);
        self
    }

    /// Makes `target` viewable by anyone.
    #[must_use]
    pub fn with_public(self, target: ResourceRef) -> Self {
        self.public.insert(target);
        self
    }

    /// Grants `caller` exactly `level` on `target`.
    #[must_use]
    pub fn with_grant(self, caller: ResourceRef, level: PermissionLevel, target: ResourceRef) -> Self {
        self.grants.insert((caller, level, target));
        self
    }

    /// Simulates an authorization-store outage.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Returns how many times `check` was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AclChecker for OwnerAclChecker {
    async fn check(
        &self,
        caller: Option<&ResourceRef>,
        level: PermissionLevel,
        target: &ResourceRef,
    ) -> Result<bool, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if self.failing.load(Ordering::Relaxed) {
            return Err(CollaboratorError::Unavailable {
                service: "acl store",
            });
        }

        if level.is_view() && self.public.contains(target) {
            return Ok(true);
        }
        let Some(caller) = caller else {
            return Ok(false);
        };
        if self
            .owners
            .get(target)
            .is_some_and(|owner| owner.value() == caller)
        {
            return Ok(true);
        }
        Ok(self
            .grants
            .contains(&(caller.clone(), level, target.clone())))
    }
}

/// Cache store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, Bytes>,
    failing: AtomicBool,
    gets: AtomicUsize,
    sets: AtomicUsize,
}

impl InMemoryCacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a store outage: every call errors.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Returns whether `key` is stored.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns how many times `get` was called.
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    /// Returns how many times `set` was called.
    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::Relaxed)
    }

    fn check_available(&self) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::Relaxed) {
            Err(CollaboratorError::Unavailable {
                service: "cache store",
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CollaboratorError> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), CollaboratorError> {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}
