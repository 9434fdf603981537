//! Contracts for the external services the pipeline consults.
//!
//! In-memory versions live in [`crate::fixtures`].

use crate::context::BearerToken;
use crate::error::{AuthError, CollaboratorError};
use crate::permission::PermissionLevel;
use crate::reference::{CollectionKind, ResourceRef};
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Outcome of a token verification that reached the verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenVerdict {
    /// The token is valid and identifies this user.
    Valid(ResourceRef),
    /// The token is expired, malformed, or revoked.
    Invalid(AuthError),
}

/// Verifies bearer tokens against the identity service.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verifies `token`.
    ///
    /// Semantic invalidity is reported as [`TokenVerdict::Invalid`]. `Err` is
    /// reserved for transport or unexpected failures.
    async fn verify(&self, token: &BearerToken) -> Result<TokenVerdict, CollaboratorError>;
}

/// Failure resolving an identifier to a [`ResourceRef`].
#[derive(Debug, Error)]
pub enum LookupError {
    /// No resource with that identifier exists.
    #[error("{kind} '{identifier}' does not exist")]
    NotFound {
        /// Collection that was searched.
        kind: CollectionKind,
        /// Identifier that was looked up.
        identifier: String,
    },

    /// The backing store failed.
    #[error(transparent)]
    Backend(#[from] CollaboratorError),
}

/// Resolves route identifiers to canonical references for one collection kind.
#[async_trait]
pub trait ResourceLocator: Send + Sync {
    /// Resolves `identifier` within `kind`.
    async fn resolve(&self, kind: CollectionKind, identifier: &str)
        -> Result<ResourceRef, LookupError>;
}

/// Evaluates ownership and ACL rules in the authorization store.
#[async_trait]
pub trait AclChecker: Send + Sync {
    /// Returns whether `caller` (`None` for anonymous) holds exactly `level`
    /// on `target`.
    async fn check(
        &self,
        caller: Option<&ResourceRef>,
        level: PermissionLevel,
        target: &ResourceRef,
    ) -> Result<bool, CollaboratorError>;
}

/// Byte store backing the response cache.
///
/// Writes to a key must be atomic: a concurrent reader sees either the old
/// value or the new one.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the bytes stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CollaboratorError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Bytes) -> Result<(), CollaboratorError>;
}
