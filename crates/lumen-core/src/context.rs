//! Request context types.
//!
//! The [`AuthContext`] carries per-request identity through the pipeline.
//! It is append-only: each stage receives the context by value and hands an
//! extended copy to the next stage. A field that is already set can never be
//! overwritten; attempting to do so returns [`ContextConflict`].

use crate::identity::Identity;
use crate::reference::ResourceRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

/// A unique identifier for each request.
///
/// Backed by a random (v4) UUID: 122 random bits, so collisions between
/// requests are not a practical concern.
///
/// # Example
///
/// ```
/// use lumen_core::CorrelationId;
///
/// let id = CorrelationId::new();
/// assert_ne!(id, CorrelationId::new());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Creates a fresh random correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A raw, unverified bearer token.
///
/// `Debug` output is redacted so tokens never end up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wraps a raw token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for handing to the verifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// Returned when a stage tries to set a context field that is already set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("request context field `{field}` is already set")]
pub struct ContextConflict {
    /// Name of the field that was already populated.
    pub field: &'static str,
}

/// Per-request identity context.
///
/// Created at ingress with only the transport peer address, then extended by
/// the pipeline stages:
///
/// | Field            | Set by                |
/// |------------------|-----------------------|
/// | `correlation_id` | context propagation   |
/// | `client_ip`      | context propagation   |
/// | `token`          | context propagation   |
/// | `identity`       | authentication        |
///
/// # Example
///
/// ```
/// use lumen_core::{AuthContext, CorrelationId, Identity, ResourceRef};
///
/// let ctx = AuthContext::ingress(None)
///     .with_correlation_id(CorrelationId::new())
///     .unwrap()
///     .with_identity(Identity::User(ResourceRef::user("devin")))
///     .unwrap();
///
/// assert_eq!(ctx.caller().map(ResourceRef::id), Some("devin"));
/// assert!(ctx.clone().with_identity(Identity::Anonymous).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct AuthContext {
    correlation_id: Option<CorrelationId>,
    peer_addr: Option<SocketAddr>,
    client_ip: Option<IpAddr>,
    token: Option<BearerToken>,
    identity: Identity,
    started_at: Instant,
}

impl AuthContext {
    /// Creates the context for a freshly accepted request.
    #[must_use]
    pub fn ingress(peer_addr: Option<SocketAddr>) -> Self {
        Self {
            correlation_id: None,
            peer_addr,
            client_ip: None,
            token: None,
            identity: Identity::Unresolved,
            started_at: Instant::now(),
        }
    }

    /// Returns the correlation id, once assigned.
    #[must_use]
    pub const fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    /// Returns the transport-layer peer address.
    #[must_use]
    pub const fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Returns the derived client IP, once assigned.
    #[must_use]
    pub const fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    /// Returns the raw bearer token, if the request carried one.
    #[must_use]
    pub const fn token(&self) -> Option<&BearerToken> {
        self.token.as_ref()
    }

    /// Returns the caller identity.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns the authenticated caller, if any.
    #[must_use]
    pub fn caller(&self) -> Option<&ResourceRef> {
        self.identity.user()
    }

    /// Returns when the request was accepted.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request was accepted.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Returns a copy extended with the correlation id.
    pub fn with_correlation_id(mut self, id: CorrelationId) -> Result<Self, ContextConflict> {
        if self.correlation_id.is_some() {
            return Err(ContextConflict {
                field: "correlation_id",
            });
        }
        self.correlation_id = Some(id);
        Ok(self)
    }

    /// Returns a copy extended with the client IP.
    pub fn with_client_ip(mut self, ip: IpAddr) -> Result<Self, ContextConflict> {
        if self.client_ip.is_some() {
            return Err(ContextConflict { field: "client_ip" });
        }
        self.client_ip = Some(ip);
        Ok(self)
    }

    /// Returns a copy extended with the raw bearer token.
    pub fn with_token(mut self, token: BearerToken) -> Result<Self, ContextConflict> {
        if self.token.is_some() {
            return Err(ContextConflict { field: "token" });
        }
        self.token = Some(token);
        Ok(self)
    }

    /// Returns a copy with the identity resolved.
    ///
    /// Only an [`Identity::Unresolved`] context can be resolved, and it cannot
    /// be resolved back to `Unresolved`.
    pub fn with_identity(mut self, identity: Identity) -> Result<Self, ContextConflict> {
        if self.identity.is_resolved() || !identity.is_resolved() {
            return Err(ContextConflict { field: "identity" });
        }
        self.identity = identity;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingress_context_is_empty() {
        let peer: SocketAddr = "198.51.100.7:4000".parse().unwrap();
        let ctx = AuthContext::ingress(Some(peer));
        assert_eq!(ctx.peer_addr(), Some(peer));
        assert!(ctx.correlation_id().is_none());
        assert!(ctx.client_ip().is_none());
        assert!(ctx.token().is_none());
        assert_eq!(ctx.identity(), &Identity::Unresolved);
    }

    #[test]
    fn test_fields_cannot_be_overwritten() {
        let ctx = AuthContext::ingress(None)
            .with_correlation_id(CorrelationId::new())
            .unwrap()
            .with_client_ip("203.0.113.5".parse().unwrap())
            .unwrap()
            .with_token(BearerToken::new("t"))
            .unwrap();

        assert_eq!(
            ctx.clone().with_correlation_id(CorrelationId::new()).unwrap_err(),
            ContextConflict {
                field: "correlation_id"
            }
        );
        assert!(ctx
            .clone()
            .with_client_ip("203.0.113.6".parse().unwrap())
            .is_err());
        assert!(ctx.clone().with_token(BearerToken::new("u")).is_err());
    }

    #[test]
    fn test_identity_resolves_once() {
        let ctx = AuthContext::ingress(None);
        assert!(ctx.clone().with_identity(Identity::Unresolved).is_err());

        let ctx = ctx.with_identity(Identity::Anonymous).unwrap();
        assert!(ctx.caller().is_none());
        assert!(ctx
            .with_identity(Identity::User(ResourceRef::user("x")))
            .is_err());
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = BearerToken::new("secret-value");
        assert!(!format!("{token:?}").contains("secret"));
        assert_eq!(token.as_str(), "secret-value");
    }
}
