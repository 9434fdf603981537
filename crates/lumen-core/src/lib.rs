//! # Lumen Core
//!
//! Core types and collaborator contracts for the Lumen request pipeline.
//!
//! This crate provides the foundational types used throughout Lumen:
//!
//! - [`ResourceRef`] - `(collection kind, identifier)` handle for users, images and collections
//! - [`PermissionLevel`] - `CanView`, `CanFavorite`, `CanEdit`, `CanDelete`
//! - [`AuthContext`] - Append-only per-request context (correlation id, client IP, token, identity)
//! - [`PipelineError`] - Error taxonomy and the `{code, err}` envelope
//! - [`TokenVerifier`], [`ResourceLocator`], [`AclChecker`], [`CacheStore`] - Contracts for
//!   the external collaborators the pipeline consults

#![doc(html_root_url = "https://docs.rs/lumen-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod collaborators;
mod context;
mod error;
pub mod fixtures;
mod identity;
mod permission;
mod reference;

pub use collaborators::{
    AclChecker, CacheStore, LookupError, ResourceLocator, TokenVerdict, TokenVerifier,
};
pub use context::{AuthContext, BearerToken, ContextConflict, CorrelationId};
pub use error::{
    AuthError, CollaboratorError, ErrorCategory, ErrorEnvelope, PipelineError, PipelineResult,
    INTERNAL_MESSAGE, TIMEOUT_MESSAGE,
};
pub use identity::Identity;
pub use permission::PermissionLevel;
pub use reference::{CollectionKind, ParseKindError, ResourceRef};
