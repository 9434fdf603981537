//! Error types for Lumen.
//!
//! This module provides [`PipelineError`], the error every pipeline stage
//! short-circuits with, and [`ErrorEnvelope`], the `{code, err}` body it is
//! rendered into.
//!
//! | Variant | Status | Expected |
//! |---|---|---|
//! | `Validation` | 400 | yes |
//! | `Authentication` | from [`AuthError`] (usually 401) | yes |
//! | `Permission` | 403 or 404 (masked) | yes |
//! | `NotFound` | 404 | yes |
//! | `RateLimited` | 429 | yes |
//! | `Internal` | 500 | no |
//! | `Timeout` | 503 | no |
//!
//! Only expected errors carry a caller-safe message. `Internal` errors render
//! a generic message; their detail is logged with the correlation id.

use crate::context::ContextConflict;
use crate::reference::{CollectionKind, ResourceRef};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`PipelineError`].
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Message rendered for deadline expiry.
pub const TIMEOUT_MESSAGE: &str = "Application has timed out.";

/// Message rendered in place of internal error detail.
pub const INTERNAL_MESSAGE: &str = "Internal Server Error";

/// Categories of errors for classification, logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input or collection-kind mismatch.
    Validation,
    /// Token invalid, expired, or missing where required.
    Authentication,
    /// ACL denial.
    Permission,
    /// Resource absent.
    NotFound,
    /// Rate limit exceeded.
    RateLimited,
    /// Collaborator failure or pipeline bug.
    Internal,
    /// Overall request deadline exceeded.
    Timeout,
}

impl ErrorCategory {
    /// Returns the category name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::Permission => "permission",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Internal => "internal",
            Self::Timeout => "timeout",
        }
    }
}

/// A recoverable authentication failure reported by the token verifier.
///
/// Carries a status and message that are safe to show to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AuthError {
    /// HTTP status to respond with.
    pub status: StatusCode,
    /// Caller-safe message.
    pub message: String,
}

impl AuthError {
    /// Creates an auth error with an explicit status.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Creates a 401 auth error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

/// Failure talking to an external collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The collaborator could not be reached.
    #[error("{service} is unavailable")]
    Unavailable {
        /// Name of the collaborator.
        service: &'static str,
    },

    /// The collaborator did not answer in time.
    #[error("{service} timed out after {elapsed:?}")]
    Timeout {
        /// Name of the collaborator.
        service: &'static str,
        /// How long the caller waited.
        elapsed: Duration,
    },

    /// Any other failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Error produced by a pipeline stage or handler.
///
/// # Example
///
/// ```
/// use lumen_core::PipelineError;
/// use http::StatusCode;
///
/// let err = PipelineError::internal("acl store unreachable");
/// assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
/// assert_eq!(err.to_envelope().err, "Internal Server Error");
/// ```
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed input or reference mismatch.
    #[error("Validation error: {message}")]
    Validation {
        /// Caller-safe message.
        message: String,
    },

    /// Authentication failed where it was required.
    #[error("Authentication error: {message}")]
    Authentication {
        /// Status to respond with.
        status: StatusCode,
        /// Caller-safe message.
        message: String,
    },

    /// ACL denial. Status is 403 for view denials and 404 otherwise.
    #[error("Permission denied: {message}")]
    Permission {
        /// Status to respond with.
        status: StatusCode,
        /// Caller-safe message.
        message: String,
    },

    /// Target resource does not exist.
    #[error("Not found: {message}")]
    NotFound {
        /// Caller-safe message.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limited: retry after {retry_after:?}")]
    RateLimited {
        /// Time until a token becomes available.
        retry_after: Duration,
    },

    /// Internal failure. The message is logged, never rendered.
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic message.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Overall request deadline exceeded.
    #[error("Timeout: {}", TIMEOUT_MESSAGE)]
    Timeout,
}

impl PipelineError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a 401 authentication error.
    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Authentication {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    /// Creates a 403 view denial.
    #[must_use]
    pub fn forbidden(target: &ResourceRef) -> Self {
        Self::Permission {
            status: StatusCode::FORBIDDEN,
            message: format!("not allowed to view {}", target.to_path()),
        }
    }

    /// Creates a non-view denial, masked as 404.
    ///
    /// The message is identical to [`PipelineError::not_found_resource`] so the
    /// response does not reveal whether the resource exists.
    #[must_use]
    pub fn masked(kind: CollectionKind, identifier: &str) -> Self {
        Self::Permission {
            status: StatusCode::NOT_FOUND,
            message: not_found_message(kind, identifier),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a not-found error for a resource.
    #[must_use]
    pub fn not_found_resource(kind: CollectionKind, identifier: &str) -> Self {
        Self::not_found(not_found_message(kind, identifier))
    }

    /// Creates a rate-limited error.
    #[must_use]
    pub const fn rate_limited(retry_after: Duration) -> Self {
        Self::RateLimited { retry_after }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error with a source error.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::Permission { .. } => ErrorCategory::Permission,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::RateLimited { .. } => ErrorCategory::RateLimited,
            Self::Internal { .. } => ErrorCategory::Internal,
            Self::Timeout => ErrorCategory::Timeout,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Authentication { status, .. } | Self::Permission { status, .. } => *status,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns `true` for errors that carry a caller-safe message.
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        !matches!(self, Self::Internal { .. } | Self::Timeout)
    }

    /// Returns the message rendered to the caller.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Validation { message }
            | Self::Authentication { message, .. }
            | Self::Permission { message, .. }
            | Self::NotFound { message } => message.clone(),
            Self::RateLimited { .. } => "Too Many Requests".to_string(),
            Self::Internal { .. } => INTERNAL_MESSAGE.to_string(),
            Self::Timeout => TIMEOUT_MESSAGE.to_string(),
        }
    }

    /// Returns the retry delay for rate-limited errors.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Converts this error to the `{code, err}` body.
    #[must_use]
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.status_code().as_u16(),
            err: self.message(),
        }
    }
}

impl From<AuthError> for PipelineError {
    fn from(err: AuthError) -> Self {
        Self::Authentication {
            status: err.status,
            message: err.message,
        }
    }
}

impl From<CollaboratorError> for PipelineError {
    fn from(err: CollaboratorError) -> Self {
        Self::internal_with_source("collaborator call failed", err)
    }
}

impl From<ContextConflict> for PipelineError {
    fn from(err: ContextConflict) -> Self {
        Self::internal_with_source("pipeline stage ordering violated", err)
    }
}

fn not_found_message(kind: CollectionKind, identifier: &str) -> String {
    format!("{kind} '{identifier}' not found")
}

/// Serializable error body for HTTP responses.
///
/// `code` mirrors the HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// HTTP status code.
    pub code: u16,
    /// Caller-safe message.
    pub err: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let error = PipelineError::validation("bad ref");
        assert_eq!(error.category(), ErrorCategory::Validation);
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert!(error.is_expected());
        assert_eq!(error.message(), "bad ref");
    }

    #[test]
    fn test_auth_error_keeps_status() {
        let error: PipelineError = AuthError::new(StatusCode::UNAUTHORIZED, "token expired").into();
        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(error.to_envelope().err, "token expired");
    }

    #[test]
    fn test_masked_denial_is_indistinguishable_from_not_found() {
        let masked = PipelineError::masked(CollectionKind::Images, "xyz");
        let missing = PipelineError::not_found_resource(CollectionKind::Images, "xyz");

        assert_eq!(masked.category(), ErrorCategory::Permission);
        assert_eq!(missing.category(), ErrorCategory::NotFound);
        assert_eq!(masked.to_envelope(), missing.to_envelope());
    }

    #[test]
    fn test_forbidden_is_403() {
        let error = PipelineError::forbidden(&ResourceRef::image("abc"));
        assert_eq!(error.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(error.category(), ErrorCategory::Permission);
    }

    #[test]
    fn test_internal_message_is_never_rendered() {
        let error = PipelineError::internal_with_source(
            "acl lookup failed",
            anyhow::anyhow!("connection refused to 10.1.2.3:5432"),
        );
        let envelope = error.to_envelope();
        assert_eq!(envelope.code, 500);
        assert_eq!(envelope.err, INTERNAL_MESSAGE);
        assert!(!error.is_expected());
    }

    #[test]
    fn test_rate_limited() {
        let error = PipelineError::rate_limited(Duration::from_millis(200));
        assert_eq!(error.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(error.retry_after(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_timeout() {
        let envelope = PipelineError::Timeout.to_envelope();
        assert_eq!(envelope.code, 503);
        assert_eq!(envelope.err, "Application has timed out.");
    }

    #[test]
    fn test_collaborator_error_is_internal() {
        let error: PipelineError = CollaboratorError::Unavailable { service: "acl" }.into();
        assert_eq!(error.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_envelope_serialization() {
        let json = serde_json::to_string(&PipelineError::not_found("gone").to_envelope())
            .expect("serialization should work");
        assert_eq!(json, r#"{"code":404,"err":"gone"}"#);
    }
}
