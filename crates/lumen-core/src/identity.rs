//! Caller identity.

use crate::reference::ResourceRef;

/// Who the caller is, as far as the pipeline knows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Identity {
    /// The authentication stage has not run for this request.
    #[default]
    Unresolved,
    /// Authentication ran and no valid identity was established.
    Anonymous,
    /// Authentication ran and verified the caller.
    User(ResourceRef),
}

impl Identity {
    /// Returns the authenticated user, if any.
    #[must_use]
    pub fn user(&self) -> Option<&ResourceRef> {
        match self {
            Self::User(user) => Some(user),
            _ => None,
        }
    }

    /// Returns `true` once the authentication stage has run.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }

    /// Returns a string identifier suitable for logging.
    ///
    /// This never includes the raw token.
    #[must_use]
    pub fn log_id(&self) -> String {
        match self {
            Self::Unresolved => "unresolved".to_string(),
            Self::Anonymous => "anonymous".to_string(),
            Self::User(user) => user.to_string(),
        }
    }
}
