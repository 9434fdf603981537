//! Resource references.
//!
//! A [`ResourceRef`] names any addressable entity in the photo store as a
//! `(collection kind, identifier)` pair. Identifiers are unique within their
//! collection kind and a reference never changes once issued.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The collection a resource lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Registered users.
    Users,
    /// Uploaded images.
    Images,
    /// User-curated collections of images.
    Collections,
}

impl CollectionKind {
    /// Returns the collection name as used in URLs and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Images => "images",
            Self::Collections => "collections",
        }
    }

    /// Returns all collection kinds.
    #[must_use]
    pub const fn all() -> [CollectionKind; 3] {
        [Self::Users, Self::Images, Self::Collections]
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a known collection kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown collection kind: {0}")]
pub struct ParseKindError(pub String);

impl FromStr for CollectionKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "users" => Ok(Self::Users),
            "images" => Ok(Self::Images),
            "collections" => Ok(Self::Collections),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

/// Opaque handle identifying a user, image, or collection.
///
/// # Example
///
/// ```
/// use lumen_core::{CollectionKind, ResourceRef};
///
/// let image = ResourceRef::new(CollectionKind::Images, "abc");
/// assert_eq!(image.to_path(), "/images/abc");
/// assert!(image.expect_kind(CollectionKind::Images).is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "collection")]
    kind: CollectionKind,
    id: String,
}

impl ResourceRef {
    /// Creates a reference to `id` within `kind`.
    #[must_use]
    pub fn new(kind: CollectionKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Shorthand for a user reference.
    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self::new(CollectionKind::Users, id)
    }

    /// Shorthand for an image reference.
    #[must_use]
    pub fn image(id: impl Into<String>) -> Self {
        Self::new(CollectionKind::Images, id)
    }

    /// Shorthand for a collection reference.
    #[must_use]
    pub fn collection(id: impl Into<String>) -> Self {
        Self::new(CollectionKind::Collections, id)
    }

    /// Returns the collection kind.
    #[must_use]
    pub const fn kind(&self) -> CollectionKind {
        self.kind
    }

    /// Returns the identifier within the collection.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Checks that this reference belongs to `kind`.
    ///
    /// Operations that only make sense for one collection (fetching a user,
    /// listing a collection's images) call this before touching storage.
    pub fn expect_kind(&self, kind: CollectionKind) -> Result<&Self, PipelineError> {
        if self.kind == kind {
            Ok(self)
        } else {
            Err(PipelineError::validation(format!(
                "reference is of the wrong collection kind: expected {kind}, got {}",
                self.kind
            )))
        }
    }

    /// Renders the reference as a path, e.g. `/images/abc`.
    #[must_use]
    pub fn to_path(&self) -> String {
        format!("/{}/{}", self.kind, self.id)
    }

    /// Renders an absolute link below `base`, e.g. `https://lumen.example/images/abc`.
    #[must_use]
    pub fn to_url(&self, base: &str) -> String {
        format!("{}{}", base.trim_end_matches('/'), self.to_path())
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in CollectionKind::all() {
            assert_eq!(kind.as_str().parse::<CollectionKind>(), Ok(kind));
        }
        assert!("albums".parse::<CollectionKind>().is_err());
    }

    #[test]
    fn test_expect_kind_mismatch_is_validation_error() {
        let user = ResourceRef::user("devin");
        let err = user.expect_kind(CollectionKind::Images).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.message().contains("wrong collection kind"));
    }

    #[test]
    fn test_links() {
        let image = ResourceRef::image("xyz");
        assert_eq!(image.to_path(), "/images/xyz");
        assert_eq!(
            image.to_url("https://lumen.example/"),
            "https://lumen.example/images/xyz"
        );
        assert_eq!(image.to_string(), "images:xyz");
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(ResourceRef::collection("summer")).unwrap();
        assert_eq!(json["collection"], "collections");
        assert_eq!(json["id"], "summer");
    }
}
