//! Permission levels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability requested against a target resource.
///
/// Levels are ordered `CanView < CanFavorite < CanEdit < CanDelete`, but a
/// check is always made against the exact requested level: holding
/// `CanDelete` does not imply `CanView`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    /// Read access. The only level grantable to anonymous callers.
    CanView,
    /// Mark the resource as a favorite.
    CanFavorite,
    /// Modify the resource.
    CanEdit,
    /// Remove the resource.
    CanDelete,
}

impl PermissionLevel {
    /// Returns `true` for [`PermissionLevel::CanView`].
    #[must_use]
    pub const fn is_view(self) -> bool {
        matches!(self, Self::CanView)
    }

    /// Returns the level name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CanView => "can_view",
            Self::CanFavorite => "can_favorite",
            Self::CanEdit => "can_edit",
            Self::CanDelete => "can_delete",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(PermissionLevel::CanView < PermissionLevel::CanFavorite);
        assert!(PermissionLevel::CanFavorite < PermissionLevel::CanEdit);
        assert!(PermissionLevel::CanEdit < PermissionLevel::CanDelete);
    }

    #[test]
    fn test_only_view_is_view() {
        assert!(PermissionLevel::CanView.is_view());
        assert!(!PermissionLevel::CanFavorite.is_view());
        assert!(!PermissionLevel::CanEdit.is_view());
        assert!(!PermissionLevel::CanDelete.is_view());
    }
}
