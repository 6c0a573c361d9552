//! Repository items and their lifecycle fields

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::version::{VersionIdentifier, Versioned};

/// Maturity stage of a library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LibraryStatus {
    Draft,
    UnderReview,
    Final,
    Obsolete,
}

impl LibraryStatus {
    /// Status reached by a promotion, if any
    pub fn next(self) -> Option<Self> {
        match self {
            LibraryStatus::Draft => Some(LibraryStatus::UnderReview),
            LibraryStatus::UnderReview => Some(LibraryStatus::Final),
            LibraryStatus::Final => Some(LibraryStatus::Obsolete),
            LibraryStatus::Obsolete => None,
        }
    }

    /// Status reached by a demotion, if any
    pub fn previous(self) -> Option<Self> {
        match self {
            LibraryStatus::Draft => None,
            LibraryStatus::UnderReview => Some(LibraryStatus::Draft),
            LibraryStatus::Final => Some(LibraryStatus::UnderReview),
            LibraryStatus::Obsolete => Some(LibraryStatus::Final),
        }
    }

    /// Every status past draft carries a frozen checksum
    pub fn requires_checksum(self) -> bool {
        self != LibraryStatus::Draft
    }
}

impl fmt::Display for LibraryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LibraryStatus::Draft => "DRAFT",
            LibraryStatus::UnderReview => "UNDER_REVIEW",
            LibraryStatus::Final => "FINAL",
            LibraryStatus::Obsolete => "OBSOLETE",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for LibraryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "DRAFT" => Ok(LibraryStatus::Draft),
            "UNDER_REVIEW" => Ok(LibraryStatus::UnderReview),
            "FINAL" => Ok(LibraryStatus::Final),
            "OBSOLETE" => Ok(LibraryStatus::Obsolete),
            other => Err(format!("unknown library status: {}", other)),
        }
    }
}

/// Lock state of an item as seen by one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepositoryItemState {
    Unmanaged,
    ManagedUnlocked,
    ManagedWip,
    ManagedLockedByOther,
}

impl fmt::Display for RepositoryItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RepositoryItemState::Unmanaged => "UNMANAGED",
            RepositoryItemState::ManagedUnlocked => "MANAGED_UNLOCKED",
            RepositoryItemState::ManagedWip => "MANAGED_WIP",
            RepositoryItemState::ManagedLockedByOther => "MANAGED_LOCKED_BY_OTHER",
        };
        f.write_str(label)
    }
}

/// Durable identity of a repository item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub base_namespace: String,
    pub filename: String,
    pub version: VersionIdentifier,
}

impl ItemKey {
    pub fn new(
        base_namespace: impl Into<String>,
        filename: impl Into<String>,
        version: VersionIdentifier,
    ) -> Self {
        Self {
            base_namespace: base_namespace.into(),
            filename: filename.into(),
            version,
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.filename, self.base_namespace, self.version)
    }
}

/// A library file managed by the repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryItem {
    pub repository_id: String,
    pub namespace: String,
    pub base_namespace: String,
    pub filename: String,
    pub library_name: String,
    pub version: VersionIdentifier,
    pub version_scheme: String,
    pub status: LibraryStatus,
    /// User holding the checkout lock
    #[serde(default)]
    pub locked_by: Option<String>,
    /// Checksum frozen at the last promotion or non-draft commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl RepositoryItem {
    pub fn key(&self) -> ItemKey {
        ItemKey::new(&self.base_namespace, &self.filename, self.version.clone())
    }

    /// Lock state observed by `user`
    pub fn state_for(&self, user: &str) -> RepositoryItemState {
        match &self.locked_by {
            None => RepositoryItemState::ManagedUnlocked,
            Some(holder) if holder == user => RepositoryItemState::ManagedWip,
            Some(_) => RepositoryItemState::ManagedLockedByOther,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }
}

impl Versioned for RepositoryItem {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn base_namespace(&self) -> &str {
        &self.base_namespace
    }

    fn version(&self) -> &VersionIdentifier {
        &self.version
    }

    fn version_scheme(&self) -> &str {
        &self.version_scheme
    }
}

/// Result of re-verifying an item's frozen checksum against its content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "finding", rename_all = "snake_case")]
pub enum IntegrityReport {
    /// Draft items carry no checksum
    NotApplicable,
    Verified,
    /// Checksum is mandatory for the item's status but absent
    MissingChecksum,
    /// Content changed outside the repository
    Mismatch { expected: Checksum, actual: Checksum },
}

impl IntegrityReport {
    /// Whether the artifact should be flagged as suspect
    pub fn is_suspect(&self) -> bool {
        matches!(
            self,
            IntegrityReport::MissingChecksum | IntegrityReport::Mismatch { .. }
        )
    }
}
