//! Error types for the model repository

use std::path::PathBuf;

use thiserror::Error;

use crate::sync::BackendError;

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Repository errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Repository item not found: {item}")]
    NotFound { item: String },

    #[error("Version conflict for {item}: {detail}")]
    VersionConflict { item: String, detail: String },

    #[error("Item {item} is locked by {holder}")]
    LockConflict { item: String, holder: String },

    #[error("User {user} does not hold the lock on {item}")]
    NotLockOwner { item: String, user: String, holder: Option<String> },

    #[error("Cannot {operation} {item} while it is {current}")]
    InvalidTransition {
        item: String,
        operation: &'static str,
        current: String,
    },

    #[error("User {user} is not permitted to {operation}")]
    Unauthorized { user: String, operation: &'static str },

    #[error("Invalid namespace for scheme {scheme}: {namespace}")]
    InvalidNamespace { scheme: String, namespace: String },

    #[error("Unknown version scheme: {0}")]
    UnknownScheme(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Invalid library filename: {0}")]
    InvalidFilename(String),

    #[error("Record {path} belongs to {found}, expected {expected}")]
    RecordMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Path {path} is outside repository root {root}")]
    OutsideRepository { path: PathBuf, root: PathBuf },

    #[error("Backing store failure during {operation}: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Timed out after {waited_ms}ms waiting for the commit gate")]
    CommitTimeout { waited_ms: u64 },

    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid namespace pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Semver error: {0}")]
    Semver(#[from] semver::Error),
}

impl RepositoryError {
    pub(crate) fn backend(operation: &'static str, source: impl Into<BackendError>) -> Self {
        RepositoryError::Backend {
            operation,
            source: source.into(),
        }
    }

    /// Conflicts are caused by another party's state and can be retried
    /// against a different target or after the other party acts.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RepositoryError::VersionConflict { .. }
                | RepositoryError::LockConflict { .. }
                | RepositoryError::NotLockOwner { .. }
                | RepositoryError::InvalidTransition { .. }
        )
    }

    /// Transport and contention failures that leave the item untouched.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RepositoryError::Backend { .. } | RepositoryError::CommitTimeout { .. }
        )
    }
}
