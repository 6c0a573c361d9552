//! Change-set synchronization with a backing version-control system
//!
//! Every accepted repository mutation is recorded in the backing store as one
//! atomic commit, and every rejected mutation can be rolled back. The working
//! copy is shared by all requests, so commits and rollbacks pass through a
//! single [`CommitGate`]; building a [`ChangeSet`] is a read-only status scan
//! that each request performs on its own value.
//!
//! ## Backends
//!
//! - [`GitBackend`]: libgit2 working copy
//! - [`LocalBackend`]: plain directory, no history
//! - [`MockBackend`]: in-memory history with failure injection

mod gate;
pub mod git;
pub mod local;
pub mod mock;

pub use gate::{CommitGate, GateGuard};
pub use git::GitBackend;
pub use local::LocalBackend;
pub use mock::MockBackend;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::SyncConfig;
use crate::error::{RepositoryError, Result};

/// Commit message used for the startup scan
pub const INITIALIZATION_MESSAGE: &str =
    "Repository initialization: folding in out-of-band changes";

/// Author recorded on system-generated commits
pub const SYSTEM_AUTHOR: &str = "repository-system";

/// Errors raised by a backing store implementation
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path {0} is outside the working copy")]
    OutsideWorkingCopy(PathBuf),

    #[error("Backing store rejected the operation: {0}")]
    Rejected(String),
}

/// Status of a path relative to the last committed revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Unchanged,
    Modified,
    /// Registered with the backing store but never committed
    Added,
    Deleted,
    /// Present on disk, unknown to the backing store
    Unversioned,
}

impl FileStatus {
    /// Whether a commit containing this path would change the backing store
    pub fn is_pending(self) -> bool {
        self != FileStatus::Unchanged
    }
}

/// Operations the synchronizer needs from a backing version-control system.
///
/// All paths are absolute and lie under [`root`](Self::root).
pub trait VersionControl: Send + Sync {
    fn root(&self) -> &Path;

    fn is_versioned(&self, path: &Path) -> std::result::Result<bool, BackendError>;

    /// Register `path`; directories are registered with their contents when
    /// `recursive` is set
    fn add(&self, path: &Path, recursive: bool) -> std::result::Result<(), BackendError>;

    fn status(&self, path: &Path) -> std::result::Result<FileStatus, BackendError>;

    /// Every path under the root with a pending status
    fn scan(&self) -> std::result::Result<Vec<(PathBuf, FileStatus)>, BackendError>;

    /// Record `files` as one atomic revision. Returns the revision id when
    /// the store keeps history.
    fn commit(
        &self,
        files: &[PathBuf],
        message: &str,
        author: &str,
    ) -> std::result::Result<Option<String>, BackendError>;

    /// Restore `files` to their last committed state
    fn revert(&self, files: &[PathBuf]) -> std::result::Result<(), BackendError>;

    fn update_to_head(&self) -> std::result::Result<(), BackendError>;
}

/// A path that could not be classified while building a change set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPath {
    pub path: PathBuf,
    pub reason: String,
}

/// Pending mutation of a single repository root.
///
/// Built by one request through [`ChangeSetSynchronizer::stage`] and consumed
/// by commit or rollback.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    root: PathBuf,
    files: BTreeMap<PathBuf, FileStatus>,
    unversioned_ancestors: BTreeSet<PathBuf>,
    skipped: Vec<SkippedPath>,
}

impl ChangeSet {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            files: BTreeMap::new(),
            unversioned_ancestors: BTreeSet::new(),
            skipped: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Staged paths and the status observed when they were staged
    pub fn files(&self) -> impl Iterator<Item = (&Path, FileStatus)> {
        self.files.iter().map(|(path, status)| (path.as_path(), *status))
    }

    pub fn status_of(&self, path: &Path) -> Option<FileStatus> {
        self.files.get(path).copied()
    }

    /// Directories that must be registered before the files can be committed
    pub fn unversioned_ancestors(&self) -> impl Iterator<Item = &Path> {
        self.unversioned_ancestors.iter().map(PathBuf::as_path)
    }

    pub fn skipped(&self) -> &[SkippedPath] {
        &self.skipped
    }

    /// Number of staged paths with a pending status
    pub fn pending_len(&self) -> usize {
        self.files.values().filter(|status| status.is_pending()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_len() == 0
    }
}

/// Result of [`ChangeSetSynchronizer::commit_change_set`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Nothing pending; the backing store was not touched
    Empty,
    Committed {
        revision: Option<String>,
        files: Vec<PathBuf>,
    },
}

/// Result of [`ChangeSetSynchronizer::rollback_change_set`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub reverted: Vec<PathBuf>,
    /// Never-committed files deleted from disk
    pub removed: Vec<PathBuf>,
}

/// Availability of the repository's write path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RepositoryHealth {
    Available,
    /// Startup synchronization failed; reads are still served
    Degraded { reason: String },
}

impl fmt::Display for RepositoryHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryHealth::Available => f.write_str("available"),
            RepositoryHealth::Degraded { reason } => write!(f, "degraded ({})", reason),
        }
    }
}

/// Reconciles working-copy mutations with the backing store.
///
/// Share one instance per repository root (`Arc<ChangeSetSynchronizer>`).
pub struct ChangeSetSynchronizer {
    backend: Arc<dyn VersionControl>,
    gate: CommitGate,
    health: RwLock<RepositoryHealth>,
    strict_registration: bool,
}

impl ChangeSetSynchronizer {
    pub fn new(backend: Arc<dyn VersionControl>, gate: CommitGate, config: &SyncConfig) -> Self {
        Self {
            backend,
            gate,
            health: RwLock::new(RepositoryHealth::Available),
            strict_registration: config.strict_registration,
        }
    }

    pub fn root(&self) -> &Path {
        self.backend.root()
    }

    pub fn backend(&self) -> &Arc<dyn VersionControl> {
        &self.backend
    }

    pub fn health(&self) -> RepositoryHealth {
        self.health
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_available(&self) -> bool {
        self.health() == RepositoryHealth::Available
    }

    fn set_health(&self, health: RepositoryHealth) {
        *self.health.write().unwrap_or_else(PoisonError::into_inner) = health;
    }

    /// Empty change set bound to this synchronizer's root
    pub fn change_set(&self) -> ChangeSet {
        ChangeSet::new(self.root().to_path_buf())
    }

    fn check_root(&self, change_set: &ChangeSet) -> Result<()> {
        if change_set.root != self.root() {
            return Err(RepositoryError::OutsideRepository {
                path: change_set.root.clone(),
                root: self.root().to_path_buf(),
            });
        }
        Ok(())
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root().join(path)
        };
        if !absolute.starts_with(self.root()) || absolute == self.root() {
            return Err(RepositoryError::OutsideRepository {
                path: absolute,
                root: self.root().to_path_buf(),
            });
        }
        Ok(absolute)
    }

    /// Classify `path` (recursively for directories) into `change_set`.
    ///
    /// Ancestors unknown to the backing store are recorded for registration.
    /// A path whose status cannot be read is logged and skipped.
    pub fn stage(&self, change_set: &mut ChangeSet, path: &Path) -> Result<()> {
        self.check_root(change_set)?;
        let path = self.resolve(path)?;

        if path.is_dir() {
            for entry in WalkDir::new(&path)
                .into_iter()
                .filter_entry(|e| e.file_name() != ".git")
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                self.stage_file(change_set, entry.path());
            }
            // Deleted files no longer show up on disk
            match self.backend.scan() {
                Ok(pending) => {
                    for (pending_path, status) in pending {
                        if status == FileStatus::Deleted && pending_path.starts_with(&path) {
                            self.stage_file(change_set, &pending_path);
                        }
                    }
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "unable to scan for deleted files");
                    change_set.skipped.push(SkippedPath {
                        path: path.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        } else {
            self.stage_file(change_set, &path);
        }
        Ok(())
    }

    /// Stage every pending path under the root
    pub fn stage_all(&self, change_set: &mut ChangeSet) -> Result<()> {
        self.check_root(change_set)?;
        let pending = self
            .backend
            .scan()
            .map_err(|e| RepositoryError::backend("scan", e))?;
        for (path, status) in pending {
            self.record_ancestors(change_set, &path);
            change_set.files.insert(path, status);
        }
        Ok(())
    }

    fn stage_file(&self, change_set: &mut ChangeSet, path: &Path) {
        self.record_ancestors(change_set, path);
        match self.backend.status(path) {
            Ok(status) => {
                change_set.files.insert(path.to_path_buf(), status);
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping file with unknown status");
                change_set.skipped.push(SkippedPath {
                    path: path.to_path_buf(),
                    reason: err.to_string(),
                });
            }
        }
    }

    /// Walk up from `path` until a versioned directory is found
    fn record_ancestors(&self, change_set: &mut ChangeSet, path: &Path) {
        let root = self.root();
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == root || !dir.starts_with(root) {
                break;
            }
            if change_set.unversioned_ancestors.contains(dir) {
                current = dir.parent();
                continue;
            }
            match self.backend.is_versioned(dir) {
                Ok(true) => break,
                Ok(false) => {
                    change_set.unversioned_ancestors.insert(dir.to_path_buf());
                }
                Err(err) => {
                    warn!(
                        path = %dir.display(),
                        error = %err,
                        "unable to check ancestor directory"
                    );
                    change_set.skipped.push(SkippedPath {
                        path: dir.to_path_buf(),
                        reason: err.to_string(),
                    });
                    break;
                }
            }
            current = dir.parent();
        }
    }

    /// Commit every pending path of `change_set` as one revision.
    ///
    /// Blocks on the commit gate. An empty change set is a no-op.
    pub fn commit_change_set(
        &self,
        change_set: ChangeSet,
        message: &str,
        author: &str,
    ) -> Result<CommitOutcome> {
        self.check_root(&change_set)?;
        let _guard = self.gate.acquire()?;
        self.commit_locked(change_set, message, author)
    }

    fn commit_locked(
        &self,
        change_set: ChangeSet,
        message: &str,
        author: &str,
    ) -> Result<CommitOutcome> {
        // BTreeSet order puts parents before children
        for dir in &change_set.unversioned_ancestors {
            if let Err(err) = self.backend.add(dir, false) {
                if self.strict_registration {
                    return Err(RepositoryError::backend("register", err));
                }
                warn!(path = %dir.display(), error = %err, "failed to register ancestor directory");
            }
        }

        let mut files = Vec::new();
        for (path, staged) in change_set.files {
            let status = match self.backend.status(&path) {
                Ok(current) => current,
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "using staged status");
                    staged
                }
            };
            match status {
                FileStatus::Unchanged => continue,
                FileStatus::Unversioned => {
                    self.backend
                        .add(&path, path.is_dir())
                        .map_err(|e| RepositoryError::backend("register", e))?;
                }
                FileStatus::Modified | FileStatus::Added | FileStatus::Deleted => {}
            }
            files.push(path);
        }

        if files.is_empty() {
            debug!("change set is empty, nothing to commit");
            return Ok(CommitOutcome::Empty);
        }

        let revision = self
            .backend
            .commit(&files, message, author)
            .map_err(|e| RepositoryError::backend("commit", e))?;
        info!(
            files = files.len(),
            revision = revision.as_deref().unwrap_or("-"),
            author,
            "committed change set"
        );
        Ok(CommitOutcome::Committed { revision, files })
    }

    /// Restore every staged path to its last committed state.
    ///
    /// Files that were never committed cannot be reverted and are deleted.
    pub fn rollback_change_set(&self, change_set: ChangeSet) -> Result<RollbackOutcome> {
        self.check_root(&change_set)?;
        let _guard = self.gate.acquire()?;

        let mut outcome = RollbackOutcome::default();
        let mut unregister = Vec::new();
        for (path, staged) in &change_set.files {
            let status = self.backend.status(path).unwrap_or(*staged);
            match status {
                FileStatus::Unchanged => {}
                FileStatus::Modified | FileStatus::Deleted => outcome.reverted.push(path.clone()),
                FileStatus::Added => {
                    unregister.push(path.clone());
                    outcome.removed.push(path.clone());
                }
                FileStatus::Unversioned => outcome.removed.push(path.clone()),
            }
        }

        let mut revert: Vec<PathBuf> = outcome.reverted.clone();
        revert.extend(unregister);
        if !revert.is_empty() {
            self.backend
                .revert(&revert)
                .map_err(|e| RepositoryError::backend("revert", e))?;
        }

        for path in &outcome.removed {
            if path.is_dir() {
                fs::remove_dir_all(path)?;
            } else if path.exists() {
                fs::remove_file(path)?;
            }
        }
        // Only empty directories go; anything else is left in place
        for dir in change_set.unversioned_ancestors.iter().rev() {
            let _ = fs::remove_dir(dir);
        }

        info!(
            reverted = outcome.reverted.len(),
            removed = outcome.removed.len(),
            "rolled back change set"
        );
        Ok(outcome)
    }

    /// Fold out-of-band changes into one system commit and update to head.
    ///
    /// Failure marks the repository degraded instead of aborting startup.
    pub fn initialize_repository(&self) -> Result<CommitOutcome> {
        let result = self.initialize_locked();
        match &result {
            Ok(outcome) => {
                self.set_health(RepositoryHealth::Available);
                info!(root = %self.root().display(), ?outcome, "repository initialized");
            }
            Err(err) => {
                error!(
                    root = %self.root().display(),
                    error = %err,
                    "repository initialization failed"
                );
                self.set_health(RepositoryHealth::Degraded {
                    reason: err.to_string(),
                });
            }
        }
        result
    }

    fn initialize_locked(&self) -> Result<CommitOutcome> {
        let mut change_set = self.change_set();
        self.stage_all(&mut change_set)?;

        let _guard = self.gate.acquire()?;
        let outcome = self.commit_locked(change_set, INITIALIZATION_MESSAGE, SYSTEM_AUTHOR)?;
        self.backend
            .update_to_head()
            .map_err(|e| RepositoryError::backend("update", e))?;
        Ok(outcome)
    }
}

impl fmt::Debug for ChangeSetSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSetSynchronizer")
            .field("root", &self.root())
            .field("health", &self.health())
            .field("strict_registration", &self.strict_registration)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn synchronizer(backend: Arc<MockBackend>, strict: bool) -> ChangeSetSynchronizer {
        ChangeSetSynchronizer::new(
            backend,
            CommitGate::new(None),
            &SyncConfig {
                strict_registration: strict,
            },
        )
    }

    #[test]
    fn test_empty_change_set_is_noop() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(MockBackend::new(dir.path()));
        let sync = synchronizer(backend.clone(), false);

        let outcome = sync.commit_change_set(sync.change_set(), "noop", "alice").unwrap();
        assert_eq!(outcome, CommitOutcome::Empty);
        assert!(backend.commits().is_empty());
    }

    #[test]
    fn test_new_file_registers_ancestors_and_commits() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(MockBackend::new(dir.path()));
        let sync = synchronizer(backend.clone(), false);

        let file = backend.root().join("org/example/Travel/Travel_1_0_0.otm");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"v1").unwrap();

        let mut change_set = sync.change_set();
        sync.stage(&mut change_set, &file).unwrap();
        assert_eq!(change_set.status_of(&file), Some(FileStatus::Unversioned));
        assert_eq!(change_set.unversioned_ancestors().count(), 3);

        let outcome = sync.commit_change_set(change_set, "publish", "alice").unwrap();
        assert!(matches!(
            outcome,
            CommitOutcome::Committed { ref files, .. } if files == &vec![file.clone()]
        ));
        assert_eq!(backend.committed_content(&file), Some(b"v1".to_vec()));
        assert_eq!(backend.status(&file).unwrap(), FileStatus::Unchanged);
    }

    #[test]
    fn test_failed_commit_leaves_store_untouched() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(MockBackend::new(dir.path()));
        let sync = synchronizer(backend.clone(), false);

        let file = backend.root().join("lib.otm");
        fs::write(&file, b"one").unwrap();
        let mut cs = sync.change_set();
        sync.stage(&mut cs, &file).unwrap();
        sync.commit_change_set(cs, "first", "alice").unwrap();

        fs::write(&file, b"two").unwrap();
        backend.fail_next_commit();
        let mut cs = sync.change_set();
        sync.stage(&mut cs, &file).unwrap();
        let err = sync.commit_change_set(cs, "second", "alice").unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(backend.committed_content(&file), Some(b"one".to_vec()));
    }

    #[test]
    fn test_rollback_reverts_modified_and_removes_new() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(MockBackend::new(dir.path()));
        let sync = synchronizer(backend.clone(), false);

        let existing = backend.root().join("existing.otm");
        fs::write(&existing, b"committed").unwrap();
        let mut cs = sync.change_set();
        sync.stage(&mut cs, &existing).unwrap();
        sync.commit_change_set(cs, "init", "alice").unwrap();

        fs::write(&existing, b"edited").unwrap();
        let fresh = backend.root().join("nested/fresh.otm");
        fs::create_dir_all(fresh.parent().unwrap()).unwrap();
        fs::write(&fresh, b"new").unwrap();

        let mut cs = sync.change_set();
        sync.stage(&mut cs, &existing).unwrap();
        sync.stage(&mut cs, &fresh).unwrap();
        let outcome = sync.rollback_change_set(cs).unwrap();

        assert_eq!(outcome.reverted, vec![existing.clone()]);
        assert_eq!(outcome.removed, vec![fresh.clone()]);
        assert_eq!(fs::read(&existing).unwrap(), b"committed");
        assert!(!fresh.exists());
        assert!(!fresh.parent().unwrap().exists());
    }

    #[test]
    fn test_stage_rejects_paths_outside_root() {
        let dir = tempdir().unwrap();
        let other = tempdir().unwrap();
        let backend = Arc::new(MockBackend::new(dir.path()));
        let sync = synchronizer(backend, false);

        let mut cs = sync.change_set();
        let err = sync.stage(&mut cs, &other.path().join("x.otm")).unwrap_err();
        assert!(matches!(err, RepositoryError::OutsideRepository { .. }));
    }

    #[test]
    fn test_change_set_from_other_root_is_rejected() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let sync_a = synchronizer(Arc::new(MockBackend::new(a.path())), false);
        let sync_b = synchronizer(Arc::new(MockBackend::new(b.path())), false);

        let err = sync_b
            .commit_change_set(sync_a.change_set(), "x", "alice")
            .unwrap_err();
        assert!(matches!(err, RepositoryError::OutsideRepository { .. }));
    }

    #[test]
    fn test_unreadable_status_is_skipped() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(MockBackend::new(dir.path()));
        let sync = synchronizer(backend.clone(), false);

        let good = backend.root().join("good.otm");
        let bad = backend.root().join("bad.otm");
        fs::write(&good, b"g").unwrap();
        fs::write(&bad, b"b").unwrap();
        backend.fail_status_for(&bad);

        let mut cs = sync.change_set();
        sync.stage(&mut cs, &good).unwrap();
        sync.stage(&mut cs, &bad).unwrap();
        assert_eq!(cs.skipped().len(), 1);
        assert_eq!(cs.pending_len(), 1);
    }

    #[test]
    fn test_registration_failure_policy() {
        let dir = tempdir().unwrap();
        let file_dir = dir.path().canonicalize().unwrap().join("pkg");
        fs::create_dir_all(&file_dir).unwrap();
        let file = file_dir.join("lib.otm");
        fs::write(&file, b"x").unwrap();

        let lenient_backend = Arc::new(MockBackend::new(dir.path()));
        lenient_backend.fail_register_for(&file_dir);
        let lenient = synchronizer(lenient_backend.clone(), false);
        let mut cs = lenient.change_set();
        lenient.stage(&mut cs, &file).unwrap();
        assert!(lenient.commit_change_set(cs, "x", "alice").is_ok());

        let strict_backend = Arc::new(MockBackend::new(dir.path()));
        strict_backend.fail_register_for(&file_dir);
        let strict = synchronizer(strict_backend, true);
        let mut cs = strict.change_set();
        strict.stage(&mut cs, &file).unwrap();
        assert!(strict.commit_change_set(cs, "x", "alice").is_err());
    }

    #[test]
    fn test_initialization_folds_out_of_band_files() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(MockBackend::new(dir.path()));
        let sync = synchronizer(backend.clone(), false);

        let dropped = backend.root().join("dropped/external.otm");
        fs::create_dir_all(dropped.parent().unwrap()).unwrap();
        fs::write(&dropped, b"external").unwrap();

        sync.initialize_repository().unwrap();
        assert!(sync.is_available());
        let commits = backend.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].author, SYSTEM_AUTHOR);
        assert_eq!(commits[0].message, INITIALIZATION_MESSAGE);
    }

    #[test]
    fn test_initialization_failure_degrades_health() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(MockBackend::new(dir.path()));
        fs::write(backend.root().join("x.otm"), b"x").unwrap();
        backend.fail_next_commit();
        let sync = synchronizer(backend, false);

        assert!(sync.initialize_repository().is_err());
        assert!(matches!(sync.health(), RepositoryHealth::Degraded { .. }));
    }

    #[test]
    fn test_commits_are_serialized() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(MockBackend::new(dir.path()));
        backend.set_commit_delay(Duration::from_millis(20));
        let sync = Arc::new(synchronizer(backend.clone(), false));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let sync = Arc::clone(&sync);
                let path = backend.root().join(format!("lib{}.otm", i));
                std::thread::spawn(move || {
                    fs::write(&path, b"content").unwrap();
                    let mut cs = sync.change_set();
                    sync.stage(&mut cs, &path).unwrap();
                    sync.commit_change_set(cs, "parallel", "worker").unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(backend.commits().len(), 4);
        assert_eq!(backend.max_concurrent_commits(), 1);
    }
}
