//! In-memory backing store for tests

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use walkdir::WalkDir;

use super::{BackendError, FileStatus, VersionControl};

/// A commit recorded by [`MockBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCommit {
    pub revision: String,
    pub message: String,
    pub author: String,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Default)]
struct MockState {
    /// Content as of the last commit
    committed: HashMap<PathBuf, Vec<u8>>,
    /// Registered but not yet committed
    added: HashSet<PathBuf>,
    versioned_dirs: HashSet<PathBuf>,
    commits: Vec<MockCommit>,
    failing_status: HashSet<PathBuf>,
    failing_register: HashSet<PathBuf>,
    commit_delay: Option<Duration>,
}

/// Backing store keeping committed content in memory.
///
/// Supports failure injection for commits, status reads and registration.
#[derive(Debug)]
pub struct MockBackend {
    root: PathBuf,
    state: Mutex<MockState>,
    fail_next_commit: AtomicBool,
    active_commits: AtomicUsize,
    max_concurrent_commits: AtomicUsize,
}

impl MockBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        Self {
            root,
            state: Mutex::new(MockState::default()),
            fail_next_commit: AtomicBool::new(false),
            active_commits: AtomicUsize::new(0),
            max_concurrent_commits: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next commit fail with [`BackendError::Rejected`]
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_status_for(&self, path: &Path) {
        self.state().failing_status.insert(path.to_path_buf());
    }

    pub fn fail_register_for(&self, path: &Path) {
        self.state().failing_register.insert(path.to_path_buf());
    }

    /// Hold every commit for `delay` to widen race windows
    pub fn set_commit_delay(&self, delay: Duration) {
        self.state().commit_delay = Some(delay);
    }

    pub fn commits(&self) -> Vec<MockCommit> {
        self.state().commits.clone()
    }

    pub fn committed_content(&self, path: &Path) -> Option<Vec<u8>> {
        self.state().committed.get(path).cloned()
    }

    /// Highest number of commits observed running at once
    pub fn max_concurrent_commits(&self) -> usize {
        self.max_concurrent_commits.load(Ordering::SeqCst)
    }

    fn classify(state: &MockState, path: &Path) -> FileStatus {
        let on_disk = fs::read(path).ok();
        match (state.committed.get(path), on_disk) {
            (Some(_), None) => FileStatus::Deleted,
            (Some(committed), Some(current)) if *committed != current => FileStatus::Modified,
            (Some(_), Some(_)) => FileStatus::Unchanged,
            (None, Some(_)) if state.added.contains(path) => FileStatus::Added,
            (None, Some(_)) => FileStatus::Unversioned,
            (None, None) => FileStatus::Unchanged,
        }
    }
}

impl VersionControl for MockBackend {
    fn root(&self) -> &Path {
        &self.root
    }

    fn is_versioned(&self, path: &Path) -> Result<bool, BackendError> {
        if path == self.root {
            return Ok(true);
        }
        let state = self.state();
        Ok(state.versioned_dirs.contains(path)
            || state.added.contains(path)
            || state.committed.keys().any(|file| file.starts_with(path)))
    }

    fn add(&self, path: &Path, recursive: bool) -> Result<(), BackendError> {
        let mut state = self.state();
        if state.failing_register.contains(path) {
            return Err(BackendError::Rejected(format!("cannot register {}", path.display())));
        }
        if path.is_dir() {
            state.versioned_dirs.insert(path.to_path_buf());
            if recursive {
                for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
                    if entry.file_type().is_dir() {
                        state.versioned_dirs.insert(entry.into_path());
                    } else {
                        state.added.insert(entry.into_path());
                    }
                }
            }
        } else {
            state.added.insert(path.to_path_buf());
        }
        Ok(())
    }

    fn status(&self, path: &Path) -> Result<FileStatus, BackendError> {
        let state = self.state();
        if state.failing_status.contains(path) {
            return Err(BackendError::Rejected(format!(
                "status unavailable for {}",
                path.display()
            )));
        }
        Ok(Self::classify(&state, path))
    }

    fn scan(&self) -> Result<Vec<(PathBuf, FileStatus)>, BackendError> {
        let state = self.state();
        let mut paths: HashSet<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        paths.extend(state.committed.keys().cloned());

        let mut pending: Vec<(PathBuf, FileStatus)> = paths
            .into_iter()
            .map(|path| {
                let status = Self::classify(&state, &path);
                (path, status)
            })
            .filter(|(_, status)| status.is_pending())
            .collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(pending)
    }

    fn commit(
        &self,
        files: &[PathBuf],
        message: &str,
        author: &str,
    ) -> Result<Option<String>, BackendError> {
        let active = self.active_commits.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_commits.fetch_max(active, Ordering::SeqCst);

        let delay = self.state().commit_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let result = if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            Err(BackendError::Rejected("injected commit failure".to_string()))
        } else {
            let mut state = self.state();
            for file in files {
                match fs::read(file) {
                    Ok(content) => {
                        state.committed.insert(file.clone(), content);
                    }
                    Err(_) => {
                        state.committed.remove(file);
                    }
                }
                state.added.remove(file);
            }
            let revision = format!("r{}", state.commits.len() + 1);
            state.commits.push(MockCommit {
                revision: revision.clone(),
                message: message.to_string(),
                author: author.to_string(),
                files: files.to_vec(),
            });
            Ok(Some(revision))
        };

        self.active_commits.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn revert(&self, files: &[PathBuf]) -> Result<(), BackendError> {
        let mut state = self.state();
        for file in files {
            state.added.remove(file);
            if let Some(content) = state.committed.get(file) {
                if let Some(parent) = file.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(file, content)?;
            }
        }
        Ok(())
    }

    fn update_to_head(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
