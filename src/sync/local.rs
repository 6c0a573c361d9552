//! Plain-directory backend with no version history

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use super::{BackendError, FileStatus, VersionControl};

/// Writes go straight to disk and are never recorded anywhere else.
///
/// With nothing to compare against, every existing file reports
/// [`FileStatus::Modified`] and every missing one [`FileStatus::Deleted`], so
/// change sets always carry their paths. Reverting is impossible and is a
/// no-op.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.canonicalize()?,
        })
    }
}

impl VersionControl for LocalBackend {
    fn root(&self) -> &Path {
        &self.root
    }

    fn is_versioned(&self, _path: &Path) -> Result<bool, BackendError> {
        Ok(true)
    }

    fn add(&self, _path: &Path, _recursive: bool) -> Result<(), BackendError> {
        Ok(())
    }

    fn status(&self, path: &Path) -> Result<FileStatus, BackendError> {
        if !path.starts_with(&self.root) {
            return Err(BackendError::OutsideWorkingCopy(path.to_path_buf()));
        }
        Ok(if path.exists() {
            FileStatus::Modified
        } else {
            FileStatus::Deleted
        })
    }

    fn scan(&self) -> Result<Vec<(PathBuf, FileStatus)>, BackendError> {
        Ok(WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| (e.into_path(), FileStatus::Modified))
            .collect())
    }

    fn commit(
        &self,
        files: &[PathBuf],
        message: &str,
        author: &str,
    ) -> Result<Option<String>, BackendError> {
        debug!(files = files.len(), message, author, "local backend commit");
        Ok(None)
    }

    fn revert(&self, files: &[PathBuf]) -> Result<(), BackendError> {
        debug!(files = files.len(), "local backend cannot revert");
        Ok(())
    }

    fn update_to_head(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
