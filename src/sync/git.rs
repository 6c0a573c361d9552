//! Git working copy backend (libgit2)

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use git2::build::CheckoutBuilder;
use git2::{Commit, ErrorCode, Index, IndexAddOption, Repository, Signature, Status, StatusOptions};
use tracing::debug;

use super::{BackendError, FileStatus, VersionControl};

type BackendResult<T> = std::result::Result<T, BackendError>;

/// Backing store over a non-bare git repository.
///
/// Git tracks files, not directories, so a directory counts as versioned once
/// any file below it is in the index and registering a bare directory is a
/// no-op.
pub struct GitBackend {
    root: PathBuf,
    repo: Mutex<Repository>,
    author_email: String,
}

impl GitBackend {
    /// Open the repository at `root`, initializing one if needed
    pub fn open_or_init(
        root: impl AsRef<Path>,
        author_email: impl Into<String>,
    ) -> BackendResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let root = root.canonicalize()?;

        let repo = match Repository::open(&root) {
            Ok(repo) => repo,
            Err(_) => Repository::init(&root)?,
        };
        if repo.is_bare() {
            return Err(BackendError::Rejected(format!(
                "{} is a bare repository",
                root.display()
            )));
        }

        Ok(Self {
            root,
            repo: Mutex::new(repo),
            author_email: author_email.into(),
        })
    }

    fn repo(&self) -> MutexGuard<'_, Repository> {
        self.repo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn relative(&self, path: &Path) -> BackendResult<PathBuf> {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .map_err(|_| BackendError::OutsideWorkingCopy(path.to_path_buf()))
    }

    /// Pathspec for a directory relative to the workdir
    fn pathspec(relative: &Path) -> String {
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn classify(status: Status) -> FileStatus {
        if status.is_index_new() {
            if status.is_wt_deleted() {
                return FileStatus::Deleted;
            }
            return FileStatus::Added;
        }
        if status.is_wt_new() {
            return FileStatus::Unversioned;
        }
        if status.is_wt_deleted() || status.is_index_deleted() {
            return FileStatus::Deleted;
        }
        if status.is_wt_modified()
            || status.is_index_modified()
            || status.is_wt_typechange()
            || status.is_index_typechange()
            || status.is_wt_renamed()
            || status.is_index_renamed()
        {
            return FileStatus::Modified;
        }
        FileStatus::Unchanged
    }

    fn head_commit(repo: &Repository) -> Option<Commit<'_>> {
        repo.head().ok().and_then(|head| head.peel_to_commit().ok())
    }

    fn stage_into_index(&self, index: &mut Index, files: &[PathBuf]) -> BackendResult<()> {
        for file in files {
            let relative = self.relative(file)?;
            if file.is_dir() {
                let spec = Self::pathspec(&relative);
                index.add_all([spec.as_str()], IndexAddOption::DEFAULT, None)?;
            } else if file.exists() {
                index.add_path(&relative)?;
            } else {
                match index.remove_path(&relative) {
                    Ok(()) => {}
                    Err(e) if e.code() == ErrorCode::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    fn write_commit(
        &self,
        repo: &Repository,
        index: &mut Index,
        files: &[PathBuf],
        message: &str,
        author: &str,
    ) -> BackendResult<git2::Oid> {
        self.stage_into_index(index, files)?;
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;
        let signature = Signature::now(author, &self.author_email)?;

        let parent = Self::head_commit(repo);
        let parents: Vec<&Commit> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        index.write()?;
        Ok(oid)
    }
}

impl VersionControl for GitBackend {
    fn root(&self) -> &Path {
        &self.root
    }

    fn is_versioned(&self, path: &Path) -> BackendResult<bool> {
        let relative = self.relative(path)?;
        if relative.as_os_str().is_empty() {
            return Ok(true);
        }
        let repo = self.repo();
        let index = repo.index()?;
        if path.is_dir() {
            Ok(index.iter().any(|entry| {
                let entry_path = String::from_utf8_lossy(&entry.path);
                Path::new(entry_path.as_ref()).starts_with(&relative)
            }))
        } else {
            Ok(index.get_path(&relative, 0).is_some())
        }
    }

    fn add(&self, path: &Path, recursive: bool) -> BackendResult<()> {
        let relative = self.relative(path)?;
        if path.is_dir() && !recursive {
            return Ok(());
        }
        let repo = self.repo();
        let mut index = repo.index()?;
        if path.is_dir() {
            let spec = Self::pathspec(&relative);
            index.add_all([spec.as_str()], IndexAddOption::DEFAULT, None)?;
        } else {
            index.add_path(&relative)?;
        }
        index.write()?;
        Ok(())
    }

    fn status(&self, path: &Path) -> BackendResult<FileStatus> {
        if path.is_dir() {
            return Ok(if self.is_versioned(path)? {
                FileStatus::Unchanged
            } else {
                FileStatus::Unversioned
            });
        }
        let relative = self.relative(path)?;
        let repo = self.repo();
        match repo.status_file(&relative) {
            Ok(status) => Ok(Self::classify(status)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(FileStatus::Unchanged),
            Err(e) => Err(e.into()),
        }
    }

    fn scan(&self) -> BackendResult<Vec<(PathBuf, FileStatus)>> {
        let repo = self.repo();
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        let statuses = repo.statuses(Some(&mut options))?;
        let mut pending = Vec::new();
        for entry in statuses.iter() {
            let Some(relative) = entry.path() else {
                debug!("skipping status entry with non UTF-8 path");
                continue;
            };
            let status = Self::classify(entry.status());
            if status.is_pending() {
                pending.push((self.root.join(relative), status));
            }
        }
        Ok(pending)
    }

    fn commit(
        &self,
        files: &[PathBuf],
        message: &str,
        author: &str,
    ) -> BackendResult<Option<String>> {
        let repo = self.repo();
        let mut index = repo.index()?;
        match self.write_commit(&repo, &mut index, files, message, author) {
            Ok(oid) => Ok(Some(oid.to_string())),
            Err(err) => {
                // Drop the half-staged in-memory index
                let _ = index.read(true);
                Err(err)
            }
        }
    }

    fn revert(&self, files: &[PathBuf]) -> BackendResult<()> {
        let relative: Vec<PathBuf> = files
            .iter()
            .map(|f| self.relative(f))
            .collect::<BackendResult<_>>()?;
        let repo = self.repo();

        let Some(head) = Self::head_commit(&repo) else {
            // Nothing committed yet: only index registrations can be undone
            let mut index = repo.index()?;
            for path in &relative {
                let _ = index.remove_path(path);
            }
            index.write()?;
            return Ok(());
        };

        let tree = head.tree()?;
        let in_head: Vec<&PathBuf> = relative
            .iter()
            .filter(|path| tree.get_path(path).is_ok())
            .collect();

        repo.reset_default(Some(head.as_object()), relative.iter().map(PathBuf::as_path))?;

        if !in_head.is_empty() {
            let mut checkout = CheckoutBuilder::new();
            checkout.force();
            for path in in_head {
                checkout.path(path.as_path());
            }
            repo.checkout_head(Some(&mut checkout))?;
        }
        Ok(())
    }

    fn update_to_head(&self) -> BackendResult<()> {
        let repo = self.repo();
        if Self::head_commit(&repo).is_none() {
            return Ok(());
        }
        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        repo.checkout_head(Some(&mut checkout))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_status_lifecycle() {
        let dir = tempdir().unwrap();
        let backend = GitBackend::open_or_init(dir.path(), "test@example.org").unwrap();
        let file = backend.root().join("pkg/lib.otm");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"one").unwrap();

        assert_eq!(backend.status(&file).unwrap(), FileStatus::Unversioned);
        assert!(!backend.is_versioned(file.parent().unwrap()).unwrap());

        backend.add(&file, false).unwrap();
        assert_eq!(backend.status(&file).unwrap(), FileStatus::Added);

        let revision = backend.commit(&[file.clone()], "add", "alice").unwrap();
        assert!(revision.is_some());
        assert_eq!(backend.status(&file).unwrap(), FileStatus::Unchanged);
        assert!(backend.is_versioned(file.parent().unwrap()).unwrap());

        fs::write(&file, b"two").unwrap();
        assert_eq!(backend.status(&file).unwrap(), FileStatus::Modified);

        backend.revert(&[file.clone()]).unwrap();
        assert_eq!(fs::read(&file).unwrap(), b"one");
    }

    #[test]
    fn test_commit_records_deletions() {
        let dir = tempdir().unwrap();
        let backend = GitBackend::open_or_init(dir.path(), "test@example.org").unwrap();
        let file = backend.root().join("lib.otm");
        fs::write(&file, b"one").unwrap();
        backend.commit(&[file.clone()], "add", "alice").unwrap();

        fs::remove_file(&file).unwrap();
        assert_eq!(backend.status(&file).unwrap(), FileStatus::Deleted);
        backend.commit(&[file.clone()], "delete", "alice").unwrap();
        assert_eq!(backend.status(&file).unwrap(), FileStatus::Unchanged);
        assert!(backend.scan().unwrap().is_empty());
    }

    #[test]
    fn test_scan_reports_untracked_files() {
        let dir = tempdir().unwrap();
        let backend = GitBackend::open_or_init(dir.path(), "test@example.org").unwrap();
        let file = backend.root().join("a/b/c.otm");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"x").unwrap();

        let pending = backend.scan().unwrap();
        assert_eq!(pending, vec![(file, FileStatus::Unversioned)]);
    }

    #[test]
    fn test_revert_unregisters_added_file() {
        let dir = tempdir().unwrap();
        let backend = GitBackend::open_or_init(dir.path(), "test@example.org").unwrap();
        let seed = backend.root().join("seed.otm");
        fs::write(&seed, b"seed").unwrap();
        backend.commit(&[seed], "seed", "alice").unwrap();

        let file = backend.root().join("new.otm");
        fs::write(&file, b"x").unwrap();
        backend.add(&file, false).unwrap();
        backend.revert(&[file.clone()]).unwrap();
        assert_eq!(backend.status(&file).unwrap(), FileStatus::Unversioned);
    }
}
