//! Repository item lifecycle and locking
//!
//! The [`RepositoryManager`] owns the item records of one repository root and
//! drives every content change through the shared [`ChangeSetSynchronizer`].
//!
//! ## Transitions
//!
//! | Operation | Requires | Effect |
//! |-----------|----------|--------|
//! | publish | no item at (base namespace, filename) | content + record committed |
//! | lock | unlocked, not obsolete | record rewritten |
//! | stage_content / commit / revert | caller holds the lock | content committed or restored |
//! | unlock | holder or administrator | pending edits committed or discarded |
//! | promote | unlocked | status advanced, checksum frozen |
//! | demote | administrator, unlocked | status lowered, checksum kept unless back to draft |
//! | delete | unlocked | content + record removed in one commit |

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::checksum::Checksum;
use crate::config::{BackendKind, RepositoryConfig};
use crate::error::{RepositoryError, Result};
use crate::events::{RepositoryEvent, RepositoryListener};
use crate::item::{IntegrityReport, ItemKey, LibraryStatus, RepositoryItem, RepositoryItemState};
use crate::metadata::MetadataStore;
use crate::sync::{
    ChangeSetSynchronizer, CommitGate, CommitOutcome, GitBackend, LocalBackend, RepositoryHealth,
    VersionControl,
};
use crate::version::{VersionComparator, VersionSchemeRegistry};

/// Content and naming of a library to publish
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub namespace: String,
    pub library_name: String,
    /// Defaults to the scheme's versioned file name
    pub filename: Option<String>,
    /// Defaults to the configured scheme
    pub version_scheme: Option<String>,
    pub content: Vec<u8>,
}

impl PublishRequest {
    pub fn new(
        namespace: impl Into<String>,
        library_name: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            library_name: library_name.into(),
            filename: None,
            version_scheme: None,
            content: content.into(),
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.version_scheme = Some(scheme.into());
        self
    }
}

/// Marks an item as busy with a backing-store operation until dropped
struct InFlight<'a> {
    records: &'a Mutex<HashSet<ItemKey>>,
    key: ItemKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Lifecycle and locking of repository items
pub struct RepositoryManager {
    config: RepositoryConfig,
    synchronizer: Arc<ChangeSetSynchronizer>,
    store: MetadataStore,
    schemes: VersionSchemeRegistry,
    /// Serializes record read-check-write; holds keys with a commit in flight
    records: Mutex<HashSet<ItemKey>>,
    listeners: RwLock<Vec<Arc<dyn RepositoryListener>>>,
}

impl RepositoryManager {
    /// Open the repository described by `config` with its configured backend
    pub fn open(config: RepositoryConfig) -> Result<Self> {
        let root = config.root_path();
        let backend: Arc<dyn VersionControl> = match config.backend.kind {
            BackendKind::Git => Arc::new(
                GitBackend::open_or_init(&root, config.backend.author_email.clone())
                    .map_err(|e| RepositoryError::backend("open", e))?,
            ),
            BackendKind::Local => Arc::new(LocalBackend::new(&root)?),
        };
        Self::with_backend(config, backend)
    }

    pub fn with_backend(
        config: RepositoryConfig,
        backend: Arc<dyn VersionControl>,
    ) -> Result<Self> {
        let gate = CommitGate::new(config.backend.commit_timeout());
        let synchronizer = Arc::new(ChangeSetSynchronizer::new(backend, gate, &config.sync));
        Self::with_synchronizer(config, synchronizer)
    }

    /// Build over an existing synchronizer and run startup initialization.
    ///
    /// A failed initialization leaves the manager in degraded mode: reads are
    /// served, mutations are refused.
    pub fn with_synchronizer(
        config: RepositoryConfig,
        synchronizer: Arc<ChangeSetSynchronizer>,
    ) -> Result<Self> {
        let schemes = VersionSchemeRegistry::from_config(&config.versioning)?;
        let store = MetadataStore::new(synchronizer.root());
        let manager = Self {
            config,
            synchronizer,
            store,
            schemes,
            records: Mutex::new(HashSet::new()),
            listeners: RwLock::new(Vec::new()),
        };

        if let Err(err) = manager.synchronizer.initialize_repository() {
            warn!(error = %err, "repository opened in degraded mode");
        }
        Ok(manager)
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn synchronizer(&self) -> &Arc<ChangeSetSynchronizer> {
        &self.synchronizer
    }

    pub fn schemes(&self) -> &VersionSchemeRegistry {
        &self.schemes
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn health(&self) -> RepositoryHealth {
        self.synchronizer.health()
    }

    pub fn add_listener(&self, listener: Arc<dyn RepositoryListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn notify(&self, event: RepositoryEvent) {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener.on_event(&event);
        }
    }

    fn records(&self) -> MutexGuard<'_, HashSet<ItemKey>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> Result<()> {
        match self.synchronizer.health() {
            RepositoryHealth::Available => Ok(()),
            RepositoryHealth::Degraded { reason } => Err(RepositoryError::Unavailable(reason)),
        }
    }

    fn ensure_settled(records: &HashSet<ItemKey>, key: &ItemKey) -> Result<()> {
        if records.contains(key) {
            return Err(RepositoryError::VersionConflict {
                item: key.to_string(),
                detail: "another operation on this item is in progress".to_string(),
            });
        }
        Ok(())
    }

    fn load(&self, key: &ItemKey) -> Result<RepositoryItem> {
        self.store
            .load(key)?
            .ok_or_else(|| RepositoryError::NotFound { item: key.to_string() })
    }

    /// Load, check and mark `key` in flight in one step
    fn claim<F>(&self, key: &ItemKey, check: F) -> Result<(RepositoryItem, InFlight<'_>)>
    where
        F: FnOnce(&RepositoryItem) -> Result<()>,
    {
        let mut records = self.records();
        Self::ensure_settled(&records, key)?;
        let item = self.load(key)?;
        check(&item)?;
        records.insert(key.clone());
        Ok((
            item,
            InFlight {
                records: &self.records,
                key: key.clone(),
            },
        ))
    }

    /// Metadata-only transition: read, check and rewrite the record
    fn update<F>(&self, key: &ItemKey, mutate: F) -> Result<(RepositoryItem, RepositoryItem)>
    where
        F: FnOnce(&mut RepositoryItem) -> Result<()>,
    {
        let records = self.records();
        Self::ensure_settled(&records, key)?;
        let mut item = self.load(key)?;
        let before = item.clone();
        mutate(&mut item)?;
        item.last_modified = Utc::now();
        self.store.save(&item)?;
        Ok((before, item))
    }

    fn require_holder(item: &RepositoryItem, user: &str) -> Result<()> {
        match &item.locked_by {
            Some(holder) if holder == user => Ok(()),
            holder => Err(RepositoryError::NotLockOwner {
                item: item.filename.clone(),
                user: user.to_string(),
                holder: holder.clone(),
            }),
        }
    }

    fn require_unlocked(item: &RepositoryItem, operation: &'static str) -> Result<()> {
        match &item.locked_by {
            Some(holder) => Err(RepositoryError::InvalidTransition {
                item: item.filename.clone(),
                operation,
                current: format!("locked by {}", holder),
            }),
            None => Ok(()),
        }
    }

    fn require_administrator(&self, user: &str, operation: &'static str) -> Result<()> {
        if self.config.security.is_administrator(user) {
            Ok(())
        } else {
            Err(RepositoryError::Unauthorized {
                user: user.to_string(),
                operation,
            })
        }
    }

    fn validate_filename(filename: &str) -> Result<()> {
        let invalid = filename.is_empty()
            || filename == "."
            || filename == ".."
            || filename.contains(['/', '\\'])
            || MetadataStore::is_reserved_filename(filename);
        if invalid {
            return Err(RepositoryError::InvalidFilename(filename.to_string()));
        }
        Ok(())
    }

    fn commit_paths(&self, paths: &[PathBuf], message: &str, user: &str) -> Result<CommitOutcome> {
        let mut change_set = self.synchronizer.change_set();
        for path in paths {
            self.synchronizer.stage(&mut change_set, path)?;
        }
        self.synchronizer.commit_change_set(change_set, message, user)
    }

    /// Save `item` and commit its content with the record.
    ///
    /// On failure the previous record is restored; content is left as is.
    fn commit_item(
        &self,
        item: &RepositoryItem,
        message: &str,
        user: &str,
    ) -> Result<CommitOutcome> {
        let key = item.key();
        let snapshot = self.store.snapshot(&key)?;
        let record = self.store.save(item)?;
        let paths = [self.store.content_path(&key), record];

        match self.commit_paths(&paths, message, user) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if let Err(restore) = self.store.restore(&key, snapshot.as_deref()) {
                    warn!(item = %key, error = %restore, "failed to restore item record");
                }
                Err(err)
            }
        }
    }

    fn message(action: &str, item: &RepositoryItem, user: &str, remarks: Option<&str>) -> String {
        let mut message = format!("{} {} ({}) by {}", action, item.filename, item.namespace, user);
        if let Some(remarks) = remarks.filter(|r| !r.trim().is_empty()) {
            message.push_str("\n\n");
            message.push_str(remarks.trim());
        }
        message
    }

    fn content_exists(&self, item: &RepositoryItem) -> Result<PathBuf> {
        let path = self.store.content_path(&item.key());
        if !path.is_file() {
            return Err(RepositoryError::NotFound {
                item: path.display().to_string(),
            });
        }
        Ok(path)
    }

    /// Add a new library to the repository as an unlocked draft
    pub fn publish(&self, request: PublishRequest, user: &str) -> Result<RepositoryItem> {
        self.ensure_available()?;

        let scheme = match &request.version_scheme {
            Some(id) => self.schemes.get(id)?,
            None => self.schemes.default_scheme()?,
        };
        if !scheme.is_valid_namespace(&request.namespace) {
            return Err(RepositoryError::InvalidNamespace {
                scheme: scheme.id().to_string(),
                namespace: request.namespace,
            });
        }
        if request.library_name.trim().is_empty() {
            return Err(RepositoryError::InvalidFilename(request.library_name));
        }

        let filename = request
            .filename
            .clone()
            .unwrap_or_else(|| scheme.default_file_hint(&request.namespace, &request.library_name));
        Self::validate_filename(&filename)?;

        let version = scheme.version_identifier(&request.namespace);
        let base_namespace = scheme.base_namespace(&request.namespace);
        let now = Utc::now();
        let item = RepositoryItem {
            repository_id: self.config.repository.id.clone(),
            namespace: request.namespace.clone(),
            base_namespace,
            filename,
            library_name: request.library_name.clone(),
            version,
            version_scheme: scheme.id().to_string(),
            status: LibraryStatus::Draft,
            locked_by: None,
            checksum: None,
            created_at: now,
            last_modified: now,
        };
        let key = item.key();

        let _in_flight = {
            let mut records = self.records();
            Self::ensure_settled(&records, &key)?;
            let clash = records
                .iter()
                .any(|k| k.base_namespace == key.base_namespace && k.filename == key.filename);
            if clash {
                return Err(RepositoryError::VersionConflict {
                    item: key.to_string(),
                    detail: "another publish of this file is in progress".to_string(),
                });
            }
            let existing = self
                .store
                .published_versions(&key.base_namespace, &key.filename)?;
            if let Some(existing) = existing.first() {
                return Err(RepositoryError::VersionConflict {
                    item: key.to_string(),
                    detail: format!("already published as version {}", existing.version),
                });
            }
            records.insert(key.clone());
            InFlight {
                records: &self.records,
                key: key.clone(),
            }
        };

        let content_path = self.store.content_path(&key);
        if let Some(parent) = content_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&content_path, &request.content)?;
        let record_path = self.store.save(&item)?;

        let mut change_set = self.synchronizer.change_set();
        self.synchronizer.stage(&mut change_set, &content_path)?;
        self.synchronizer.stage(&mut change_set, &record_path)?;
        let message = Self::message("Publish", &item, user, None);

        if let Err(err) = self.synchronizer.commit_change_set(change_set.clone(), &message, user) {
            warn!(item = %key, error = %err, "publish failed, rolling back");
            if let Err(rollback) = self.synchronizer.rollback_change_set(change_set) {
                warn!(item = %key, error = %rollback, "rollback after failed publish failed");
            }
            return Err(err);
        }

        info!(item = %key, user, "published");
        self.notify(RepositoryEvent::Published {
            key,
            user: user.to_string(),
        });
        Ok(item)
    }

    /// Check out an item for editing by `user`
    pub fn lock(&self, key: &ItemKey, user: &str) -> Result<RepositoryItem> {
        self.ensure_available()?;
        let (_, item) = self.update(key, |item| {
            if item.status == LibraryStatus::Obsolete {
                return Err(RepositoryError::InvalidTransition {
                    item: item.filename.clone(),
                    operation: "lock",
                    current: item.status.to_string(),
                });
            }
            match &item.locked_by {
                Some(holder) if holder == user => Err(RepositoryError::InvalidTransition {
                    item: item.filename.clone(),
                    operation: "lock",
                    current: RepositoryItemState::ManagedWip.to_string(),
                }),
                Some(holder) => Err(RepositoryError::LockConflict {
                    item: item.filename.clone(),
                    holder: holder.clone(),
                }),
                None => {
                    item.locked_by = Some(user.to_string());
                    Ok(())
                }
            }
        })?;

        info!(item = %key, user, "locked");
        self.notify(RepositoryEvent::Locked {
            key: key.clone(),
            user: user.to_string(),
        });
        Ok(item)
    }

    /// Replace the working content of a locked item without committing
    pub fn stage_content(
        &self,
        key: &ItemKey,
        user: &str,
        content: &[u8],
    ) -> Result<RepositoryItem> {
        self.ensure_available()?;
        let (item, _in_flight) = self.claim(key, |item| Self::require_holder(item, user))?;
        let path = self.store.content_path(key);
        fs::write(&path, content)?;
        debug!(item = %key, user, bytes = content.len(), "staged content");
        Ok(item)
    }

    /// Commit the lock holder's pending edits; the lock is kept
    pub fn commit(
        &self,
        key: &ItemKey,
        user: &str,
        remarks: Option<&str>,
    ) -> Result<RepositoryItem> {
        self.ensure_available()?;
        let (mut item, _in_flight) = self.claim(key, |item| Self::require_holder(item, user))?;
        let content = self.content_exists(&item)?;

        if item.status.requires_checksum() {
            item.checksum = Some(Checksum::from_file(&content)?);
        }
        item.last_modified = Utc::now();

        let message = Self::message("Commit", &item, user, remarks);
        let outcome = self.commit_item(&item, &message, user)?;
        let revision = match outcome {
            CommitOutcome::Committed { revision, .. } => revision,
            CommitOutcome::Empty => None,
        };

        info!(item = %key, user, revision = revision.as_deref().unwrap_or("-"), "committed");
        self.notify(RepositoryEvent::Committed {
            key: key.clone(),
            user: user.to_string(),
            revision,
        });
        Ok(item)
    }

    /// Discard the lock holder's uncommitted edits; the lock is kept
    pub fn revert(&self, key: &ItemKey, user: &str) -> Result<RepositoryItem> {
        self.ensure_available()?;
        let (item, _in_flight) = self.claim(key, |item| Self::require_holder(item, user))?;

        let mut change_set = self.synchronizer.change_set();
        self.synchronizer
            .stage(&mut change_set, &self.store.content_path(key))?;
        let outcome = self.synchronizer.rollback_change_set(change_set)?;

        info!(item = %key, user, reverted = outcome.reverted.len(), "reverted");
        self.notify(RepositoryEvent::Reverted {
            key: key.clone(),
            user: user.to_string(),
        });
        Ok(item)
    }

    /// Release the lock, committing or discarding pending edits.
    ///
    /// Administrators may release another user's lock.
    pub fn unlock(
        &self,
        key: &ItemKey,
        user: &str,
        keep_changes: bool,
        remarks: Option<&str>,
    ) -> Result<RepositoryItem> {
        self.ensure_available()?;
        let is_admin = self.config.security.is_administrator(user);
        let (mut item, _in_flight) = self.claim(key, |item| match &item.locked_by {
            Some(holder) if holder == user || is_admin => Ok(()),
            _ => Self::require_holder(item, user),
        })?;
        let content = self.store.content_path(key);
        let previous_holder = item.locked_by.take();

        if keep_changes {
            let pending = self
                .synchronizer
                .backend()
                .status(&content)
                .map(|status| status.is_pending())
                .unwrap_or(true);
            item.last_modified = Utc::now();
            if pending {
                self.content_exists(&item)?;
                if item.status.requires_checksum() {
                    item.checksum = Some(Checksum::from_file(&content)?);
                }
                let message = Self::message("Unlock", &item, user, remarks);
                self.commit_item(&item, &message, user)?;
            } else {
                self.store.save(&item)?;
            }
        } else {
            let mut change_set = self.synchronizer.change_set();
            self.synchronizer.stage(&mut change_set, &content)?;
            self.synchronizer.rollback_change_set(change_set)?;
            item.last_modified = Utc::now();
            self.store.save(&item)?;
        }

        if previous_holder.as_deref() != Some(user) {
            warn!(
                item = %key,
                user,
                holder = previous_holder.as_deref().unwrap_or("-"),
                "lock released by administrator"
            );
        }
        info!(item = %key, user, keep_changes, "unlocked");
        self.notify(RepositoryEvent::Unlocked {
            key: key.clone(),
            user: user.to_string(),
            kept_changes: keep_changes,
        });
        Ok(item)
    }

    /// Advance an unlocked item to its next status, freezing its checksum
    pub fn promote(&self, key: &ItemKey, user: &str) -> Result<RepositoryItem> {
        self.ensure_available()?;
        let content = self.store.content_path(key);
        let (before, item) = self.update(key, |item| {
            Self::require_unlocked(item, "promote")?;
            let next = item.status.next().ok_or_else(|| RepositoryError::InvalidTransition {
                item: item.filename.clone(),
                operation: "promote",
                current: item.status.to_string(),
            })?;
            if next.requires_checksum() {
                item.checksum = Some(Checksum::from_file(&content)?);
            }
            item.status = next;
            Ok(())
        })?;

        self.status_changed(key, user, before.status, item.status);
        Ok(item)
    }

    /// Return an unlocked item to its previous status (administrators only)
    pub fn demote(&self, key: &ItemKey, user: &str) -> Result<RepositoryItem> {
        self.demote_to(key, user, None)
    }

    /// Return an unlocked item to an earlier status (administrators only).
    ///
    /// `target` defaults to the previous status. The frozen checksum is kept
    /// unless the item goes back to DRAFT.
    pub fn demote_to(
        &self,
        key: &ItemKey,
        user: &str,
        target: Option<LibraryStatus>,
    ) -> Result<RepositoryItem> {
        self.ensure_available()?;
        self.require_administrator(user, "demote")?;
        let (before, item) = self.update(key, |item| {
            Self::require_unlocked(item, "demote")?;
            let target = target
                .or_else(|| item.status.previous())
                .filter(|target| *target < item.status)
                .ok_or_else(|| RepositoryError::InvalidTransition {
                    item: item.filename.clone(),
                    operation: "demote",
                    current: item.status.to_string(),
                })?;
            if !target.requires_checksum() {
                item.checksum = None;
            }
            item.status = target;
            Ok(())
        })?;

        self.status_changed(key, user, before.status, item.status);
        Ok(item)
    }

    fn status_changed(&self, key: &ItemKey, user: &str, from: LibraryStatus, to: LibraryStatus) {
        info!(item = %key, user, %from, %to, "status changed");
        self.notify(RepositoryEvent::StatusChanged {
            key: key.clone(),
            user: user.to_string(),
            from,
            to,
        });
    }

    /// Remove an unlocked item's content and record in one commit
    pub fn delete(&self, key: &ItemKey, user: &str) -> Result<()> {
        self.ensure_available()?;
        let (item, _in_flight) = self.claim(key, |item| Self::require_unlocked(item, "delete"))?;

        let content_path = self.store.content_path(key);
        let record_path = self.store.record_path(key);
        let content = fs::read(&content_path).ok();
        let record = self.store.snapshot(key)?;

        if content.is_some() {
            fs::remove_file(&content_path)?;
        }
        self.store.remove(key)?;

        let message = Self::message("Delete", &item, user, None);
        if let Err(err) = self.commit_paths(&[content_path.clone(), record_path], &message, user) {
            warn!(item = %key, error = %err, "delete failed, restoring files");
            if let Some(content) = &content {
                fs::write(&content_path, content)?;
            }
            self.store.restore(key, record.as_deref())?;
            return Err(err);
        }

        // Leave no empty version directory behind
        let _ = fs::remove_dir(self.store.item_dir(key));

        info!(item = %key, user, "deleted");
        self.notify(RepositoryEvent::Deleted {
            key: key.clone(),
            user: user.to_string(),
        });
        Ok(())
    }

    pub fn item(&self, key: &ItemKey) -> Result<RepositoryItem> {
        self.load(key)
    }

    /// Item published under `namespace` for `library_name`, if any
    pub fn find(&self, namespace: &str, library_name: &str) -> Result<Option<RepositoryItem>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .find(|item| item.namespace == namespace && item.library_name == library_name))
    }

    pub fn content(&self, key: &ItemKey) -> Result<Vec<u8>> {
        let item = self.load(key)?;
        let path = self.content_exists(&item)?;
        Ok(fs::read(path)?)
    }

    /// Every item, ordered by scheme, base namespace and ascending version
    pub fn list_items(&self) -> Result<Vec<RepositoryItem>> {
        let mut items = self.store.list()?;
        VersionComparator::new(true).sort(&mut items);
        Ok(items)
    }

    /// Published versions of one library, newest first
    pub fn version_history(
        &self,
        base_namespace: &str,
        library_name: &str,
    ) -> Result<Vec<RepositoryItem>> {
        let mut items: Vec<RepositoryItem> = self
            .store
            .list()?
            .into_iter()
            .filter(|item| {
                item.base_namespace == base_namespace && item.library_name == library_name
            })
            .collect();
        VersionComparator::new(false).sort(&mut items);
        Ok(items)
    }

    /// Namespaces of the item's major-version chain with no published library
    pub fn missing_predecessors(&self, key: &ItemKey) -> Result<Vec<String>> {
        let item = self.load(key)?;
        let scheme = self.schemes.get(&item.version_scheme)?;
        let published: HashSet<String> = self
            .store
            .list()?
            .into_iter()
            .filter(|other| other.library_name == item.library_name)
            .map(|other| other.namespace)
            .collect();

        Ok(scheme
            .major_version_chain(&item.namespace)
            .into_iter()
            .skip(1)
            .filter(|namespace| !published.contains(namespace))
            .collect())
    }

    /// Re-verify the frozen checksum against the current content
    pub fn verify_integrity(&self, key: &ItemKey) -> Result<IntegrityReport> {
        let item = self.load(key)?;
        if !item.status.requires_checksum() {
            return Ok(IntegrityReport::NotApplicable);
        }
        let Some(expected) = item.checksum else {
            warn!(item = %key, status = %item.status, "item has no checksum");
            return Ok(IntegrityReport::MissingChecksum);
        };

        let actual = Checksum::from_file(&self.store.content_path(key))?;
        if actual == expected {
            Ok(IntegrityReport::Verified)
        } else {
            warn!(item = %key, %expected, %actual, "checksum mismatch");
            Ok(IntegrityReport::Mismatch { expected, actual })
        }
    }

    /// Lock state of `key` as observed by `user`
    pub fn state_for(&self, key: &ItemKey, user: &str) -> Result<RepositoryItemState> {
        Ok(match self.store.load(key)? {
            Some(item) => item.state_for(user),
            None => RepositoryItemState::Unmanaged,
        })
    }
}

impl std::fmt::Debug for RepositoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryManager")
            .field("repository", &self.config.repository.id)
            .field("synchronizer", &self.synchronizer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::RecordingListener;
    use crate::sync::MockBackend;
    use tempfile::tempdir;

    const NS: &str = "http://www.example.org/ns/Travel/v02";

    fn manager(dir: &std::path::Path) -> (RepositoryManager, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::new(dir));
        let mut config = RepositoryConfig::with_root(dir);
        config.security.administrators = vec!["admin".to_string()];
        let manager = RepositoryManager::with_backend(config, backend.clone()).unwrap();
        (manager, backend)
    }

    fn publish(manager: &RepositoryManager) -> RepositoryItem {
        manager
            .publish(PublishRequest::new(NS, "Travel", b"<library/>".to_vec()), "alice")
            .unwrap()
    }

    #[test]
    fn test_publish_creates_committed_draft() {
        let dir = tempdir().unwrap();
        let (manager, backend) = manager(dir.path());
        let item = publish(&manager);

        assert_eq!(item.status, LibraryStatus::Draft);
        assert_eq!(item.filename, "Travel_2_0_0.otm");
        assert_eq!(item.base_namespace, "http://www.example.org/ns/Travel");
        assert_eq!(
            manager.state_for(&item.key(), "bob").unwrap(),
            RepositoryItemState::ManagedUnlocked
        );

        let commits = backend.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].author, "alice");
        assert_eq!(commits[0].files.len(), 2);
        assert_eq!(manager.content(&item.key()).unwrap(), b"<library/>");
    }

    #[test]
    fn test_publish_rejects_duplicates_and_bad_namespaces() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        publish(&manager);

        let err = manager
            .publish(PublishRequest::new(NS, "Travel", b"again".to_vec()), "bob")
            .unwrap_err();
        assert!(matches!(err, RepositoryError::VersionConflict { .. }));

        let err = manager
            .publish(
                PublishRequest::new("http://www.example.org/ns/Travel/v2", "Travel", b"x".to_vec()),
                "bob",
            )
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidNamespace { .. }));

        let err = manager
            .publish(
                PublishRequest::new(NS, "Other", b"x".to_vec()).with_filename("../escape.otm"),
                "bob",
            )
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidFilename(_)));
    }

    #[test]
    fn test_failed_publish_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let (manager, backend) = manager(dir.path());
        backend.fail_next_commit();

        let err = manager
            .publish(PublishRequest::new(NS, "Travel", b"x".to_vec()), "alice")
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(manager.list_items().unwrap().is_empty());
        assert!(backend.commits().is_empty());
    }

    #[test]
    fn test_lock_conflict_names_holder() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        let key = publish(&manager).key();

        manager.lock(&key, "alice").unwrap();
        let err = manager.lock(&key, "bob").unwrap_err();
        assert!(
            matches!(err, RepositoryError::LockConflict { ref holder, .. } if holder == "alice")
        );
        assert_eq!(manager.state_for(&key, "alice").unwrap(), RepositoryItemState::ManagedWip);
        assert_eq!(
            manager.state_for(&key, "bob").unwrap(),
            RepositoryItemState::ManagedLockedByOther
        );
    }

    #[test]
    fn test_content_operations_require_lock_holder() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        let key = publish(&manager).key();
        manager.lock(&key, "alice").unwrap();

        let err = manager.stage_content(&key, "bob", b"hijack").unwrap_err();
        assert!(matches!(err, RepositoryError::NotLockOwner { .. }));
        let err = manager.commit(&key, "bob", None).unwrap_err();
        assert!(matches!(err, RepositoryError::NotLockOwner { .. }));
        let err = manager.unlock(&key, "bob", true, None).unwrap_err();
        assert!(matches!(err, RepositoryError::NotLockOwner { .. }));
    }

    #[test]
    fn test_commit_and_revert() {
        let dir = tempdir().unwrap();
        let (manager, backend) = manager(dir.path());
        let key = publish(&manager).key();
        manager.lock(&key, "alice").unwrap();

        manager.stage_content(&key, "alice", b"<library v='2'/>").unwrap();
        manager.commit(&key, "alice", Some("second draft")).unwrap();
        let last = backend.commits().pop().unwrap();
        assert!(last.message.contains("by alice"));
        assert!(last.message.contains("second draft"));

        manager.stage_content(&key, "alice", b"scratch").unwrap();
        manager.revert(&key, "alice").unwrap();
        assert_eq!(manager.content(&key).unwrap(), b"<library v='2'/>");
        assert_eq!(manager.item(&key).unwrap().locked_by.as_deref(), Some("alice"));
    }

    #[test]
    fn test_failed_commit_keeps_record() {
        let dir = tempdir().unwrap();
        let (manager, backend) = manager(dir.path());
        let key = publish(&manager).key();
        manager.lock(&key, "alice").unwrap();
        let before = manager.item(&key).unwrap();

        manager.stage_content(&key, "alice", b"edit").unwrap();
        backend.fail_next_commit();
        assert!(manager.commit(&key, "alice", None).is_err());
        assert_eq!(manager.item(&key).unwrap(), before);
        assert_eq!(manager.content(&key).unwrap(), b"edit");
    }

    #[test]
    fn test_unlock_discard_restores_content() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        let key = publish(&manager).key();
        manager.lock(&key, "alice").unwrap();
        manager.stage_content(&key, "alice", b"throwaway").unwrap();

        let item = manager.unlock(&key, "alice", false, None).unwrap();
        assert!(item.locked_by.is_none());
        assert_eq!(manager.content(&key).unwrap(), b"<library/>");
    }

    #[test]
    fn test_administrator_can_break_lock() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        let key = publish(&manager).key();
        manager.lock(&key, "alice").unwrap();

        manager.unlock(&key, "admin", false, None).unwrap();
        assert_eq!(manager.state_for(&key, "alice").unwrap(), RepositoryItemState::ManagedUnlocked);
    }

    #[test]
    fn test_promotion_freezes_checksum() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        let key = publish(&manager).key();

        assert_eq!(manager.verify_integrity(&key).unwrap(), IntegrityReport::NotApplicable);
        let item = manager.promote(&key, "alice").unwrap();
        assert_eq!(item.status, LibraryStatus::UnderReview);
        assert_eq!(item.checksum, Some(Checksum::from_bytes(b"<library/>")));
        let item = manager.promote(&key, "alice").unwrap();
        assert_eq!(item.status, LibraryStatus::Final);
        assert_eq!(manager.verify_integrity(&key).unwrap(), IntegrityReport::Verified);

        fs::write(manager.store().content_path(&key), b"tampered").unwrap();
        assert!(manager.verify_integrity(&key).unwrap().is_suspect());
    }

    #[test]
    fn test_promote_refused_while_locked() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        let key = publish(&manager).key();
        manager.lock(&key, "alice").unwrap();

        let err = manager.promote(&key, "alice").unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidTransition { operation: "promote", .. }));
    }

    #[test]
    fn test_demote_requires_administrator() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        let key = publish(&manager).key();
        manager.promote(&key, "alice").unwrap();

        let err = manager.demote(&key, "alice").unwrap_err();
        assert!(matches!(err, RepositoryError::Unauthorized { .. }));

        let item = manager.demote(&key, "admin").unwrap();
        assert_eq!(item.status, LibraryStatus::Draft);
        assert!(item.checksum.is_none());
        assert!(manager.demote(&key, "admin").is_err());
    }

    #[test]
    fn test_demote_keeps_frozen_checksum() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        let key = publish(&manager).key();
        manager.promote(&key, "alice").unwrap();
        manager.promote(&key, "alice").unwrap();
        fs::write(manager.store().content_path(&key), b"edited out of band").unwrap();

        let item = manager.demote(&key, "admin").unwrap();
        assert_eq!(item.status, LibraryStatus::UnderReview);
        assert_eq!(item.checksum, Some(Checksum::from_bytes(b"<library/>")));
        assert!(manager.verify_integrity(&key).unwrap().is_suspect());
    }

    #[test]
    fn test_demote_to_earlier_status() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        let key = publish(&manager).key();
        manager.promote(&key, "alice").unwrap();
        manager.promote(&key, "alice").unwrap();

        for target in [LibraryStatus::Final, LibraryStatus::Obsolete] {
            let err = manager.demote_to(&key, "admin", Some(target)).unwrap_err();
            assert!(matches!(err, RepositoryError::InvalidTransition { operation: "demote", .. }));
        }

        let item = manager.demote_to(&key, "admin", Some(LibraryStatus::Draft)).unwrap();
        assert_eq!(item.status, LibraryStatus::Draft);
        assert!(item.checksum.is_none());
    }

    #[test]
    fn test_publish_keeps_lookalike_namespaces_apart() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        let plain = manager
            .publish(
                PublishRequest::new("http://example.org/ns/Travel/v01", "Travel", b"AAAA".to_vec()),
                "alice",
            )
            .unwrap();
        let secure = manager
            .publish(
                PublishRequest::new(
                    "https://example.org/ns/Travel/v01",
                    "Travel",
                    b"BBBB".to_vec(),
                ),
                "bob",
            )
            .unwrap();

        assert_ne!(
            manager.store().item_dir(&plain.key()),
            manager.store().item_dir(&secure.key())
        );
        assert_eq!(
            manager.item(&plain.key()).unwrap().base_namespace,
            "http://example.org/ns/Travel"
        );
        assert_eq!(manager.content(&plain.key()).unwrap(), b"AAAA");
        assert_eq!(manager.content(&secure.key()).unwrap(), b"BBBB");
        assert_eq!(manager.list_items().unwrap().len(), 2);
    }

    #[test]
    fn test_obsolete_items_cannot_be_locked() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        let key = publish(&manager).key();
        for _ in 0..3 {
            manager.promote(&key, "alice").unwrap();
        }
        assert_eq!(manager.item(&key).unwrap().status, LibraryStatus::Obsolete);
        assert!(manager.promote(&key, "alice").is_err());

        let err = manager.lock(&key, "alice").unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidTransition { operation: "lock", .. }));
    }

    #[test]
    fn test_delete_removes_item() {
        let dir = tempdir().unwrap();
        let (manager, backend) = manager(dir.path());
        let key = publish(&manager).key();

        manager.lock(&key, "alice").unwrap();
        assert!(manager.delete(&key, "bob").is_err());
        manager.unlock(&key, "alice", true, None).unwrap();

        manager.delete(&key, "bob").unwrap();
        assert_eq!(manager.state_for(&key, "bob").unwrap(), RepositoryItemState::Unmanaged);
        assert!(backend.committed_content(&manager.store().content_path(&key)).is_none());
    }

    #[test]
    fn test_failed_delete_restores_item() {
        let dir = tempdir().unwrap();
        let (manager, backend) = manager(dir.path());
        let key = publish(&manager).key();
        manager.promote(&key, "alice").unwrap();

        backend.fail_next_commit();
        assert!(manager.delete(&key, "alice").is_err());
        let item = manager.item(&key).unwrap();
        assert_eq!(item.status, LibraryStatus::UnderReview);
        assert_eq!(manager.content(&key).unwrap(), b"<library/>");
    }

    #[test]
    fn test_history_and_missing_predecessors() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        let base = "http://www.example.org/ns/Travel";
        for ns in ["v01", "v01_02"] {
            manager
                .publish(
                    PublishRequest::new(format!("{}/{}", base, ns), "Travel", b"x".to_vec()),
                    "alice",
                )
                .unwrap();
        }

        let history = manager.version_history(base, "Travel").unwrap();
        let versions: Vec<String> = history.iter().map(|i| i.version.to_string()).collect();
        assert_eq!(versions, vec!["1.2.0", "1.0.0"]);

        let missing = manager.missing_predecessors(&history[0].key()).unwrap();
        assert_eq!(missing, vec![format!("{}/v01_01", base)]);
    }

    #[test]
    fn test_listeners_receive_events() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        let listener = Arc::new(RecordingListener::default());
        manager.add_listener(listener.clone());

        let key = publish(&manager).key();
        manager.lock(&key, "alice").unwrap();
        manager.unlock(&key, "alice", true, None).unwrap();
        manager.promote(&key, "alice").unwrap();

        let events = listener.events.lock().unwrap();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], RepositoryEvent::Published { .. }));
        assert!(matches!(
            events[3],
            RepositoryEvent::StatusChanged {
                from: LibraryStatus::Draft,
                to: LibraryStatus::UnderReview,
                ..
            }
        ));
    }

    #[test]
    fn test_degraded_repository_refuses_mutations() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(MockBackend::new(dir.path()));
        fs::write(backend.root().join("stray.otm"), b"x").unwrap();
        backend.fail_next_commit();

        let config = RepositoryConfig::with_root(dir.path());
        let manager = RepositoryManager::with_backend(config, backend).unwrap();
        assert!(matches!(manager.health(), RepositoryHealth::Degraded { .. }));
        let err = manager
            .publish(PublishRequest::new(NS, "Travel", b"x".to_vec()), "alice")
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Unavailable(_)));
        assert!(manager.list_items().unwrap().is_empty());
    }
}
