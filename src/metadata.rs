//! Persisted item records
//!
//! ## Layout
//!
//! ```text
//! <root>/libraries/
//! └── www.example.org/ns/Travel@9f2c…/  base namespace
//!     └── 2.0.0/                        version
//!         ├── Travel_2_0_0.otm          library content
//!         └── Travel_2_0_0.otm.item.json
//! ```
//!
//! The last directory of a base namespace carries a digest of the full
//! namespace URI, so namespaces that differ only in scheme or punctuation
//! never share a directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::checksum::Checksum;
use crate::error::{RepositoryError, Result};
use crate::item::{ItemKey, RepositoryItem};

/// Directory under the repository root holding all libraries
pub const LIBRARIES_DIR: &str = "libraries";

const RECORD_SUFFIX: &str = ".item.json";

/// Hex digits of the namespace digest kept in directory names
const DIGEST_LEN: usize = 16;

/// One JSON record per item, stored next to the item's content
#[derive(Debug, Clone)]
pub struct MetadataStore {
    libraries: PathBuf,
}

impl MetadataStore {
    pub fn new(repository_root: &Path) -> Self {
        Self {
            libraries: repository_root.join(LIBRARIES_DIR),
        }
    }

    pub fn libraries_dir(&self) -> &Path {
        &self.libraries
    }

    /// Whether `filename` would collide with record files
    pub fn is_reserved_filename(filename: &str) -> bool {
        filename.ends_with(RECORD_SUFFIX)
    }

    /// Directory holding every version of one base namespace
    pub fn namespace_dir(&self, base_namespace: &str) -> PathBuf {
        self.libraries.join(namespace_path(base_namespace))
    }

    pub fn item_dir(&self, key: &ItemKey) -> PathBuf {
        self.namespace_dir(&key.base_namespace)
            .join(key.version.to_string())
    }

    pub fn content_path(&self, key: &ItemKey) -> PathBuf {
        self.item_dir(key).join(&key.filename)
    }

    pub fn record_path(&self, key: &ItemKey) -> PathBuf {
        self.item_dir(key)
            .join(format!("{}{}", key.filename, RECORD_SUFFIX))
    }

    /// Record stored for `key`; a record naming another item is an error
    pub fn load(&self, key: &ItemKey) -> Result<Option<RepositoryItem>> {
        let path = self.record_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let item = read_record(&path)?;
        if item.key() != *key {
            return Err(RepositoryError::RecordMismatch {
                path,
                expected: key.to_string(),
                found: item.key().to_string(),
            });
        }
        Ok(Some(item))
    }

    /// Every version published for (`base_namespace`, `filename`).
    ///
    /// Reads only the namespace's own directory.
    pub fn published_versions(
        &self,
        base_namespace: &str,
        filename: &str,
    ) -> Result<Vec<RepositoryItem>> {
        let dir = self.namespace_dir(base_namespace);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let record_name = format!("{}{}", filename, RECORD_SUFFIX);
        let mut items = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path().join(&record_name);
            if !path.is_file() {
                continue;
            }
            let item = read_record(&path)?;
            if item.base_namespace != base_namespace || item.filename != filename {
                return Err(RepositoryError::RecordMismatch {
                    path,
                    expected: format!("{} {}", base_namespace, filename),
                    found: item.key().to_string(),
                });
            }
            items.push(item);
        }
        Ok(items)
    }

    /// Current record bytes, for restoring after a failed commit
    pub fn snapshot(&self, key: &ItemKey) -> Result<Option<Vec<u8>>> {
        let path = self.record_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }

    pub fn restore(&self, key: &ItemKey, snapshot: Option<&[u8]>) -> Result<()> {
        let path = self.record_path(key);
        match snapshot {
            Some(bytes) => write_atomic(&path, bytes),
            None if path.exists() => Ok(fs::remove_file(path)?),
            None => Ok(()),
        }
    }

    /// Write the record atomically (temp file + rename)
    pub fn save(&self, item: &RepositoryItem) -> Result<PathBuf> {
        let path = self.record_path(&item.key());
        let content = serde_json::to_vec_pretty(item)?;
        write_atomic(&path, &content)?;
        Ok(path)
    }

    pub fn remove(&self, key: &ItemKey) -> Result<()> {
        let path = self.record_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Every readable record; unreadable ones are logged and skipped
    pub fn list(&self) -> Result<Vec<RepositoryItem>> {
        if !self.libraries.exists() {
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        for entry in WalkDir::new(&self.libraries)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            let is_record = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with(RECORD_SUFFIX))
                .unwrap_or(false);
            if !is_record {
                continue;
            }
            match read_record(path) {
                Ok(item) => items.push(item),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable item record")
                }
            }
        }
        Ok(items)
    }
}

fn read_record(path: &Path) -> Result<RepositoryItem> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Filesystem path for a namespace URI.
///
/// `http://a.org/ns/X` becomes `a.org/ns/X@<digest>`. The readable part drops
/// the URI scheme and replaces unsafe characters; the digest of the full URI
/// keeps distinct namespaces apart.
pub fn namespace_path(namespace: &str) -> PathBuf {
    let without_scheme = match namespace.find("://") {
        Some(idx) => &namespace[idx + 3..],
        None => namespace.strip_prefix("urn:").unwrap_or(namespace),
    };

    let mut segments: Vec<String> = without_scheme
        .split(['/', ':'])
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let cleaned: String = segment
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();
            if cleaned == "." || cleaned == ".." {
                "_".to_string()
            } else {
                cleaned
            }
        })
        .collect();

    let checksum = Checksum::from_bytes(namespace.as_bytes());
    let digest = &checksum.as_str()[..DIGEST_LEN];
    match segments.last_mut() {
        Some(last) => {
            last.push('@');
            last.push_str(digest);
        }
        None => segments.push(digest.to_string()),
    }
    segments.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::LibraryStatus;
    use crate::version::VersionIdentifier;
    use chrono::Utc;
    use tempfile::tempdir;

    fn item() -> RepositoryItem {
        let now = Utc::now();
        RepositoryItem {
            repository_id: "local".to_string(),
            namespace: "http://www.example.org/ns/Travel/v02".to_string(),
            base_namespace: "http://www.example.org/ns/Travel".to_string(),
            filename: "Travel_2_0_0.otm".to_string(),
            library_name: "Travel".to_string(),
            version: VersionIdentifier::new(2, 0, 0),
            version_scheme: "OTM".to_string(),
            status: LibraryStatus::Draft,
            locked_by: None,
            checksum: None,
            created_at: now,
            last_modified: now,
        }
    }

    #[test]
    fn test_namespace_path() {
        let path = namespace_path("http://www.example.org/ns/Travel");
        let text = path.to_string_lossy().replace('\\', "/");
        assert!(text.starts_with("www.example.org/ns/Travel@"), "{}", text);
        assert_eq!(path.components().count(), 3);

        let path = namespace_path("http://evil.org/../x y");
        assert!(path.starts_with("evil.org/_"));
        assert!(!path.components().any(|c| c.as_os_str() == ".."));
        assert_eq!(namespace_path("").components().count(), 1);
    }

    #[test]
    fn test_lookalike_namespaces_get_distinct_dirs() {
        let lookalikes = [
            ("http://example.org/ns/Travel", "https://example.org/ns/Travel"),
            ("http://example.org/ns/x y", "http://example.org/ns/x_y"),
            ("urn:example:travel", "urn:example/travel"),
        ];
        for (a, b) in lookalikes {
            assert_ne!(namespace_path(a), namespace_path(b), "{} vs {}", a, b);
        }
        assert_eq!(
            namespace_path("http://example.org/ns/Travel"),
            namespace_path("http://example.org/ns/Travel")
        );
    }

    #[test]
    fn test_save_load_remove() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let item = item();

        assert!(store.load(&item.key()).unwrap().is_none());
        let path = store.save(&item).unwrap();
        assert!(path.starts_with(store.namespace_dir(&item.base_namespace)));
        assert!(path.ends_with("2.0.0/Travel_2_0_0.otm.item.json"));
        assert_eq!(store.load(&item.key()).unwrap(), Some(item.clone()));
        assert_eq!(store.list().unwrap().len(), 1);

        store.remove(&item.key()).unwrap();
        assert!(store.load(&item.key()).unwrap().is_none());
    }

    #[test]
    fn test_load_rejects_record_of_another_item() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let stored = item();
        let mut other = item();
        other.base_namespace = "https://www.example.org/ns/Travel".to_string();

        let path = store.save(&stored).unwrap();
        let target = store.record_path(&other.key());
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::copy(path, &target).unwrap();

        let err = store.load(&other.key()).unwrap_err();
        assert!(matches!(err, RepositoryError::RecordMismatch { .. }), "{:?}", err);
        assert!(store
            .published_versions(&other.base_namespace, &other.filename)
            .is_err());
    }

    #[test]
    fn test_published_versions_reads_one_namespace() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let first = item();
        let mut second = item();
        second.version = VersionIdentifier::new(2, 1, 0);
        second.namespace = "http://www.example.org/ns/Travel/v02_01".to_string();
        let mut elsewhere = item();
        elsewhere.base_namespace = "https://www.example.org/ns/Travel".to_string();
        for record in [&first, &second, &elsewhere] {
            store.save(record).unwrap();
        }

        let found = store
            .published_versions(&first.base_namespace, &first.filename)
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|i| i.base_namespace == first.base_namespace));
        assert!(store
            .published_versions(&first.base_namespace, "Other.otm")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_snapshot_restore() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let mut item = item();
        store.save(&item).unwrap();
        let snapshot = store.snapshot(&item.key()).unwrap();

        item.locked_by = Some("alice".to_string());
        store.save(&item).unwrap();
        store.restore(&item.key(), snapshot.as_deref()).unwrap();
        assert_eq!(store.load(&item.key()).unwrap().unwrap().locked_by, None);
    }

    #[test]
    fn test_list_skips_corrupt_records() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        store.save(&item()).unwrap();
        let bogus = store.libraries_dir().join("broken.otm.item.json");
        fs::write(bogus, b"{not json").unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
