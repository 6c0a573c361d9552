//! Library versioning
//!
//! Versions of a model library are encoded directly in its namespace URI
//! (`http://example.org/ns/Travel/v01_02`) and in its default filename
//! (`Travel_1_2_0.otm`). A [`VersionScheme`] knows how to read and rewrite
//! that encoding; [`VersionIdentifier`] is the parsed `major.minor.patch`
//! triple all schemes share.

mod null;
mod scheme;

pub use null::{NullVersionScheme, NULL_SCHEME_ID};
pub use scheme::{NamespaceVersionScheme, VersionScheme, DEFAULT_SCHEME_ID};

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::config::VersioningConfig;
use crate::error::{RepositoryError, Result};

/// A `major.minor.patch` version identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionIdentifier(Version);

impl VersionIdentifier {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    /// Parse `"1"`, `"1.2"`, `"1.2.3"` or `"v1.2.3"`; missing components are zero.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let mut parts: Vec<&str> = trimmed.split('.').collect();
        if trimmed.is_empty() || parts.len() > 3 {
            return Err(RepositoryError::InvalidVersion(value.to_string()));
        }
        while parts.len() < 3 {
            parts.push("0");
        }
        let version = Version::parse(&parts.join("."))?;
        if !version.pre.is_empty() || !version.build.is_empty() {
            return Err(RepositoryError::InvalidVersion(value.to_string()));
        }
        Ok(Self(version))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    /// `N.0.0`
    pub fn is_major_version(&self) -> bool {
        self.minor() == 0 && self.patch() == 0
    }

    /// `N.M.0` with `M > 0`
    pub fn is_minor_version(&self) -> bool {
        self.minor() > 0 && self.patch() == 0
    }

    pub fn is_patch_version(&self) -> bool {
        self.patch() > 0
    }

    pub fn increment_major(&self) -> Self {
        Self::new(self.major() + 1, 0, 0)
    }

    pub fn increment_minor(&self) -> Self {
        Self::new(self.major(), self.minor() + 1, 0)
    }

    pub fn increment_patch(&self) -> Self {
        Self::new(self.major(), self.minor(), self.patch() + 1)
    }

    pub fn decrement_major(&self) -> Option<Self> {
        self.major().checked_sub(1).map(|major| Self::new(major, 0, 0))
    }

    pub fn decrement_minor(&self) -> Option<Self> {
        self.minor()
            .checked_sub(1)
            .map(|minor| Self::new(self.major(), minor, 0))
    }

    pub fn decrement_patch(&self) -> Option<Self> {
        self.patch()
            .checked_sub(1)
            .map(|patch| Self::new(self.major(), self.minor(), patch))
    }

    /// The `major.0.0` version this identifier belongs to
    pub fn major_version(&self) -> Self {
        Self::new(self.major(), 0, 0)
    }
}

impl Default for VersionIdentifier {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

impl fmt::Display for VersionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for VersionIdentifier {
    type Error = RepositoryError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<VersionIdentifier> for String {
    fn from(value: VersionIdentifier) -> Self {
        value.to_string()
    }
}

impl std::str::FromStr for VersionIdentifier {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Anything identified by a versioned namespace.
pub trait Versioned {
    fn namespace(&self) -> &str;

    /// Version-independent root shared by every version of the same library
    fn base_namespace(&self) -> &str;

    fn version(&self) -> &VersionIdentifier;

    /// Identifier of the [`VersionScheme`] that produced `version`
    fn version_scheme(&self) -> &str;

    /// Ordering of two versions of the same library.
    ///
    /// Returns `None` when the values use different schemes or belong to
    /// different base namespaces.
    fn compare_version(&self, other: &dyn Versioned) -> Option<Ordering> {
        if self.version_scheme() != other.version_scheme()
            || self.base_namespace() != other.base_namespace()
        {
            return None;
        }
        Some(self.version().cmp(other.version()))
    }

    /// Strictly later version of the same library. Incomparable values are
    /// never later.
    fn is_later_version(&self, other: &dyn Versioned) -> bool {
        self.compare_version(other) == Some(Ordering::Greater)
    }
}

/// Total ordering over [`Versioned`] values for sorting.
///
/// Groups by scheme and base namespace (always ascending), then orders the
/// versions within a group in the requested direction.
#[derive(Debug, Clone, Copy)]
pub struct VersionComparator {
    ascending: bool,
}

impl VersionComparator {
    pub fn new(ascending: bool) -> Self {
        Self { ascending }
    }

    pub fn compare<A, B>(&self, a: &A, b: &B) -> Ordering
    where
        A: Versioned + ?Sized,
        B: Versioned + ?Sized,
    {
        a.version_scheme()
            .cmp(b.version_scheme())
            .then_with(|| a.base_namespace().cmp(b.base_namespace()))
            .then_with(|| {
                let ord = a.version().cmp(b.version());
                if self.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            })
    }

    pub fn sort<T: Versioned>(&self, items: &mut [T]) {
        items.sort_by(|a, b| self.compare(a, b));
    }
}

/// Lookup of version schemes by identifier
#[derive(Debug, Clone)]
pub struct VersionSchemeRegistry {
    schemes: HashMap<String, Arc<dyn VersionScheme>>,
    default_scheme: String,
}

impl VersionSchemeRegistry {
    /// Registry holding the namespace scheme described by `config` and the
    /// null scheme for unversioned artifacts.
    pub fn from_config(config: &VersioningConfig) -> Result<Self> {
        let namespace_scheme = NamespaceVersionScheme::new(
            config.default_scheme.clone(),
            &config.version_prefix,
            &config.separator,
            config.padding,
            &config.file_extension,
        )?;
        let mut registry = Self {
            schemes: HashMap::new(),
            default_scheme: config.default_scheme.clone(),
        };
        registry.register(Arc::new(namespace_scheme));
        registry.register(Arc::new(NullVersionScheme));
        Ok(registry)
    }

    pub fn register(&mut self, scheme: Arc<dyn VersionScheme>) {
        self.schemes.insert(scheme.id().to_string(), scheme);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn VersionScheme>> {
        self.schemes
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::UnknownScheme(id.to_string()))
    }

    pub fn default_scheme(&self) -> Result<Arc<dyn VersionScheme>> {
        self.get(&self.default_scheme)
    }

    pub fn default_scheme_id(&self) -> &str {
        &self.default_scheme
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.schemes.keys().map(String::as_str).collect();
        ids.sort();
        ids
    }
}

impl Default for VersionSchemeRegistry {
    fn default() -> Self {
        // The default versioning config always yields a valid pattern.
        Self::from_config(&VersioningConfig::default())
            .unwrap_or_else(|_| Self {
                schemes: HashMap::from([(
                    NULL_SCHEME_ID.to_string(),
                    Arc::new(NullVersionScheme) as Arc<dyn VersionScheme>,
                )]),
                default_scheme: NULL_SCHEME_ID.to_string(),
            })
    }
}
