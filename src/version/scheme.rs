//! Namespace-encoded version scheme

use std::fmt;

use regex::{Captures, Regex};

use super::VersionIdentifier;
use crate::error::Result;

/// Identifier of the namespace scheme registered by default
pub const DEFAULT_SCHEME_ID: &str = "OTM";

/// Strategy for reading and rewriting versions encoded in namespaces.
pub trait VersionScheme: fmt::Debug + Send + Sync {
    /// Scheme identifier stored alongside every versioned item
    fn id(&self) -> &str;

    /// Version assumed for namespaces that carry no version segment
    fn default_version_identifier(&self) -> VersionIdentifier {
        VersionIdentifier::default()
    }

    /// Whether `namespace` is in the canonical form this scheme produces
    fn is_valid_namespace(&self, namespace: &str) -> bool;

    fn version_identifier(&self, namespace: &str) -> VersionIdentifier;

    /// Rewrite (or append) the version segment of `namespace`
    fn set_version_identifier(&self, namespace: &str, version: &VersionIdentifier) -> String;

    fn base_namespace(&self, namespace: &str) -> String;

    /// Versioned namespaces from the current version down to `major.0.0`,
    /// newest first. Empty when `namespace` carries no version.
    fn major_version_chain(&self, namespace: &str) -> Vec<String>;

    /// Namespace of the `major.0.0` release `namespace` belongs to
    fn major_version_namespace(&self, namespace: &str) -> String {
        let version = self.version_identifier(namespace);
        self.set_version_identifier(namespace, &version.major_version())
    }

    /// Default filename for a library published under `namespace`
    fn default_file_hint(&self, namespace: &str, library_name: &str) -> String;

    /// Version encoded in a filename produced by [`default_file_hint`](Self::default_file_hint)
    fn file_version(&self, filename: &str) -> Option<VersionIdentifier>;
}

/// Versions carried as a trailing `/v<major>[_<minor>[_<patch>]]` segment.
///
/// Components are zero-padded to `padding` digits when a namespace is built
/// from scratch; rewriting an existing namespace keeps the padding it already
/// uses. Trailing zero components are omitted (`v01`, `v01_02`, `v01_00_03`).
#[derive(Debug, Clone)]
pub struct NamespaceVersionScheme {
    id: String,
    prefix: String,
    separator: String,
    padding: usize,
    file_extension: String,
    namespace_pattern: Regex,
    file_pattern: Regex,
}

impl NamespaceVersionScheme {
    pub fn new(
        id: impl Into<String>,
        prefix: &str,
        separator: &str,
        padding: usize,
        file_extension: &str,
    ) -> Result<Self> {
        let sep = regex::escape(separator);
        let namespace_pattern = Regex::new(&format!(
            r"^(?P<base>.+)/{prefix}(?P<major>\d+)(?:{sep}(?P<minor>\d+))?(?:{sep}(?P<patch>\d+))?/?$",
            prefix = regex::escape(prefix),
            sep = sep,
        ))?;
        let file_pattern = Regex::new(&format!(
            r"^(?P<name>.+)_(?P<major>\d+)_(?P<minor>\d+)_(?P<patch>\d+)\.{}$",
            regex::escape(file_extension)
        ))?;

        Ok(Self {
            id: id.into(),
            prefix: prefix.to_string(),
            separator: separator.to_string(),
            padding: padding.max(1),
            file_extension: file_extension.to_string(),
            namespace_pattern,
            file_pattern,
        })
    }

    /// `OTM` scheme with `v01_02` style segments and `.otm` files
    pub fn otm() -> Result<Self> {
        Self::new(DEFAULT_SCHEME_ID, "v", "_", 2, "otm")
    }

    fn parse_captures(caps: &Captures<'_>) -> VersionIdentifier {
        let component = |name: &str| {
            caps.name(name)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(0)
        };
        VersionIdentifier::new(component("major"), component("minor"), component("patch"))
    }

    /// Padding in use by an existing version segment, if it can be told.
    ///
    /// A zero-led component (`01`) fixes the width; a component shorter than
    /// the configured width proves the segment is unpadded.
    fn detect_padding(&self, caps: &Captures<'_>) -> Option<usize> {
        let groups: Vec<&str> = ["major", "minor", "patch"]
            .iter()
            .filter_map(|name| caps.name(name).map(|m| m.as_str()))
            .collect();

        if let Some(padded) = groups.iter().find(|g| g.len() > 1 && g.starts_with('0')) {
            return Some(padded.len());
        }
        if groups.iter().any(|g| g.len() < self.padding) {
            return Some(1);
        }
        None
    }

    fn format_segment(&self, version: &VersionIdentifier, width: usize) -> String {
        let pad = |value: u64| format!("{:0width$}", value, width = width);
        let mut segment = format!("{}{}", self.prefix, pad(version.major()));
        if version.patch() > 0 {
            segment.push_str(&self.separator);
            segment.push_str(&pad(version.minor()));
            segment.push_str(&self.separator);
            segment.push_str(&pad(version.patch()));
        } else if version.minor() > 0 {
            segment.push_str(&self.separator);
            segment.push_str(&pad(version.minor()));
        }
        segment
    }
}

impl VersionScheme for NamespaceVersionScheme {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_valid_namespace(&self, namespace: &str) -> bool {
        if !self.namespace_pattern.is_match(namespace) {
            return false;
        }
        let base = self.base_namespace(namespace);
        let version = self.version_identifier(namespace);
        self.set_version_identifier(&base, &version) == namespace
    }

    fn version_identifier(&self, namespace: &str) -> VersionIdentifier {
        match self.namespace_pattern.captures(namespace) {
            Some(caps) => Self::parse_captures(&caps),
            None => self.default_version_identifier(),
        }
    }

    fn set_version_identifier(&self, namespace: &str, version: &VersionIdentifier) -> String {
        let (base, width) = match self.namespace_pattern.captures(namespace) {
            Some(caps) => {
                let width = self.detect_padding(&caps).unwrap_or(self.padding);
                (caps["base"].to_string(), width)
            }
            None => (namespace.trim_end_matches('/').to_string(), self.padding),
        };
        format!("{}/{}", base, self.format_segment(version, width))
    }

    fn base_namespace(&self, namespace: &str) -> String {
        match self.namespace_pattern.captures(namespace) {
            Some(caps) => caps["base"].to_string(),
            None => namespace.to_string(),
        }
    }

    fn major_version_chain(&self, namespace: &str) -> Vec<String> {
        let Some(caps) = self.namespace_pattern.captures(namespace) else {
            return Vec::new();
        };
        let mut current = Self::parse_captures(&caps);
        let mut chain = vec![namespace.to_string()];

        loop {
            let next = match current.decrement_patch() {
                Some(previous) => previous,
                None => match current.decrement_minor() {
                    Some(previous) => previous,
                    None => break,
                },
            };
            chain.push(self.set_version_identifier(namespace, &next));
            current = next;
        }
        chain
    }

    fn default_file_hint(&self, namespace: &str, library_name: &str) -> String {
        let version = self.version_identifier(namespace);
        format!(
            "{}_{}_{}_{}.{}",
            library_name,
            version.major(),
            version.minor(),
            version.patch(),
            self.file_extension
        )
    }

    fn file_version(&self, filename: &str) -> Option<VersionIdentifier> {
        let caps = self.file_pattern.captures(filename)?;
        Some(Self::parse_captures(&caps))
    }
}
