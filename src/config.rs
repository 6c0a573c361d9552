//! Configuration management for the model repository
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (repository.toml)
//! - Environment variables (REPOSITORY__*)
//!
//! ## Example config file (repository.toml):
//! ```toml
//! [repository]
//! root = "./repository"
//! id = "local-repository"
//! display_name = "Local Library Repository"
//!
//! [backend]
//! kind = "git"
//! author_email = "repository@example.org"
//! commit_timeout_ms = 30000
//!
//! [versioning]
//! default_scheme = "OTM"
//! version_prefix = "v"
//! separator = "_"
//! padding = 2
//! file_extension = "otm"
//!
//! [security]
//! administrators = ["admin"]
//!
//! [sync]
//! strict_registration = false
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Repository identity and location
    #[serde(default)]
    pub repository: RepositorySection,

    /// Backing version-control settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Namespace versioning settings
    #[serde(default)]
    pub versioning: VersioningConfig,

    /// Access control
    #[serde(default)]
    pub security: SecurityConfig,

    /// Change-set synchronization settings
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Repository identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySection {
    /// Path to the repository root (working copy)
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Identifier recorded on every repository item
    #[serde(default = "default_repository_id")]
    pub id: String,

    /// Human readable name
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Which backing store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Git working copy via libgit2
    #[default]
    Git,
    /// Plain directory with no version history
    Local,
}

/// Backing store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// Email used for commit signatures
    #[serde(default = "default_author_email")]
    pub author_email: String,

    /// Maximum wait for the commit gate; unset waits indefinitely
    #[serde(default)]
    pub commit_timeout_ms: Option<u64>,
}

/// Version scheme configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersioningConfig {
    /// Scheme assigned to newly published items
    #[serde(default = "default_scheme")]
    pub default_scheme: String,

    /// Leading marker of the version segment (`v` in `/v01_02`)
    #[serde(default = "default_version_prefix")]
    pub version_prefix: String,

    /// Separator between version components
    #[serde(default = "default_separator")]
    pub separator: String,

    /// Zero-padding width for newly built version segments
    #[serde(default = "default_padding")]
    pub padding: usize,

    /// Extension of versioned library filenames
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
}

/// Access control configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    /// Users allowed to demote items and break other users' locks
    #[serde(default)]
    pub administrators: Vec<String>,
}

/// Synchronizer configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    /// Abort a commit when registering an ancestor directory fails,
    /// instead of logging and continuing
    #[serde(default)]
    pub strict_registration: bool,
}

// Default value functions
fn default_root() -> PathBuf {
    PathBuf::from("./repository")
}

fn default_repository_id() -> String {
    "local-repository".to_string()
}

fn default_author_email() -> String {
    "repository@localhost".to_string()
}

fn default_scheme() -> String {
    crate::version::DEFAULT_SCHEME_ID.to_string()
}

fn default_version_prefix() -> String {
    "v".to_string()
}

fn default_separator() -> String {
    "_".to_string()
}

fn default_padding() -> usize {
    2
}

fn default_file_extension() -> String {
    "otm".to_string()
}

impl Default for RepositorySection {
    fn default() -> Self {
        Self {
            root: default_root(),
            id: default_repository_id(),
            display_name: None,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Git,
            author_email: default_author_email(),
            commit_timeout_ms: None,
        }
    }
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            default_scheme: default_scheme(),
            version_prefix: default_version_prefix(),
            separator: default_separator(),
            padding: default_padding(),
            file_extension: default_file_extension(),
        }
    }
}

impl BackendConfig {
    pub fn commit_timeout(&self) -> Option<Duration> {
        self.commit_timeout_ms.map(Duration::from_millis)
    }
}

impl SecurityConfig {
    pub fn is_administrator(&self, user: &str) -> bool {
        self.administrators.iter().any(|admin| admin == user)
    }
}

impl RepositoryConfig {
    /// Configuration rooted at `root` with every other setting defaulted
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.repository.root = root.into();
        config
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = [
            "repository.toml",
            ".repository.toml",
            "config/repository.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) =
            directories::ProjectDirs::from("org", "model-repository", "repository")
        {
            let xdg_config = config_dir.config_dir().join("repository.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // REPOSITORY__BACKEND__KIND=local etc.
        builder = builder.add_source(
            Environment::with_prefix("REPOSITORY")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("security.administrators")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get the repository root (resolves relative paths)
    pub fn root_path(&self) -> PathBuf {
        if self.repository.root.is_absolute() {
            self.repository.root.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.repository.root)
        }
    }
}
