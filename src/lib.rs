//! Model Library Repository
//!
//! A shared, lock-managed repository for versioned schema model libraries.
//! Every accepted change is persisted as one atomic commit in a backing
//! version-control system.
//!
//! ## Features
//!
//! - **Namespace Versioning**: Versions encoded in namespace URIs (`.../v01_02`)
//! - **Managed Lifecycle**: DRAFT → UNDER_REVIEW → FINAL → OBSOLETE with check-out locks
//! - **Atomic Change Sets**: Commit or roll back working-copy edits as a unit
//! - **Checksum Validation**: SHA256 checksums frozen on promotion
//! - **Version-Aware Navigation**: Dependency closures include earlier library versions
//!
//! ## Architecture
//!
//! ```text
//! <root>/                       working copy of the backing store
//! └── libraries/
//!     └── www.example.org/ns/Travel@<digest>/
//!         ├── 1.0.0/
//!         │   ├── Travel_1_0_0.otm
//!         │   └── Travel_1_0_0.otm.item.json
//!         └── 1.1.0/
//! ```

pub mod checksum;
pub mod config;
pub mod error;
pub mod events;
pub mod item;
pub mod manager;
pub mod metadata;
pub mod model;
pub mod sync;
pub mod version;

pub use checksum::Checksum;
pub use config::RepositoryConfig;
pub use error::{RepositoryError, Result};
pub use events::{RepositoryEvent, RepositoryListener};
pub use item::{IntegrityReport, ItemKey, LibraryStatus, RepositoryItem, RepositoryItemState};
pub use manager::{PublishRequest, RepositoryManager};
pub use metadata::MetadataStore;
pub use model::{
    DependencyClosure, DependencyNavigator, EntityKind, Library, LibraryKey, Model, ModelGraph,
    WalkControl,
};
pub use sync::{ChangeSet, ChangeSetSynchronizer, CommitGate, RepositoryHealth, VersionControl};
pub use version::{
    VersionComparator, VersionIdentifier, VersionScheme, VersionSchemeRegistry, Versioned,
};
