//! Notifications emitted after successful repository mutations

use serde::Serialize;

use crate::item::{ItemKey, LibraryStatus};

/// A completed repository mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RepositoryEvent {
    Published {
        key: ItemKey,
        user: String,
    },
    Locked {
        key: ItemKey,
        user: String,
    },
    Unlocked {
        key: ItemKey,
        user: String,
        kept_changes: bool,
    },
    Committed {
        key: ItemKey,
        user: String,
        revision: Option<String>,
    },
    Reverted {
        key: ItemKey,
        user: String,
    },
    StatusChanged {
        key: ItemKey,
        user: String,
        from: LibraryStatus,
        to: LibraryStatus,
    },
    Deleted {
        key: ItemKey,
        user: String,
    },
}

impl RepositoryEvent {
    pub fn key(&self) -> &ItemKey {
        match self {
            RepositoryEvent::Published { key, .. }
            | RepositoryEvent::Locked { key, .. }
            | RepositoryEvent::Unlocked { key, .. }
            | RepositoryEvent::Committed { key, .. }
            | RepositoryEvent::Reverted { key, .. }
            | RepositoryEvent::StatusChanged { key, .. }
            | RepositoryEvent::Deleted { key, .. } => key,
        }
    }
}

/// Receives [`RepositoryEvent`]s synchronously, after the mutation is durable.
///
/// Listeners run on the caller's thread and must not call back into the
/// repository manager.
pub trait RepositoryListener: Send + Sync {
    fn on_event(&self, event: &RepositoryEvent);
}
