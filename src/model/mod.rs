//! In-memory library model
//!
//! Libraries own entities; entities depend on other entities, possibly in
//! other libraries. Dependencies are held in a petgraph `DiGraph` so cycles
//! between libraries are representable.
//!
//! The [`navigator`] computes dependency closures over any [`ModelGraph`].

pub mod navigator;

pub use navigator::{walk, DependencyClosure, DependencyNavigator, NavigationEvent, WalkControl};

use std::collections::HashMap;
use std::fmt;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::item::RepositoryItem;
use crate::version::{VersionIdentifier, VersionScheme, Versioned};

/// Stable identity of a library: `(namespace, name)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LibraryKey {
    pub namespace: String,
    pub name: String,
}

impl LibraryKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for LibraryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LibraryId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(NodeIndex);

/// What an entity is, with the data specific to that kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKind {
    SimpleType,
    Enumeration { literals: Vec<String>, open: bool },
    ValueWithAttributes,
    CoreObject,
    BusinessObject,
    ChoiceObject,
    Service { operations: Vec<String> },
    Resource,
    /// Part of another entity rather than a member of the library itself
    Facet { owner: String },
}

impl EntityKind {
    /// Named members are listed directly by their library
    pub fn is_named_member(&self) -> bool {
        !matches!(self, EntityKind::Facet { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub name: String,
    pub library: LibraryId,
    pub kind: EntityKind,
}

/// A library loaded into the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    pub name: String,
    pub namespace: String,
    pub base_namespace: String,
    pub version: VersionIdentifier,
    pub version_scheme: String,
    members: Vec<EntityId>,
}

impl Library {
    /// Library whose base namespace and version are derived by `scheme`
    pub fn new(
        scheme: &dyn VersionScheme,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let namespace = namespace.into();
        Self {
            name: name.into(),
            base_namespace: scheme.base_namespace(&namespace),
            version: scheme.version_identifier(&namespace),
            version_scheme: scheme.id().to_string(),
            namespace,
            members: Vec::new(),
        }
    }

    pub fn key(&self) -> LibraryKey {
        LibraryKey::new(&self.namespace, &self.name)
    }

    /// Every entity owned by the library, facets included
    pub fn members(&self) -> &[EntityId] {
        &self.members
    }
}

impl From<&RepositoryItem> for Library {
    fn from(item: &RepositoryItem) -> Self {
        Self {
            name: item.library_name.clone(),
            namespace: item.namespace.clone(),
            base_namespace: item.base_namespace.clone(),
            version: item.version.clone(),
            version_scheme: item.version_scheme.clone(),
            members: Vec::new(),
        }
    }
}

impl Versioned for Library {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn base_namespace(&self) -> &str {
        &self.base_namespace
    }

    fn version(&self) -> &VersionIdentifier {
        &self.version
    }

    fn version_scheme(&self) -> &str {
        &self.version_scheme
    }
}

/// Read access the navigator needs from a loaded model
pub trait ModelGraph {
    fn library(&self, id: LibraryId) -> Option<&Library>;

    fn library_by_key(&self, key: &LibraryKey) -> Option<LibraryId>;

    fn entity(&self, id: EntityId) -> Option<&Entity>;

    /// Named members of `library` in declaration order
    fn named_members(&self, library: LibraryId) -> Vec<EntityId>;

    /// Entities `entity` directly depends on
    fn dependencies(&self, entity: EntityId) -> Vec<EntityId>;
}

/// Libraries, entities and the dependency graph between entities
#[derive(Debug, Clone, Default)]
pub struct Model {
    libraries: Vec<Library>,
    by_key: HashMap<LibraryKey, LibraryId>,
    graph: DiGraph<Entity, ()>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `library`, or return the id of the library already loaded under
    /// the same key
    pub fn add_library(&mut self, library: Library) -> LibraryId {
        let key = library.key();
        if let Some(&id) = self.by_key.get(&key) {
            return id;
        }
        let id = LibraryId(self.libraries.len());
        self.libraries.push(library);
        self.by_key.insert(key, id);
        id
    }

    /// Add an entity owned by `library`.
    ///
    /// Returns `None` if `library` is not part of this model.
    pub fn add_entity(
        &mut self,
        library: LibraryId,
        name: impl Into<String>,
        kind: EntityKind,
    ) -> Option<EntityId> {
        let owner = self.libraries.get_mut(library.0)?;
        let id = EntityId(self.graph.add_node(Entity {
            name: name.into(),
            library,
            kind,
        }));
        owner.members.push(id);
        Some(id)
    }

    /// Record that `from` depends on `to`; repeated calls add one edge
    pub fn add_dependency(&mut self, from: EntityId, to: EntityId) {
        self.graph.update_edge(from.0, to.0, ());
    }

    pub fn entity_by_name(&self, library: LibraryId, name: &str) -> Option<EntityId> {
        let library = self.libraries.get(library.0)?;
        library
            .members
            .iter()
            .copied()
            .find(|id| self.graph[id.0].name == name)
    }

    pub fn libraries(&self) -> impl Iterator<Item = (LibraryId, &Library)> {
        self.libraries
            .iter()
            .enumerate()
            .map(|(idx, library)| (LibraryId(idx), library))
    }

    pub fn library_count(&self) -> usize {
        self.libraries.len()
    }

    pub fn entity_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Entities that depend on `entity`
    pub fn dependents(&self, entity: EntityId) -> Vec<EntityId> {
        self.graph
            .edges_directed(entity.0, Direction::Incoming)
            .map(|edge| EntityId(edge.source()))
            .collect()
    }
}

impl ModelGraph for Model {
    fn library(&self, id: LibraryId) -> Option<&Library> {
        self.libraries.get(id.0)
    }

    fn library_by_key(&self, key: &LibraryKey) -> Option<LibraryId> {
        self.by_key.get(key).copied()
    }

    fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.graph.node_weight(id.0)
    }

    fn named_members(&self, library: LibraryId) -> Vec<EntityId> {
        let Some(library) = self.libraries.get(library.0) else {
            return Vec::new();
        };
        library
            .members
            .iter()
            .copied()
            .filter(|id| self.graph[id.0].kind.is_named_member())
            .collect()
    }

    fn dependencies(&self, entity: EntityId) -> Vec<EntityId> {
        let mut deps: Vec<EntityId> = self
            .graph
            .edges_directed(entity.0, Direction::Outgoing)
            .map(|edge| EntityId(edge.target()))
            .collect();
        // petgraph yields edges newest first
        deps.reverse();
        deps
    }
}
