//! Dependency closure computation
//!
//! Starting from root entities, the navigator visits every entity they
//! transitively depend on together with the owning library of each visited
//! entity and all of that library's named members. For every library it
//! reaches, the earlier versions of its major-version chain that are loaded in
//! the model are added as well. Their members are reported but their
//! dependencies are not followed.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::{EntityId, LibraryId, LibraryKey, ModelGraph};
use crate::version::VersionSchemeRegistry;

/// What a visit function wants the traversal to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkControl {
    #[default]
    Continue,
    /// Do not descend below the current node
    SkipChildren,
    /// End the whole traversal
    Stop,
}

/// Depth-first walk over entity dependencies.
///
/// Each reachable entity is visited at most once; `visit` receives the entity
/// and its depth from the nearest root.
pub fn walk<M, F>(model: &M, roots: &[EntityId], mut visit: F)
where
    M: ModelGraph + ?Sized,
    F: FnMut(EntityId, usize) -> WalkControl,
{
    let mut visited = HashSet::new();
    let mut stack: Vec<(EntityId, usize)> = roots.iter().rev().map(|&id| (id, 0)).collect();

    while let Some((entity, depth)) = stack.pop() {
        if !visited.insert(entity) {
            continue;
        }
        match visit(entity, depth) {
            WalkControl::Stop => return,
            WalkControl::SkipChildren => continue,
            WalkControl::Continue => {}
        }
        let deps = model.dependencies(entity);
        stack.extend(deps.into_iter().rev().map(|dep| (dep, depth + 1)));
    }
}

/// Reported to the visit function of [`DependencyNavigator::navigate_with`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationEvent {
    Library {
        id: LibraryId,
        /// Reached through a later version's chain
        historical: bool,
    },
    Entity {
        id: EntityId,
        /// Dependencies of this entity will be followed
        expanded: bool,
    },
}

/// Libraries and entities reached by one navigation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyClosure {
    libraries: Vec<LibraryId>,
    entities: Vec<EntityId>,
    historical: HashSet<LibraryId>,
    expanded: HashSet<EntityId>,
}

impl DependencyClosure {
    /// Libraries in visit order
    pub fn libraries(&self) -> &[LibraryId] {
        &self.libraries
    }

    /// Entities in visit order
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    pub fn contains_library(&self, id: LibraryId) -> bool {
        self.libraries.contains(&id)
    }

    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.entities.contains(&id)
    }

    /// Whether the library was only pulled in as an earlier chain version
    pub fn is_historical(&self, id: LibraryId) -> bool {
        self.historical.contains(&id)
    }

    pub fn is_expanded(&self, id: EntityId) -> bool {
        self.expanded.contains(&id)
    }
}

/// Pending step of a navigation, kept on an explicit stack
#[derive(Debug, Clone, Copy)]
enum Step {
    Entity(EntityId),
    Library(LibraryId),
    /// Earlier chain versions of an already visited library
    Chain(LibraryId),
    Dependencies(EntityId),
}

struct Traversal<'v> {
    closure: DependencyClosure,
    visited_libraries: HashSet<LibraryKey>,
    reported: HashSet<EntityId>,
    stack: Vec<Step>,
    stopped: bool,
    visit: &'v mut dyn FnMut(NavigationEvent) -> WalkControl,
}

impl Traversal<'_> {
    fn emit(&mut self, event: NavigationEvent) -> WalkControl {
        let control = (self.visit)(event);
        if control == WalkControl::Stop {
            self.stopped = true;
        }
        control
    }

    fn report_entity(&mut self, id: EntityId, expanded: bool) -> WalkControl {
        if self.reported.insert(id) {
            self.closure.entities.push(id);
        }
        if expanded {
            self.closure.expanded.insert(id);
        }
        self.emit(NavigationEvent::Entity { id, expanded })
    }

    /// Push entities so the first one is handled next
    fn push_entities(&mut self, entities: Vec<EntityId>) {
        self.stack.extend(entities.into_iter().rev().map(Step::Entity));
    }
}

/// Computes dependency closures that include earlier library versions
pub struct DependencyNavigator<'a, M: ModelGraph + ?Sized> {
    model: &'a M,
    schemes: &'a VersionSchemeRegistry,
}

impl<'a, M: ModelGraph + ?Sized> DependencyNavigator<'a, M> {
    pub fn new(model: &'a M, schemes: &'a VersionSchemeRegistry) -> Self {
        Self { model, schemes }
    }

    pub fn navigate(&self, roots: &[EntityId]) -> DependencyClosure {
        self.navigate_with(roots, |_| WalkControl::Continue)
    }

    /// Navigate from `roots`, reporting every library and entity to `visit`.
    ///
    /// `SkipChildren` on a library skips its members and chain; on an entity
    /// it leaves the entity's dependencies unvisited.
    pub fn navigate_with<F>(&self, roots: &[EntityId], mut visit: F) -> DependencyClosure
    where
        F: FnMut(NavigationEvent) -> WalkControl,
    {
        let mut traversal = Traversal {
            closure: DependencyClosure::default(),
            visited_libraries: HashSet::new(),
            reported: HashSet::new(),
            stack: Vec::new(),
            stopped: false,
            visit: &mut visit,
        };
        traversal.push_entities(roots.to_vec());

        while let Some(step) = traversal.stack.pop() {
            match step {
                Step::Entity(id) => self.navigate_entity(&mut traversal, id),
                Step::Library(id) => self.navigate_library(&mut traversal, id),
                Step::Chain(id) => self.navigate_chain(&mut traversal, id),
                Step::Dependencies(id) => {
                    let dependencies = self.model.dependencies(id);
                    traversal.push_entities(dependencies);
                }
            }
            if traversal.stopped {
                break;
            }
        }

        debug!(
            libraries = traversal.closure.libraries.len(),
            entities = traversal.closure.entities.len(),
            "dependency navigation complete"
        );
        traversal.closure
    }

    /// Report an entity, then queue its owning library ahead of its dependencies
    fn navigate_entity(&self, traversal: &mut Traversal<'_>, entity: EntityId) {
        if traversal.closure.expanded.contains(&entity) {
            return;
        }
        let Some(owner) = self.model.entity(entity).map(|e| e.library) else {
            warn!(?entity, "dependency refers to an entity missing from the model");
            return;
        };

        match traversal.report_entity(entity, true) {
            WalkControl::Stop => return,
            WalkControl::SkipChildren => {}
            WalkControl::Continue => traversal.stack.push(Step::Dependencies(entity)),
        }
        traversal.stack.push(Step::Library(owner));
    }

    /// First visit of a library: siblings, then earlier chain versions
    fn navigate_library(&self, traversal: &mut Traversal<'_>, id: LibraryId) {
        let Some(library) = self.model.library(id) else {
            return;
        };
        if !traversal.visited_libraries.insert(library.key()) {
            return;
        }
        traversal.closure.libraries.push(id);
        match traversal.emit(NavigationEvent::Library { id, historical: false }) {
            WalkControl::Stop | WalkControl::SkipChildren => return,
            WalkControl::Continue => {}
        }

        traversal.stack.push(Step::Chain(id));
        traversal.push_entities(self.model.named_members(id));
    }

    fn navigate_chain(&self, traversal: &mut Traversal<'_>, id: LibraryId) {
        let Some(library) = self.model.library(id) else {
            return;
        };
        let chain = match self.schemes.get(&library.version_scheme) {
            Ok(scheme) => scheme.major_version_chain(&library.namespace),
            Err(err) => {
                warn!(library = %library.key(), error = %err, "cannot resolve version chain");
                return;
            }
        };
        for namespace in chain.into_iter().skip(1) {
            let key = LibraryKey::new(namespace, &library.name);
            let Some(previous) = self.model.library_by_key(&key) else {
                continue;
            };
            self.include_historical(traversal, previous, key);
            if traversal.stopped {
                return;
            }
        }
    }

    fn include_historical(&self, traversal: &mut Traversal<'_>, id: LibraryId, key: LibraryKey) {
        if !traversal.visited_libraries.insert(key) {
            return;
        }
        traversal.closure.libraries.push(id);
        traversal.closure.historical.insert(id);
        match traversal.emit(NavigationEvent::Library { id, historical: true }) {
            WalkControl::Stop | WalkControl::SkipChildren => return,
            WalkControl::Continue => {}
        }

        for member in self.model.named_members(id) {
            if traversal.closure.expanded.contains(&member) {
                continue;
            }
            if traversal.report_entity(member, false) == WalkControl::Stop {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityKind, Library, Model};
    use crate::version::NamespaceVersionScheme;

    fn chain_model() -> (Model, EntityId, LibraryId, LibraryId) {
        let scheme = NamespaceVersionScheme::otm().unwrap();
        let mut model = Model::new();
        let v1 = model.add_library(Library::new(
            &scheme,
            "http://example.org/ns/Travel/v1",
            "Travel",
        ));
        let v1_1 = model.add_library(Library::new(
            &scheme,
            "http://example.org/ns/Travel/v1_1",
            "Travel",
        ));
        let root = model.add_entity(v1_1, "Trip", EntityKind::BusinessObject).unwrap();
        (model, root, v1, v1_1)
    }

    #[test]
    fn test_walk_visits_each_entity_once() {
        let scheme = NamespaceVersionScheme::otm().unwrap();
        let mut model = Model::new();
        let lib = model.add_library(Library::new(&scheme, "http://example.org/ns/A/v01", "A"));
        let a = model.add_entity(lib, "A", EntityKind::CoreObject).unwrap();
        let b = model.add_entity(lib, "B", EntityKind::CoreObject).unwrap();
        let c = model.add_entity(lib, "C", EntityKind::SimpleType).unwrap();
        model.add_dependency(a, b);
        model.add_dependency(b, a);
        model.add_dependency(b, c);

        let mut seen = Vec::new();
        walk(&model, &[a], |id, depth| {
            seen.push((id, depth));
            WalkControl::Continue
        });
        assert_eq!(seen, vec![(a, 0), (b, 1), (c, 2)]);

        let mut seen = Vec::new();
        walk(&model, &[a], |id, _| {
            seen.push(id);
            if id == b {
                WalkControl::SkipChildren
            } else {
                WalkControl::Continue
            }
        });
        assert_eq!(seen, vec![a, b]);

        let mut count = 0;
        walk(&model, &[a], |_, _| {
            count += 1;
            WalkControl::Stop
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn test_empty_earlier_version_is_included() {
        let (model, root, v1, v1_1) = chain_model();
        let schemes = VersionSchemeRegistry::default();
        let closure = DependencyNavigator::new(&model, &schemes).navigate(&[root]);

        assert_eq!(closure.libraries(), &[v1_1, v1]);
        assert!(closure.is_historical(v1));
        assert!(!closure.is_historical(v1_1));
    }

    #[test]
    fn test_historical_members_are_not_expanded() {
        let (mut model, root, v1, _) = chain_model();
        let old = model.add_entity(v1, "Trip", EntityKind::BusinessObject).unwrap();
        let scheme = NamespaceVersionScheme::otm().unwrap();
        let other = model.add_library(Library::new(
            &scheme,
            "http://example.org/ns/Common/v01",
            "Common",
        ));
        let only_old_uses = model.add_entity(other, "Legacy", EntityKind::SimpleType).unwrap();
        model.add_dependency(old, only_old_uses);

        let schemes = VersionSchemeRegistry::default();
        let closure = DependencyNavigator::new(&model, &schemes).navigate(&[root]);

        assert!(closure.contains_entity(old));
        assert!(!closure.is_expanded(old));
        assert!(!closure.contains_entity(only_old_uses));
        assert!(!closure.contains_library(other));
    }

    #[test]
    fn test_siblings_and_dependencies_are_expanded() {
        let scheme = NamespaceVersionScheme::otm().unwrap();
        let mut model = Model::new();
        let travel = model.add_library(Library::new(
            &scheme,
            "http://example.org/ns/Travel/v01",
            "Travel",
        ));
        let common = model.add_library(Library::new(
            &scheme,
            "http://example.org/ns/Common/v01",
            "Common",
        ));
        let trip = model.add_entity(travel, "Trip", EntityKind::BusinessObject).unwrap();
        let sibling = model.add_entity(travel, "Leg", EntityKind::CoreObject).unwrap();
        let code = model.add_entity(common, "Code", EntityKind::SimpleType).unwrap();
        let back = model.add_entity(common, "Back", EntityKind::CoreObject).unwrap();
        model.add_dependency(sibling, code);
        model.add_dependency(back, trip);

        let schemes = VersionSchemeRegistry::default();
        let closure = DependencyNavigator::new(&model, &schemes).navigate(&[trip]);

        assert_eq!(closure.libraries(), &[travel, common]);
        for entity in [trip, sibling, code, back] {
            assert!(closure.is_expanded(entity));
        }
        assert_eq!(closure.entities().len(), 4);
    }

    #[test]
    fn test_stop_ends_navigation() {
        let (model, root, _, _) = chain_model();
        let schemes = VersionSchemeRegistry::default();
        let mut events = 0;
        let closure = DependencyNavigator::new(&model, &schemes).navigate_with(&[root], |_| {
            events += 1;
            WalkControl::Stop
        });
        assert_eq!(events, 1);
        assert_eq!(closure.entities(), &[root]);
        assert!(closure.libraries().is_empty());
    }

    #[test]
    fn test_long_dependency_chain() {
        let scheme = NamespaceVersionScheme::otm().unwrap();
        let mut model = Model::new();
        let lib = model.add_library(Library::new(
            &scheme,
            "http://example.org/ns/Deep/v01",
            "Deep",
        ));
        let entities: Vec<EntityId> = (0..10_000)
            .map(|i| model.add_entity(lib, format!("E{}", i), EntityKind::CoreObject).unwrap())
            .collect();
        for pair in entities.windows(2) {
            model.add_dependency(pair[0], pair[1]);
        }

        let schemes = VersionSchemeRegistry::default();
        let closure = DependencyNavigator::new(&model, &schemes).navigate(&[entities[0]]);
        assert_eq!(closure.libraries(), &[lib]);
        assert_eq!(closure.entities().len(), entities.len());
        assert!(entities.iter().all(|&id| closure.is_expanded(id)));

        let mut depth = 0;
        walk(&model, &[entities[0]], |_, d| {
            depth = depth.max(d);
            WalkControl::Continue
        });
        assert_eq!(depth, entities.len() - 1);
    }
}
