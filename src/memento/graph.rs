//! Full snapshot of all persisted mementos

use super::{EntityMemento, LocationMemento, Memento, MementoDelta, MementoKind, PolicyMemento};
use std::collections::BTreeMap;

/// Every memento of every kind, keyed by ID.
///
/// This is what a checkpoint writes and what a load returns. Cross
/// references are plain IDs and are not checked here.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MementoGraph {
    entities: BTreeMap<String, EntityMemento>,
    locations: BTreeMap<String, LocationMemento>,
    policies: BTreeMap<String, PolicyMemento>,
}

impl MementoGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity memento
    pub fn add_entity(&mut self, memento: EntityMemento) {
        self.entities.insert(memento.id().to_string(), memento);
    }

    pub fn add_location(&mut self, memento: LocationMemento) {
        self.locations.insert(memento.id().to_string(), memento);
    }

    pub fn add_policy(&mut self, memento: PolicyMemento) {
        self.policies.insert(memento.id().to_string(), memento);
    }

    pub fn with_entity(mut self, memento: EntityMemento) -> Self {
        self.add_entity(memento);
        self
    }

    pub fn with_location(mut self, memento: LocationMemento) -> Self {
        self.add_location(memento);
        self
    }

    pub fn with_policy(mut self, memento: PolicyMemento) -> Self {
        self.add_policy(memento);
        self
    }

    pub fn remove_entity(&mut self, id: &str) -> Option<EntityMemento> {
        self.entities.remove(id)
    }

    pub fn remove_location(&mut self, id: &str) -> Option<LocationMemento> {
        self.locations.remove(id)
    }

    pub fn remove_policy(&mut self, id: &str) -> Option<PolicyMemento> {
        self.policies.remove(id)
    }

    pub fn entity(&self, id: &str) -> Option<&EntityMemento> {
        self.entities.get(id)
    }

    pub fn location(&self, id: &str) -> Option<&LocationMemento> {
        self.locations.get(id)
    }

    pub fn policy(&self, id: &str) -> Option<&PolicyMemento> {
        self.policies.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityMemento> {
        self.entities.values()
    }

    pub fn locations(&self) -> impl Iterator<Item = &LocationMemento> {
        self.locations.values()
    }

    pub fn policies(&self) -> impl Iterator<Item = &PolicyMemento> {
        self.policies.values()
    }

    /// IDs of the given kind in ascending order
    pub fn ids(&self, kind: MementoKind) -> Vec<&str> {
        match kind {
            MementoKind::Entity => self.entities.keys().map(String::as_str).collect(),
            MementoKind::Location => self.locations.keys().map(String::as_str).collect(),
            MementoKind::Policy => self.policies.keys().map(String::as_str).collect(),
        }
    }

    /// Number of mementos of the given kind
    pub fn count(&self, kind: MementoKind) -> usize {
        match kind {
            MementoKind::Entity => self.entities.len(),
            MementoKind::Location => self.locations.len(),
            MementoKind::Policy => self.policies.len(),
        }
    }

    /// IDs of entities without a parent
    pub fn application_ids(&self) -> Vec<&str> {
        self.entities()
            .filter(|e| e.is_top_level())
            .map(|e| e.id())
            .collect()
    }

    /// IDs of locations without a parent
    pub fn top_level_location_ids(&self) -> Vec<&str> {
        self.locations()
            .filter(|l| l.parent().is_none())
            .map(|l| l.id())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.locations.is_empty() && self.policies.is_empty()
    }

    /// Apply a delta in place: all upserts first, then all removals
    pub fn apply_delta(&mut self, delta: &MementoDelta) {
        for location in &delta.locations {
            self.add_location(location.clone());
        }
        for entity in &delta.entities {
            self.add_entity(entity.clone());
        }
        for policy in &delta.policies {
            self.add_policy(policy.clone());
        }

        for id in &delta.removed_location_ids {
            self.locations.remove(id);
        }
        for id in &delta.removed_entity_ids {
            self.entities.remove(id);
        }
        for id in &delta.removed_policy_ids {
            self.policies.remove(id);
        }
    }
}
