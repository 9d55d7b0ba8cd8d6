//! Incremental changes to persisted mementos

use super::{EntityMemento, LocationMemento, Memento, MementoKind, PolicyMemento};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A batch of upserts and removals, decomposed per kind.
///
/// A delta need not be a complete graph: it may reference IDs that only
/// arrive in a later delta. When the same ID is both upserted and removed,
/// the removal is applied last and wins.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MementoDelta {
    #[serde(default)]
    pub locations: Vec<LocationMemento>,
    #[serde(default)]
    pub entities: Vec<EntityMemento>,
    #[serde(default)]
    pub policies: Vec<PolicyMemento>,
    #[serde(default)]
    pub removed_location_ids: BTreeSet<String>,
    #[serde(default)]
    pub removed_entity_ids: BTreeSet<String>,
    #[serde(default)]
    pub removed_policy_ids: BTreeSet<String>,
}

impl MementoDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, memento: EntityMemento) -> Self {
        self.entities.push(memento);
        self
    }

    pub fn with_location(mut self, memento: LocationMemento) -> Self {
        self.locations.push(memento);
        self
    }

    pub fn with_policy(mut self, memento: PolicyMemento) -> Self {
        self.policies.push(memento);
        self
    }

    pub fn remove_entity(mut self, id: impl Into<String>) -> Self {
        self.removed_entity_ids.insert(id.into());
        self
    }

    pub fn remove_location(mut self, id: impl Into<String>) -> Self {
        self.removed_location_ids.insert(id.into());
        self
    }

    pub fn remove_policy(mut self, id: impl Into<String>) -> Self {
        self.removed_policy_ids.insert(id.into());
        self
    }

    /// Removed IDs of the given kind
    pub fn removed_ids(&self, kind: MementoKind) -> &BTreeSet<String> {
        match kind {
            MementoKind::Entity => &self.removed_entity_ids,
            MementoKind::Location => &self.removed_location_ids,
            MementoKind::Policy => &self.removed_policy_ids,
        }
    }

    /// IDs upserted for the given kind, in delta order
    pub fn upserted_ids(&self, kind: MementoKind) -> Vec<&str> {
        match kind {
            MementoKind::Entity => self.entities.iter().map(|m| m.id()).collect(),
            MementoKind::Location => self.locations.iter().map(|m| m.id()).collect(),
            MementoKind::Policy => self.policies.iter().map(|m| m.id()).collect(),
        }
    }

    /// Total number of upserts and removals
    pub fn len(&self) -> usize {
        self.entities.len()
            + self.locations.len()
            + self.policies.len()
            + self.removed_entity_ids.len()
            + self.removed_location_ids.len()
            + self.removed_policy_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
