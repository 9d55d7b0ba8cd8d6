//! Arena of live objects produced by a rebind

use super::{
    embedded_reference, EntityHandle, LocationHandle, LookupContext, PolicyHandle, Reference,
};
use crate::error::{PersistError, Result};
use crate::memento::{
    EntityMemento, LocationMemento, MementoBase, MementoBaseBuilder, MementoGraph,
    MementoMap, MementoValue, PolicyMemento,
};
use std::collections::BTreeMap;

/// A rebound entity
#[derive(Debug, Clone)]
pub struct LiveEntity {
    pub(super) base: MementoBase,
    pub(super) parent: Option<EntityHandle>,
    pub(super) children: Vec<EntityHandle>,
    pub(super) members: Vec<EntityHandle>,
    pub(super) locations: Vec<LocationHandle>,
    pub(super) policies: Vec<PolicyHandle>,
    pub(super) config: MementoMap,
    pub(super) attributes: MementoMap,
}

impl LiveEntity {
    pub(super) fn skeleton(id: &str, type_name: &str) -> Self {
        Self {
            base: MementoBaseBuilder::new(id, type_name).build(),
            parent: None,
            children: Vec::new(),
            members: Vec::new(),
            locations: Vec::new(),
            policies: Vec::new(),
            config: MementoMap::new(),
            attributes: MementoMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        self.base.id()
    }

    pub fn type_name(&self) -> &str {
        self.base.type_name()
    }

    pub fn base(&self) -> &MementoBase {
        &self.base
    }

    pub fn parent(&self) -> Option<EntityHandle> {
        self.parent
    }

    pub fn children(&self) -> &[EntityHandle] {
        &self.children
    }

    pub fn members(&self) -> &[EntityHandle] {
        &self.members
    }

    pub fn locations(&self) -> &[LocationHandle] {
        &self.locations
    }

    pub fn policies(&self) -> &[PolicyHandle] {
        &self.policies
    }

    pub fn config(&self) -> &MementoMap {
        &self.config
    }

    pub fn attributes(&self) -> &MementoMap {
        &self.attributes
    }
}

/// A rebound location
#[derive(Debug, Clone)]
pub struct LiveLocation {
    pub(super) base: MementoBase,
    pub(super) parent: Option<LocationHandle>,
    pub(super) children: Vec<LocationHandle>,
}

impl LiveLocation {
    pub(super) fn skeleton(id: &str, type_name: &str) -> Self {
        Self {
            base: MementoBaseBuilder::new(id, type_name).build(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        self.base.id()
    }

    pub fn type_name(&self) -> &str {
        self.base.type_name()
    }

    pub fn base(&self) -> &MementoBase {
        &self.base
    }

    pub fn parent(&self) -> Option<LocationHandle> {
        self.parent
    }

    pub fn children(&self) -> &[LocationHandle] {
        &self.children
    }
}

/// A rebound policy
#[derive(Debug, Clone)]
pub struct LivePolicy {
    pub(super) base: MementoBase,
}

impl LivePolicy {
    pub(super) fn skeleton(id: &str, type_name: &str) -> Self {
        Self {
            base: MementoBaseBuilder::new(id, type_name).build(),
        }
    }

    pub fn id(&self) -> &str {
        self.base.id()
    }

    pub fn type_name(&self) -> &str {
        self.base.type_name()
    }

    pub fn base(&self) -> &MementoBase {
        &self.base
    }
}

/// ID-keyed arena of live objects.
///
/// Objects refer to each other through handles into this arena, so cycles
/// (parent ↔ child) need no shared ownership.
#[derive(Debug, Clone, Default)]
pub struct RebindGraph {
    pub(super) entities: Vec<LiveEntity>,
    pub(super) locations: Vec<LiveLocation>,
    pub(super) policies: Vec<LivePolicy>,
    entity_index: BTreeMap<String, EntityHandle>,
    location_index: BTreeMap<String, LocationHandle>,
    policy_index: BTreeMap<String, PolicyHandle>,
}

impl RebindGraph {
    pub(super) fn register_entity(&mut self, entity: LiveEntity) -> EntityHandle {
        let handle = EntityHandle(self.entities.len());
        self.entity_index.insert(entity.id().to_string(), handle);
        self.entities.push(entity);
        handle
    }

    pub(super) fn register_location(&mut self, location: LiveLocation) -> LocationHandle {
        let handle = LocationHandle(self.locations.len());
        self.location_index.insert(location.id().to_string(), handle);
        self.locations.push(location);
        handle
    }

    pub(super) fn register_policy(&mut self, policy: LivePolicy) -> PolicyHandle {
        let handle = PolicyHandle(self.policies.len());
        self.policy_index.insert(policy.id().to_string(), handle);
        self.policies.push(policy);
        handle
    }

    pub fn entity(&self, handle: EntityHandle) -> &LiveEntity {
        &self.entities[handle.0]
    }

    pub fn location(&self, handle: LocationHandle) -> &LiveLocation {
        &self.locations[handle.0]
    }

    pub fn policy(&self, handle: PolicyHandle) -> &LivePolicy {
        &self.policies[handle.0]
    }

    pub fn entity_by_id(&self, id: &str) -> Option<&LiveEntity> {
        self.entity_index.get(id).map(|h| self.entity(*h))
    }

    pub fn location_by_id(&self, id: &str) -> Option<&LiveLocation> {
        self.location_index.get(id).map(|h| self.location(*h))
    }

    pub fn policy_by_id(&self, id: &str) -> Option<&LivePolicy> {
        self.policy_index.get(id).map(|h| self.policy(*h))
    }

    pub fn entities(&self) -> impl Iterator<Item = &LiveEntity> {
        self.entities.iter()
    }

    pub fn locations(&self) -> impl Iterator<Item = &LiveLocation> {
        self.locations.iter()
    }

    pub fn policies(&self) -> impl Iterator<Item = &LivePolicy> {
        self.policies.iter()
    }

    /// Handles of entities without a parent
    pub fn applications(&self) -> Vec<EntityHandle> {
        (0..self.entities.len())
            .map(EntityHandle)
            .filter(|h| self.entity(*h).parent.is_none())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len() + self.locations.len() + self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a `{"$entityRef": ..}` / `{"$locationRef": ..}` value.
    ///
    /// Returns `Ok(None)` for values that are not references.
    pub fn resolve_reference(&self, value: &MementoValue) -> Result<Option<Reference>> {
        match embedded_reference(value) {
            Some(("entity", id)) => Ok(Some(Reference::Entity(self.lookup_entity(None, id)?))),
            Some((_, id)) => Ok(Some(Reference::Location(self.lookup_location(None, id)?))),
            None => Ok(None),
        }
    }

    /// Convert back into mementos, replacing handles with IDs
    pub fn to_memento(&self) -> MementoGraph {
        let mut graph = MementoGraph::new();

        for location in &self.locations {
            let mut builder = LocationMemento::builder(location.id(), location.type_name())
                .base_fields(&location.base);
            if let Some(parent) = location.parent {
                builder = builder.parent(self.location(parent).id());
            }
            for child in &location.children {
                builder = builder.child(self.location(*child).id());
            }
            graph.add_location(builder.build());
        }

        for entity in &self.entities {
            let mut builder = EntityMemento::builder(entity.id(), entity.type_name())
                .base_fields(&entity.base);
            if let Some(parent) = entity.parent {
                builder = builder.parent(self.entity(parent).id());
            }
            for child in &entity.children {
                builder = builder.child(self.entity(*child).id());
            }
            for member in &entity.members {
                builder = builder.member(self.entity(*member).id());
            }
            for location in &entity.locations {
                builder = builder.location(self.location(*location).id());
            }
            for policy in &entity.policies {
                builder = builder.policy(self.policy(*policy).id());
            }
            for (key, value) in &entity.config {
                builder = builder.config(key.clone(), value.clone());
            }
            for (sensor, value) in &entity.attributes {
                builder = builder.attribute(sensor.clone(), value.clone());
            }
            graph.add_entity(builder.build());
        }

        for policy in &self.policies {
            graph.add_policy(
                PolicyMemento::builder(policy.id(), policy.type_name())
                    .base_fields(&policy.base)
                    .build(),
            );
        }

        graph
    }
}

fn check_type(id: &str, expected: Option<&str>, actual: &str) -> Result<()> {
    match expected {
        Some(expected) if expected != actual => Err(PersistError::TypeMismatch {
            id: id.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }),
        _ => Ok(()),
    }
}

impl LookupContext for RebindGraph {
    fn lookup_entity(&self, expected_type: Option<&str>, id: &str) -> Result<EntityHandle> {
        let handle = *self.entity_index.get(id).ok_or_else(|| PersistError::NotFound {
            kind: "entity",
            id: id.to_string(),
        })?;
        check_type(id, expected_type, self.entity(handle).type_name())?;
        Ok(handle)
    }

    fn lookup_location(&self, expected_type: Option<&str>, id: &str) -> Result<LocationHandle> {
        let handle = *self.location_index.get(id).ok_or_else(|| PersistError::NotFound {
            kind: "location",
            id: id.to_string(),
        })?;
        check_type(id, expected_type, self.location(handle).type_name())?;
        Ok(handle)
    }

    fn lookup_policy(&self, expected_type: Option<&str>, id: &str) -> Result<PolicyHandle> {
        let handle = *self.policy_index.get(id).ok_or_else(|| PersistError::NotFound {
            kind: "policy",
            id: id.to_string(),
        })?;
        check_type(id, expected_type, self.policy(handle).type_name())?;
        Ok(handle)
    }
}
