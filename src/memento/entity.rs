//! Entity mementos

use super::{base_builder_methods, Memento, MementoBase, MementoBaseBuilder, MementoKind, MementoMap, MementoValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Persisted state of one entity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityMemento {
    #[serde(flatten)]
    base: MementoBase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    #[serde(default)]
    children: Vec<String>,
    #[serde(default)]
    members: Vec<String>,
    #[serde(default)]
    locations: BTreeSet<String>,
    #[serde(default)]
    policies: BTreeSet<String>,
    #[serde(default)]
    config: MementoMap,
    #[serde(default)]
    attributes: MementoMap,
}

impl EntityMemento {
    pub fn builder(id: impl Into<String>, type_name: impl Into<String>) -> EntityMementoBuilder {
        EntityMementoBuilder::new(id, type_name)
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Child entity IDs, in the order they were added
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Group member IDs, in the order they were added
    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn locations(&self) -> &BTreeSet<String> {
        &self.locations
    }

    pub fn policies(&self) -> &BTreeSet<String> {
        &self.policies
    }

    /// Config key name → value
    pub fn config(&self) -> &MementoMap {
        &self.config
    }

    /// Sensor name → last published value
    pub fn attributes(&self) -> &MementoMap {
        &self.attributes
    }

    /// Whether this entity is the root of an application
    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }
}

impl Memento for EntityMemento {
    const KIND: MementoKind = MementoKind::Entity;

    fn base(&self) -> &MementoBase {
        &self.base
    }
}

/// Builder for [`EntityMemento`]
#[derive(Clone, Debug)]
pub struct EntityMementoBuilder {
    base: MementoBaseBuilder,
    parent: Option<String>,
    children: Vec<String>,
    members: Vec<String>,
    locations: BTreeSet<String>,
    policies: BTreeSet<String>,
    config: MementoMap,
    attributes: MementoMap,
}

impl EntityMementoBuilder {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            base: MementoBaseBuilder::new(id, type_name),
            parent: None,
            children: Vec::new(),
            members: Vec::new(),
            locations: BTreeSet::new(),
            policies: BTreeSet::new(),
            config: MementoMap::new(),
            attributes: MementoMap::new(),
        }
    }

    /// Start from an existing memento, e.g. to produce an updated copy
    pub fn from_memento(other: &EntityMemento) -> Self {
        Self {
            base: MementoBaseBuilder::from_base(&other.base),
            parent: other.parent.clone(),
            children: other.children.clone(),
            members: other.members.clone(),
            locations: other.locations.clone(),
            policies: other.policies.clone(),
            config: other.config.clone(),
            attributes: other.attributes.clone(),
        }
    }

    base_builder_methods!();

    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent = Some(parent_id.into());
        self
    }

    /// Append a child; adding the same child twice keeps the first position
    pub fn child(mut self, child_id: impl Into<String>) -> Self {
        let child_id = child_id.into();
        if !self.children.contains(&child_id) {
            self.children.push(child_id);
        }
        self
    }

    pub fn member(mut self, member_id: impl Into<String>) -> Self {
        let member_id = member_id.into();
        if !self.members.contains(&member_id) {
            self.members.push(member_id);
        }
        self
    }

    pub fn location(mut self, location_id: impl Into<String>) -> Self {
        self.locations.insert(location_id.into());
        self
    }

    pub fn policy(mut self, policy_id: impl Into<String>) -> Self {
        self.policies.insert(policy_id.into());
        self
    }

    pub fn config(mut self, key: impl Into<String>, value: MementoValue) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn attribute(mut self, sensor: impl Into<String>, value: MementoValue) -> Self {
        self.attributes.insert(sensor.into(), value);
        self
    }

    /// Produce a memento holding copies of the current working state
    pub fn build(&self) -> EntityMemento {
        EntityMemento {
            base: self.base.build(),
            parent: self.parent.clone(),
            children: self.children.clone(),
            members: self.members.clone(),
            locations: self.locations.clone(),
            policies: self.policies.clone(),
            config: self.config.clone(),
            attributes: self.attributes.clone(),
        }
    }
}
