//! Location mementos
//!
//! Locations form their own hierarchy (e.g. region → zone → machine), so they
//! carry a parent and ordered children in addition to the base fields.

use super::{base_builder_methods, Memento, MementoBase, MementoBaseBuilder, MementoKind};
use serde::{Deserialize, Serialize};

/// Persisted state of one location
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationMemento {
    #[serde(flatten)]
    base: MementoBase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    #[serde(default)]
    children: Vec<String>,
}

impl LocationMemento {
    pub fn builder(id: impl Into<String>, type_name: impl Into<String>) -> LocationMementoBuilder {
        LocationMementoBuilder::new(id, type_name)
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn children(&self) -> &[String] {
        &self.children
    }
}

impl Memento for LocationMemento {
    const KIND: MementoKind = MementoKind::Location;

    fn base(&self) -> &MementoBase {
        &self.base
    }
}

/// Builder for [`LocationMemento`]
#[derive(Clone, Debug)]
pub struct LocationMementoBuilder {
    base: MementoBaseBuilder,
    parent: Option<String>,
    children: Vec<String>,
}

impl LocationMementoBuilder {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            base: MementoBaseBuilder::new(id, type_name),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn from_memento(other: &LocationMemento) -> Self {
        Self {
            base: MementoBaseBuilder::from_base(&other.base),
            parent: other.parent.clone(),
            children: other.children.clone(),
        }
    }

    base_builder_methods!();

    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent = Some(parent_id.into());
        self
    }

    pub fn child(mut self, child_id: impl Into<String>) -> Self {
        let child_id = child_id.into();
        if !self.children.contains(&child_id) {
            self.children.push(child_id);
        }
        self
    }

    pub fn build(&self) -> LocationMemento {
        LocationMemento {
            base: self.base.build(),
            parent: self.parent.clone(),
            children: self.children.clone(),
        }
    }
}
