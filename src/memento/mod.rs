//! Memento Model (Layer 2)
//!
//! Mementos are immutable, serializable snapshots of one entity, location or
//! policy. They reference each other purely by ID, so a set of mementos can be
//! persisted and loaded in any order; turning IDs back into live objects is
//! the job of the rebind layer.
//!
//! Every kind is built through its own builder. Builders hold mutable working
//! maps; `build()` copies them, so a memento never shares state with the
//! builder that produced it.

pub mod delta;
pub mod entity;
pub mod graph;
pub mod location;
pub mod policy;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use delta::MementoDelta;
pub use entity::{EntityMemento, EntityMementoBuilder};
pub use graph::MementoGraph;
pub use location::{LocationMemento, LocationMementoBuilder};
pub use policy::{PolicyMemento, PolicyMementoBuilder};

/// Opaque persisted value (config, attribute, flag or custom field)
pub type MementoValue = serde_json::Value;

/// Ordered name → value mapping
pub type MementoMap = BTreeMap<String, MementoValue>;

/// Key marking an opaque value as a reference to an entity
pub const ENTITY_REF_KEY: &str = "$entityRef";

/// Key marking an opaque value as a reference to a location
pub const LOCATION_REF_KEY: &str = "$locationRef";

/// Value referring to the entity `id`; resolved during rebind
pub fn entity_ref(id: &str) -> MementoValue {
    reference(ENTITY_REF_KEY, id)
}

/// Value referring to the location `id`; resolved during rebind
pub fn location_ref(id: &str) -> MementoValue {
    reference(LOCATION_REF_KEY, id)
}

fn reference(key: &str, id: &str) -> MementoValue {
    let mut object = serde_json::Map::new();
    object.insert(key.to_string(), MementoValue::String(id.to_string()));
    MementoValue::Object(object)
}

/// The three kinds of persisted object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MementoKind {
    Entity,
    Location,
    Policy,
}

impl MementoKind {
    pub const ALL: [MementoKind; 3] = [MementoKind::Location, MementoKind::Entity, MementoKind::Policy];

    pub fn name(&self) -> &'static str {
        match self {
            MementoKind::Entity => "entity",
            MementoKind::Location => "location",
            MementoKind::Policy => "policy",
        }
    }

    /// Path prefix (with trailing `/`) under which this kind is stored
    pub fn prefix(&self) -> &'static str {
        match self {
            MementoKind::Entity => "entities/",
            MementoKind::Location => "locations/",
            MementoKind::Policy => "policies/",
        }
    }

    /// Store path of the memento with the given ID
    pub fn path_for(&self, id: &str) -> String {
        format!("{}{}", self.prefix(), id)
    }
}

/// Fields shared by every memento kind
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MementoBase {
    id: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    flags: MementoMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    custom_fields: MementoMap,
}

impl MementoBase {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Constructor-style properties
    pub fn flags(&self) -> &MementoMap {
        &self.flags
    }

    /// Kind-specific extensions
    pub fn custom_fields(&self) -> &MementoMap {
        &self.custom_fields
    }
}

/// Behaviour common to all memento kinds
pub trait Memento: Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync {
    const KIND: MementoKind;

    fn base(&self) -> &MementoBase;

    fn id(&self) -> &str {
        self.base().id()
    }

    fn type_name(&self) -> &str {
        self.base().type_name()
    }

    fn display_name(&self) -> Option<&str> {
        self.base().display_name()
    }

    fn flags(&self) -> &MementoMap {
        self.base().flags()
    }

    fn custom_fields(&self) -> &MementoMap {
        self.base().custom_fields()
    }
}

/// Working state for the shared base fields
#[derive(Clone, Debug)]
pub struct MementoBaseBuilder {
    id: String,
    type_name: String,
    display_name: Option<String>,
    flags: MementoMap,
    custom_fields: MementoMap,
}

impl MementoBaseBuilder {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            display_name: None,
            flags: MementoMap::new(),
            custom_fields: MementoMap::new(),
        }
    }

    pub fn from_base(base: &MementoBase) -> Self {
        Self {
            id: base.id.clone(),
            type_name: base.type_name.clone(),
            display_name: base.display_name.clone(),
            flags: base.flags.clone(),
            custom_fields: base.custom_fields.clone(),
        }
    }

    pub fn build(&self) -> MementoBase {
        MementoBase {
            id: self.id.clone(),
            type_name: self.type_name.clone(),
            display_name: self.display_name.clone(),
            flags: self.flags.clone(),
            custom_fields: self.custom_fields.clone(),
        }
    }
}

/// Generates the base-field setters on a kind-specific builder that holds a
/// `base: MementoBaseBuilder` field.
macro_rules! base_builder_methods {
    () => {
        /// Replace all base fields, including ID and type, with a copy of `base`
        pub fn base_fields(mut self, base: &$crate::memento::MementoBase) -> Self {
            self.base = $crate::memento::MementoBaseBuilder::from_base(base);
            self
        }

        pub fn display_name(mut self, name: impl Into<String>) -> Self {
            self.base.display_name = Some(name.into());
            self
        }

        pub fn flag(mut self, key: impl Into<String>, value: $crate::memento::MementoValue) -> Self {
            self.base.flags.insert(key.into(), value);
            self
        }

        pub fn flags<I, K>(mut self, flags: I) -> Self
        where
            I: IntoIterator<Item = (K, $crate::memento::MementoValue)>,
            K: Into<String>,
        {
            self.base
                .flags
                .extend(flags.into_iter().map(|(k, v)| (k.into(), v)));
            self
        }

        pub fn custom_field(mut self, key: impl Into<String>, value: $crate::memento::MementoValue) -> Self {
            self.base.custom_fields.insert(key.into(), value);
            self
        }
    };
}

pub(crate) use base_builder_methods;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_per_kind() {
        assert_eq!(MementoKind::Entity.path_for("e1"), "entities/e1");
        assert_eq!(MementoKind::Location.path_for("l1"), "locations/l1");
        assert_eq!(MementoKind::Policy.path_for("p1"), "policies/p1");
    }

    #[test]
    fn test_base_builder_copies_on_build() {
        let mut builder = MementoBaseBuilder::new("e1", "WebServer");
        builder.flags.insert("port".to_string(), serde_json::json!(8080));

        let base = builder.build();
        builder.flags.insert("port".to_string(), serde_json::json!(9090));
        builder.custom_fields.insert("extra".to_string(), serde_json::json!(true));

        assert_eq!(base.flags().get("port"), Some(&serde_json::json!(8080)));
        assert!(base.custom_fields().is_empty());
    }
}
