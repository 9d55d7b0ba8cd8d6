//! Policy mementos

use super::{base_builder_methods, Memento, MementoBase, MementoBaseBuilder, MementoKind};
use serde::{Deserialize, Serialize};

/// Persisted state of one policy: only the shared base fields
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyMemento {
    #[serde(flatten)]
    base: MementoBase,
}

impl PolicyMemento {
    pub fn builder(id: impl Into<String>, type_name: impl Into<String>) -> PolicyMementoBuilder {
        PolicyMementoBuilder::new(id, type_name)
    }
}

impl Memento for PolicyMemento {
    const KIND: MementoKind = MementoKind::Policy;

    fn base(&self) -> &MementoBase {
        &self.base
    }
}

/// Builder for [`PolicyMemento`]
#[derive(Clone, Debug)]
pub struct PolicyMementoBuilder {
    base: MementoBaseBuilder,
}

impl PolicyMementoBuilder {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            base: MementoBaseBuilder::new(id, type_name),
        }
    }

    pub fn from_memento(other: &PolicyMemento) -> Self {
        Self {
            base: MementoBaseBuilder::from_base(&other.base),
        }
    }

    base_builder_methods!();

    pub fn build(&self) -> PolicyMemento {
        PolicyMemento {
            base: self.base.build(),
        }
    }
}
