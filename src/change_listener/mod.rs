//! Change Listener (Layer 6)
//!
//! Live objects report mutations through [`EntityChangeListener`] hooks. The
//! persisting implementation marks the entity dirty in a
//! [`PeriodicDeltaChangeListener`], which periodically asks a
//! [`MementoSource`] for fresh mementos and submits them as one delta.

pub mod periodic;

use crate::error::Result;
use crate::memento::{EntityMemento, LocationMemento, PolicyMemento};
use std::sync::Arc;

pub use periodic::PeriodicDeltaChangeListener;

/// Hooks fired by a live entity whenever its persisted state may have changed
pub trait EntityChangeListener: Send + Sync {
    /// Generic change not covered by a more specific hook
    fn on_changed(&self);

    fn on_attribute_changed(&self, sensor: &str);

    fn on_config_changed(&self, key: &str);

    fn on_locations_changed(&self);

    fn on_members_changed(&self);

    fn on_children_changed(&self);

    fn on_policies_changed(&self);

    fn on_effector_starting(&self, effector: &str);

    fn on_effector_completed(&self, effector: &str);
}

/// Listener used when persistence is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEntityChangeListener;

impl EntityChangeListener for NoopEntityChangeListener {
    fn on_changed(&self) {}
    fn on_attribute_changed(&self, _sensor: &str) {}
    fn on_config_changed(&self, _key: &str) {}
    fn on_locations_changed(&self) {}
    fn on_members_changed(&self) {}
    fn on_children_changed(&self) {}
    fn on_policies_changed(&self) {}
    fn on_effector_starting(&self, _effector: &str) {}
    fn on_effector_completed(&self, _effector: &str) {}
}

/// Produces current mementos for live objects, by ID.
///
/// Implemented by the entity model. A failure for one object is logged and
/// that object is left out of the delta.
pub trait MementoSource: Send + Sync {
    fn entity_memento(&self, id: &str) -> Result<EntityMemento>;

    fn location_memento(&self, id: &str) -> Result<LocationMemento>;

    fn policy_memento(&self, id: &str) -> Result<PolicyMemento>;
}

/// Routes one entity's hooks to a [`PeriodicDeltaChangeListener`]
pub struct EntityDeltaTracker {
    entity_id: String,
    listener: Arc<PeriodicDeltaChangeListener>,
}

impl EntityDeltaTracker {
    pub fn new(entity_id: impl Into<String>, listener: Arc<PeriodicDeltaChangeListener>) -> Self {
        Self {
            entity_id: entity_id.into(),
            listener,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn mark(&self) {
        self.listener.on_entity_changed(&self.entity_id);
    }
}

impl EntityChangeListener for EntityDeltaTracker {
    fn on_changed(&self) {
        self.mark();
    }

    fn on_attribute_changed(&self, _sensor: &str) {
        self.mark();
    }

    fn on_config_changed(&self, _key: &str) {
        self.mark();
    }

    fn on_locations_changed(&self) {
        self.mark();
    }

    fn on_members_changed(&self) {
        self.mark();
    }

    fn on_children_changed(&self) {
        self.mark();
    }

    fn on_policies_changed(&self) {
        self.mark();
    }

    fn on_effector_starting(&self, _effector: &str) {
        self.mark();
    }

    fn on_effector_completed(&self, _effector: &str) {
        self.mark();
    }
}
