//! Lookup / Rebind (Layer 4)
//!
//! Reconstructs a wired object graph from a flat bag of mementos that refer
//! to each other by ID. References may be forward or circular, so
//! construction happens in two passes over an arena:
//!
//! 1. **Skeleton**: every memento gets an empty live object registered under
//!    its ID, before any relation is wired.
//! 2. **Wiring**: every skeleton is populated and each referenced ID is
//!    resolved to a handle through a [`LookupContext`].
//!
//! A final validation checks that parent and child links agree. Any
//! unresolved reference aborts the rebind.

pub mod graph;
pub mod resolver;

use crate::error::Result;
use crate::memento::{MementoValue, ENTITY_REF_KEY, LOCATION_REF_KEY};

pub use graph::{LiveEntity, LiveLocation, LivePolicy, RebindGraph};
pub use resolver::RebindResolver;

/// Index of a live entity within a [`RebindGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(pub(crate) usize);

/// Index of a live location within a [`RebindGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationHandle(pub(crate) usize);

/// Index of a live policy within a [`RebindGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyHandle(pub(crate) usize);

/// Resolves IDs to the skeletons registered during the skeleton pass.
///
/// `expected_type`, when given, must match the registered type tag exactly;
/// otherwise the lookup fails with `TypeMismatch`. An ID that was never
/// registered fails with `NotFound`.
pub trait LookupContext {
    fn lookup_entity(&self, expected_type: Option<&str>, id: &str) -> Result<EntityHandle>;

    fn lookup_location(&self, expected_type: Option<&str>, id: &str) -> Result<LocationHandle>;

    fn lookup_policy(&self, expected_type: Option<&str>, id: &str) -> Result<PolicyHandle>;
}

/// A resolved reference embedded in an opaque value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    Entity(EntityHandle),
    Location(LocationHandle),
}

/// Reference marker carried by `value`, if it is exactly `{"$entityRef": id}`
/// or `{"$locationRef": id}`
pub(crate) fn embedded_reference(value: &MementoValue) -> Option<(&'static str, &str)> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    let (key, id) = object.iter().next()?;
    let id = id.as_str()?;
    match key.as_str() {
        ENTITY_REF_KEY => Some(("entity", id)),
        LOCATION_REF_KEY => Some(("location", id)),
        _ => None,
    }
}

/// Visit every embedded reference in `value`, including nested ones
pub(crate) fn for_each_reference<'a>(
    value: &'a MementoValue,
    visit: &mut dyn FnMut(&'static str, &'a str) -> Result<()>,
) -> Result<()> {
    if let Some((kind, id)) = embedded_reference(value) {
        return visit(kind, id);
    }
    match value {
        MementoValue::Array(items) => {
            for item in items {
                for_each_reference(item, visit)?;
            }
        }
        MementoValue::Object(fields) => {
            for field in fields.values() {
                for_each_reference(field, visit)?;
            }
        }
        _ => {}
    }
    Ok(())
}
