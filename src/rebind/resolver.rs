//! Two-pass rebind of a memento graph

use super::graph::{LiveEntity, LiveLocation, LivePolicy, RebindGraph};
use super::{for_each_reference, LookupContext};
use crate::error::{PersistError, Result};
use crate::memento::{Memento, MementoBase, MementoGraph, MementoMap};
use slog::{debug, info, Logger};

/// Rebuilds a [`RebindGraph`] from loaded mementos
pub struct RebindResolver {
    logger: Logger,
}

impl RebindResolver {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger: logger.new(slog::o!("component" => "rebind")),
        }
    }

    /// Skeleton pass, wiring pass, then validation.
    ///
    /// Fails on the first unresolved reference or inconsistent parent/child
    /// pair; a partially wired graph is never returned.
    pub fn rebind(&self, mementos: &MementoGraph) -> Result<RebindGraph> {
        let mut graph = skeleton_pass(mementos);
        debug!(self.logger, "Registered skeletons"; "count" => graph.len());

        wire_locations(mementos, &mut graph)?;
        wire_entities(mementos, &mut graph)?;
        wire_policies(mementos, &mut graph)?;

        validate(&graph)?;

        info!(self.logger, "Rebind complete";
            "entities" => graph.entities.len(),
            "locations" => graph.locations.len(),
            "policies" => graph.policies.len(),
            "applications" => graph.applications().len()
        );
        Ok(graph)
    }
}

fn skeleton_pass(mementos: &MementoGraph) -> RebindGraph {
    let mut graph = RebindGraph::default();
    for location in mementos.locations() {
        graph.register_location(LiveLocation::skeleton(location.id(), location.type_name()));
    }
    for entity in mementos.entities() {
        graph.register_entity(LiveEntity::skeleton(entity.id(), entity.type_name()));
    }
    for policy in mementos.policies() {
        graph.register_policy(LivePolicy::skeleton(policy.id(), policy.type_name()));
    }
    graph
}

/// Turn a failed lookup into the rebind error naming who holds the reference
fn unresolved(referenced_by: &str) -> impl Fn(PersistError) -> PersistError + '_ {
    move |e| match e {
        PersistError::NotFound { kind, id } => PersistError::UnresolvedReference {
            kind,
            id,
            referenced_by: referenced_by.to_string(),
        },
        other => other,
    }
}

fn check_embedded(graph: &RebindGraph, owner: &str, values: &[&MementoMap]) -> Result<()> {
    let mut visit = |kind: &'static str, id: &str| -> Result<()> {
        let found = match kind {
            "entity" => graph.lookup_entity(None, id).map(|_| ()),
            _ => graph.lookup_location(None, id).map(|_| ()),
        };
        found.map_err(unresolved(owner))
    };

    for map in values {
        for value in map.values() {
            for_each_reference(value, &mut visit)?;
        }
    }
    Ok(())
}

fn check_base(graph: &RebindGraph, base: &MementoBase) -> Result<()> {
    check_embedded(graph, base.id(), &[base.flags(), base.custom_fields()])
}

fn wire_locations(mementos: &MementoGraph, graph: &mut RebindGraph) -> Result<()> {
    for memento in mementos.locations() {
        let handle = graph.lookup_location(None, memento.id())?;
        let parent = memento
            .parent()
            .map(|id| graph.lookup_location(None, id))
            .transpose()
            .map_err(unresolved(memento.id()))?;
        let children = memento
            .children()
            .iter()
            .map(|id| graph.lookup_location(None, id))
            .collect::<Result<Vec<_>>>()
            .map_err(unresolved(memento.id()))?;
        check_base(graph, memento.base())?;

        let live = &mut graph.locations[handle.0];
        live.base = memento.base().clone();
        live.parent = parent;
        live.children = children;
    }
    Ok(())
}

fn wire_entities(mementos: &MementoGraph, graph: &mut RebindGraph) -> Result<()> {
    for memento in mementos.entities() {
        let handle = graph.lookup_entity(None, memento.id())?;
        let on_missing = unresolved(memento.id());

        let parent = memento
            .parent()
            .map(|id| graph.lookup_entity(None, id))
            .transpose()
            .map_err(&on_missing)?;
        let children = memento
            .children()
            .iter()
            .map(|id| graph.lookup_entity(None, id))
            .collect::<Result<Vec<_>>>()
            .map_err(&on_missing)?;
        let members = memento
            .members()
            .iter()
            .map(|id| graph.lookup_entity(None, id))
            .collect::<Result<Vec<_>>>()
            .map_err(&on_missing)?;
        let locations = memento
            .locations()
            .iter()
            .map(|id| graph.lookup_location(None, id))
            .collect::<Result<Vec<_>>>()
            .map_err(&on_missing)?;
        let policies = memento
            .policies()
            .iter()
            .map(|id| graph.lookup_policy(None, id))
            .collect::<Result<Vec<_>>>()
            .map_err(&on_missing)?;

        check_base(graph, memento.base())?;
        check_embedded(graph, memento.id(), &[memento.config(), memento.attributes()])?;

        let live = &mut graph.entities[handle.0];
        live.base = memento.base().clone();
        live.parent = parent;
        live.children = children;
        live.members = members;
        live.locations = locations;
        live.policies = policies;
        live.config = memento.config().clone();
        live.attributes = memento.attributes().clone();
    }
    Ok(())
}

fn wire_policies(mementos: &MementoGraph, graph: &mut RebindGraph) -> Result<()> {
    for memento in mementos.policies() {
        let handle = graph.lookup_policy(None, memento.id())?;
        check_base(graph, memento.base())?;
        graph.policies[handle.0].base = memento.base().clone();
    }
    Ok(())
}

fn inconsistent(parent: &str, child: &str) -> PersistError {
    PersistError::InconsistentHierarchy {
        parent: parent.to_string(),
        child: child.to_string(),
    }
}

/// Parent and child links must agree in both directions
fn validate(graph: &RebindGraph) -> Result<()> {
    for entity in graph.entities() {
        if let Some(parent) = entity.parent {
            let parent = graph.entity(parent);
            if !parent.children.iter().any(|c| graph.entity(*c).id() == entity.id()) {
                return Err(inconsistent(parent.id(), entity.id()));
            }
        }
        for child in &entity.children {
            let child = graph.entity(*child);
            let agrees = child
                .parent
                .map(|p| graph.entity(p).id() == entity.id())
                .unwrap_or(false);
            if !agrees {
                return Err(inconsistent(entity.id(), child.id()));
            }
        }
    }

    for location in graph.locations() {
        if let Some(parent) = location.parent {
            let parent = graph.location(parent);
            if !parent.children.iter().any(|c| graph.location(*c).id() == location.id()) {
                return Err(inconsistent(parent.id(), location.id()));
            }
        }
        for child in &location.children {
            let child = graph.location(*child);
            let agrees = child
                .parent
                .map(|p| graph.location(p).id() == location.id())
                .unwrap_or(false);
            if !agrees {
                return Err(inconsistent(location.id(), child.id()));
            }
        }
    }
    Ok(())
}
