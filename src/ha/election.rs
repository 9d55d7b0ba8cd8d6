//! Master Election State Machine
//!
//! Folds HA deltas into a [`ManagementPlaneSyncRecord`]. Node records are
//! plain upserts; the master pointer changes only through the delta's
//! [`MasterChange`]. No fencing happens here: whoever issues `SetMaster` is
//! responsible for being the only node that believes it is master.

use super::{HaDelta, ManagementPlaneSyncRecord, MasterChange, NodeStatus};
use crate::error::Result;
use crate::state_machine::StateMachine;

/// Change produced by applying an [`HaDelta`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaEvent {
    NodeUpserted { node_id: String, status: NodeStatus },
    NodeRemoved { node_id: String },
    MasterChanged {
        previous: Option<String>,
        current: Option<String>,
    },
}

/// State machine over the merged sync record
#[derive(Debug, Clone, Default)]
pub struct ElectionStateMachine {
    record: ManagementPlaneSyncRecord,
}

impl ElectionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing record
    pub fn from_record(record: ManagementPlaneSyncRecord) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &ManagementPlaneSyncRecord {
        &self.record
    }

    pub fn master_node_id(&self) -> Option<&str> {
        self.record.master_node_id()
    }

    pub fn into_record(self) -> ManagementPlaneSyncRecord {
        self.record
    }
}

impl StateMachine for ElectionStateMachine {
    type Command = HaDelta;
    type Event = HaEvent;

    fn apply(&mut self, delta: &HaDelta) -> Result<Vec<HaEvent>> {
        // Reject before touching anything
        delta.master_change.validate()?;

        let mut events = Vec::new();

        for node in &delta.nodes {
            self.record.nodes.insert(node.node_id.clone(), node.clone());
            events.push(HaEvent::NodeUpserted {
                node_id: node.node_id.clone(),
                status: node.status,
            });
        }

        for node_id in &delta.removed_node_ids {
            if self.record.nodes.remove(node_id).is_some() {
                events.push(HaEvent::NodeRemoved {
                    node_id: node_id.clone(),
                });
            }
        }

        let previous = self.record.master_node_id.clone();
        match &delta.master_change {
            MasterChange::NoChange => {}
            MasterChange::SetMaster(id) => self.record.master_node_id = Some(id.clone()),
            MasterChange::ClearMaster => self.record.master_node_id = None,
        }
        if previous != self.record.master_node_id {
            events.push(HaEvent::MasterChanged {
                previous,
                current: self.record.master_node_id.clone(),
            });
        }

        Ok(events)
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.record)?)
    }

    fn restore(&mut self, snapshot: &[u8]) -> Result<()> {
        self.record = serde_json::from_slice(snapshot)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistError;
    use crate::ha::ManagementNodeSyncRecord;

    fn standby(id: &str) -> ManagementNodeSyncRecord {
        ManagementNodeSyncRecord::new(id, NodeStatus::Standby, 1_000)
    }

    #[test]
    fn test_set_master_keeps_all_nodes() {
        let mut sm = ElectionStateMachine::new();
        for id in ["n1", "n2", "n3"] {
            sm.apply(&HaDelta::new().upsert_node(standby(id))).unwrap();
        }

        let events = sm.apply(&HaDelta::new().set_master("n2")).unwrap();

        assert_eq!(
            events,
            vec![HaEvent::MasterChanged {
                previous: None,
                current: Some("n2".to_string()),
            }]
        );
        assert_eq!(sm.master_node_id(), Some("n2"));
        assert_eq!(sm.record().nodes().len(), 3);
    }

    #[test]
    fn test_clear_then_set_master() {
        let mut sm = ElectionStateMachine::new();
        sm.apply(&HaDelta::new().set_master("node2")).unwrap();

        sm.apply(&HaDelta::new().clear_master()).unwrap();
        assert_eq!(sm.master_node_id(), None);

        sm.apply(&HaDelta::new().set_master("node3")).unwrap();
        assert_eq!(sm.master_node_id(), Some("node3"));
    }

    #[test]
    fn test_no_change_leaves_master() {
        let mut sm = ElectionStateMachine::new();
        sm.apply(&HaDelta::new().set_master("n1")).unwrap();

        let events = sm
            .apply(&HaDelta::new().upsert_node(standby("n2")))
            .unwrap();

        assert_eq!(sm.master_node_id(), Some("n1"));
        assert!(!events
            .iter()
            .any(|e| matches!(e, HaEvent::MasterChanged { .. })));
    }

    #[test]
    fn test_invalid_change_leaves_state_untouched() {
        let mut sm = ElectionStateMachine::new();
        sm.apply(&HaDelta::new().set_master("n1")).unwrap();

        let bad = HaDelta::new()
            .upsert_node(standby("n9"))
            .set_master("");
        let err = sm.apply(&bad).unwrap_err();

        assert!(matches!(err, PersistError::InvalidMasterChange(_)));
        assert_eq!(sm.master_node_id(), Some("n1"));
        assert!(sm.record().node("n9").is_none());
    }

    #[test]
    fn test_removal_wins_over_upsert() {
        let mut sm = ElectionStateMachine::new();
        let events = sm
            .apply(&HaDelta::new().upsert_node(standby("n1")).remove_node("n1"))
            .unwrap();

        assert!(sm.record().node("n1").is_none());
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut sm = ElectionStateMachine::new();
        sm.apply(
            &HaDelta::new()
                .upsert_node(standby("n1").with_remote_address("10.0.0.1:8081"))
                .set_master("n1"),
        )
        .unwrap();

        let snapshot = sm.snapshot().unwrap();
        let mut restored = ElectionStateMachine::new();
        restored.restore(&snapshot).unwrap();

        assert_eq!(restored.record(), sm.record());
        assert!(restored.record().is_master("n1"));
    }
}
