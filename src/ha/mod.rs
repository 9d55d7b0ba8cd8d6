//! HA Coordination (Layer 5)
//!
//! Management nodes publish heartbeats into a shared sync record and agree on
//! a single master through explicit master-change instructions. The merged
//! [`ManagementPlaneSyncRecord`] is the authoritative cluster view.

pub mod election;
pub mod heartbeat;
pub mod persister;

use crate::error::{PersistError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub use election::{ElectionStateMachine, HaEvent};
pub use heartbeat::{current_timestamp, detect_failed_nodes, HeartbeatHandle, HeartbeatPublisher};
pub use persister::{InMemorySyncRecordPersister, ObjectStoreSyncRecordPersister, SyncRecordPersister};

/// Lifecycle status a node reports for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Standby,
    Master,
    Failed,
    Terminated,
}

impl NodeStatus {
    /// Whether a node in this status is still expected to heartbeat
    pub fn is_live(&self) -> bool {
        matches!(self, NodeStatus::Standby | NodeStatus::Master)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Standby => "STANDBY",
            NodeStatus::Master => "MASTER",
            NodeStatus::Failed => "FAILED",
            NodeStatus::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// One node's last heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementNodeSyncRecord {
    pub node_id: String,
    pub status: NodeStatus,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ManagementNodeSyncRecord {
    pub fn new(node_id: impl Into<String>, status: NodeStatus, timestamp_ms: u64) -> Self {
        Self {
            node_id: node_id.into(),
            status,
            timestamp_ms,
            remote_address: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = Some(address.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Merged cluster view: every known node plus the master pointer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementPlaneSyncRecord {
    nodes: BTreeMap<String, ManagementNodeSyncRecord>,
    master_node_id: Option<String>,
}

impl ManagementPlaneSyncRecord {
    pub fn master_node_id(&self) -> Option<&str> {
        self.master_node_id.as_deref()
    }

    pub fn nodes(&self) -> &BTreeMap<String, ManagementNodeSyncRecord> {
        &self.nodes
    }

    pub fn node(&self, node_id: &str) -> Option<&ManagementNodeSyncRecord> {
        self.nodes.get(node_id)
    }

    /// Record of the current master, if it has one
    pub fn master(&self) -> Option<&ManagementNodeSyncRecord> {
        self.master_node_id.as_deref().and_then(|id| self.nodes.get(id))
    }

    pub fn is_master(&self, node_id: &str) -> bool {
        self.master_node_id.as_deref() == Some(node_id)
    }
}

/// How a delta affects the master pointer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "node_id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MasterChange {
    #[default]
    NoChange,
    SetMaster(String),
    ClearMaster,
}

impl MasterChange {
    /// Build from a textual instruction such as `SET_MASTER` plus node ID.
    ///
    /// Unknown tags, and `SET_MASTER` without a node, are rejected.
    pub fn parse(tag: &str, node_id: Option<&str>) -> Result<Self> {
        let change = match (tag, node_id) {
            ("NO_CHANGE", _) => MasterChange::NoChange,
            ("CLEAR_MASTER", _) => MasterChange::ClearMaster,
            ("SET_MASTER", Some(id)) => MasterChange::SetMaster(id.to_string()),
            ("SET_MASTER", None) => {
                return Err(PersistError::InvalidMasterChange(
                    "SET_MASTER requires a node id".to_string(),
                ))
            }
            (other, _) => {
                return Err(PersistError::InvalidMasterChange(format!(
                    "unrecognised instruction '{}'",
                    other
                )))
            }
        };
        change.validate()?;
        Ok(change)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            MasterChange::SetMaster(id) if id.trim().is_empty() => Err(
                PersistError::InvalidMasterChange("SET_MASTER with empty node id".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Incremental change to the sync record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaDelta {
    #[serde(default)]
    pub nodes: Vec<ManagementNodeSyncRecord>,
    #[serde(default)]
    pub removed_node_ids: BTreeSet<String>,
    #[serde(default)]
    pub master_change: MasterChange,
}

impl HaDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_node(mut self, record: ManagementNodeSyncRecord) -> Self {
        self.nodes.push(record);
        self
    }

    pub fn remove_node(mut self, node_id: impl Into<String>) -> Self {
        self.removed_node_ids.insert(node_id.into());
        self
    }

    pub fn set_master(mut self, node_id: impl Into<String>) -> Self {
        self.master_change = MasterChange::SetMaster(node_id.into());
        self
    }

    pub fn clear_master(mut self) -> Self {
        self.master_change = MasterChange::ClearMaster;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.removed_node_ids.is_empty()
            && self.master_change == MasterChange::NoChange
    }
}
