//! HA Sync Record Persister
//!
//! Same delta/merge shape as the memento persister, specialized to the small
//! cluster record. Unlike the memento persister, loading after `stop()` fails
//! with `NotRunning`: election logic must never act on a stale view.

use super::election::{ElectionStateMachine, HaEvent};
use super::{HaDelta, ManagementNodeSyncRecord, ManagementPlaneSyncRecord, MasterChange};
use crate::codec::MementoCodec;
use crate::error::{PersistError, Result};
use crate::events::{EventBus, PersistenceEvent};
use crate::state_machine::StateMachine;
use crate::store::write_queue::WriteQueueConfig;
use crate::store::{ObjectStore, StoreOp, WriteQueue};
use async_trait::async_trait;
use slog::{debug, info, Logger};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const COMPONENT: &str = "sync record persister";

/// Path prefix of per-node heartbeat records
pub const NODES_PREFIX: &str = "ha/nodes/";

/// Path of the master pointer
pub const MASTER_PATH: &str = "ha/master";

const NODE_KIND: &str = "node";
const MASTER_KIND: &str = "master";

/// Persists the management-plane sync record
#[async_trait]
pub trait SyncRecordPersister: Send + Sync {
    /// Current merged cluster view. Fails with `NotRunning` after `stop()`.
    fn load_sync_record(&self) -> Result<ManagementPlaneSyncRecord>;

    /// Merge node upserts/removals and apply the master change.
    ///
    /// Deltas are applied in submission order. An invalid master change
    /// fails fast. After `stop()` the delta is ignored.
    fn delta(&self, delta: HaDelta) -> Result<()>;

    /// Permanently disable the persister. Idempotent.
    fn stop(&self);

    /// Wait until every delta submitted before this call has been applied
    async fn wait_for_writes_completed(&self, timeout: Duration) -> Result<()>;
}

fn log_events(logger: &Logger, events: &[HaEvent]) {
    for event in events {
        match event {
            HaEvent::MasterChanged { previous, current } => {
                info!(logger, "Master changed";
                    "previous" => previous.as_deref().unwrap_or("-"),
                    "current" => current.as_deref().unwrap_or("-")
                );
            }
            HaEvent::NodeUpserted { node_id, status } => {
                debug!(logger, "Node record updated"; "node_id" => node_id, "status" => %status);
            }
            HaEvent::NodeRemoved { node_id } => {
                info!(logger, "Node record removed"; "node_id" => node_id);
            }
        }
    }
}

/// Sync record held in process memory, for single-process clusters and tests
pub struct InMemorySyncRecordPersister {
    state: Mutex<ElectionStateMachine>,
    running: AtomicBool,
    logger: Logger,
}

impl InMemorySyncRecordPersister {
    pub fn new(logger: Logger) -> Self {
        Self {
            state: Mutex::new(ElectionStateMachine::new()),
            running: AtomicBool::new(true),
            logger: logger.new(slog::o!("component" => "sync_record_persister")),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ElectionStateMachine> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SyncRecordPersister for InMemorySyncRecordPersister {
    fn load_sync_record(&self) -> Result<ManagementPlaneSyncRecord> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(PersistError::NotRunning { component: COMPONENT });
        }
        Ok(self.lock().record().clone())
    }

    fn delta(&self, delta: HaDelta) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            debug!(self.logger, "Ignoring HA delta after stop");
            return Ok(());
        }
        let events = self.lock().apply(&delta)?;
        log_events(&self.logger, &events);
        Ok(())
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(self.logger, "Sync record persister stopped");
        }
    }

    async fn wait_for_writes_completed(&self, _timeout: Duration) -> Result<()> {
        // Deltas are applied synchronously
        Ok(())
    }
}

/// Sync record stored in a (typically shared) object store.
///
/// Each node's record lives at `ha/nodes/<id>` and the master pointer at
/// `ha/master`, so nodes writing their own heartbeats never overwrite each
/// other.
pub struct ObjectStoreSyncRecordPersister {
    store: Arc<dyn ObjectStore>,
    queue: WriteQueue,
    codec: Arc<MementoCodec>,
    /// Held while a delta is validated and enqueued
    write_lock: Mutex<()>,
    running: AtomicBool,
    logger: Logger,
}

impl ObjectStoreSyncRecordPersister {
    /// Must be called from within a tokio runtime.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        codec: Arc<MementoCodec>,
        queue_config: WriteQueueConfig,
        events: Arc<EventBus<PersistenceEvent>>,
        logger: Logger,
    ) -> Self {
        let logger = logger.new(slog::o!("component" => "sync_record_persister"));
        info!(logger, "Creating sync record persister"; "store" => store.describe());

        let queue = WriteQueue::new(store.clone(), queue_config, events, logger.clone());
        Self {
            store,
            queue,
            codec,
            write_lock: Mutex::new(()),
            running: AtomicBool::new(true),
            logger,
        }
    }

    fn read_state(&self) -> Result<ElectionStateMachine> {
        let mut merged = HaDelta::new();

        for path in self.store.list(NODES_PREFIX)? {
            let Some(bytes) = self.store.get(&path)? else {
                continue;
            };
            let record: ManagementNodeSyncRecord = self
                .codec
                .decode(NODE_KIND, &bytes)
                .map_err(|e| PersistError::storage(&path, format!("corrupt node record: {}", e)))?;
            merged.nodes.push(record);
        }

        if let Some(bytes) = self.store.get(MASTER_PATH)? {
            let master: String = self
                .codec
                .decode(MASTER_KIND, &bytes)
                .map_err(|e| PersistError::storage(MASTER_PATH, format!("corrupt master: {}", e)))?;
            merged.master_change = MasterChange::SetMaster(master);
        }

        let mut state = ElectionStateMachine::new();
        state.apply(&merged)?;
        Ok(state)
    }
}

#[async_trait]
impl SyncRecordPersister for ObjectStoreSyncRecordPersister {
    fn load_sync_record(&self) -> Result<ManagementPlaneSyncRecord> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(PersistError::NotRunning { component: COMPONENT });
        }
        Ok(self.read_state()?.into_record())
    }

    fn delta(&self, delta: HaDelta) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            debug!(self.logger, "Ignoring HA delta after stop");
            return Ok(());
        }
        delta.master_change.validate()?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut ops = Vec::new();
        for node in &delta.nodes {
            ops.push(StoreOp::Put {
                path: format!("{}{}", NODES_PREFIX, node.node_id),
                bytes: self.codec.encode(NODE_KIND, node)?,
            });
        }
        for node_id in &delta.removed_node_ids {
            ops.push(StoreOp::Delete {
                path: format!("{}{}", NODES_PREFIX, node_id),
            });
        }
        match &delta.master_change {
            MasterChange::NoChange => {}
            MasterChange::SetMaster(id) => {
                info!(self.logger, "Setting master"; "node_id" => id);
                ops.push(StoreOp::Put {
                    path: MASTER_PATH.to_string(),
                    bytes: self.codec.encode(MASTER_KIND, id)?,
                });
            }
            MasterChange::ClearMaster => {
                info!(self.logger, "Clearing master");
                ops.push(StoreOp::Delete {
                    path: MASTER_PATH.to_string(),
                });
            }
        }

        if ops.is_empty() {
            return Ok(());
        }
        self.queue.submit(ops)
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(self.logger, "Sync record persister stopped"; "backlog" => self.queue.backlog());
        }
    }

    async fn wait_for_writes_completed(&self, timeout: Duration) -> Result<()> {
        self.queue.wait_for_completed(timeout).await
    }
}
