//! Heartbeats and failure detection
//!
//! Every node periodically upserts its own [`ManagementNodeSyncRecord`].
//! [`detect_failed_nodes`] is the policy helper a master (or a would-be
//! master) runs against the merged record to mark silent nodes FAILED.

use super::persister::SyncRecordPersister;
use super::{HaDelta, ManagementNodeSyncRecord, ManagementPlaneSyncRecord, NodeStatus};
use slog::{debug, info, warn, Logger};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;

/// Milliseconds since the Unix epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Build a delta marking every other live node whose heartbeat is older than
/// `timeout` as FAILED.
///
/// If the current master is among them the delta also clears the master;
/// promoting a replacement is left to the caller. Returns an empty delta when
/// nothing is stale.
pub fn detect_failed_nodes(
    record: &ManagementPlaneSyncRecord,
    now_ms: u64,
    timeout: Duration,
    self_id: &str,
) -> HaDelta {
    let timeout_ms = timeout.as_millis() as u64;
    let mut delta = HaDelta::new();

    for node in record.nodes().values() {
        if node.node_id == self_id || !node.status.is_live() {
            continue;
        }
        if now_ms.saturating_sub(node.timestamp_ms) > timeout_ms {
            let mut failed = node.clone();
            failed.status = NodeStatus::Failed;
            delta = delta.upsert_node(failed);

            if record.is_master(&node.node_id) {
                delta = delta.clear_master();
            }
        }
    }
    delta
}

/// Publishes this node's heartbeat on a fixed interval
pub struct HeartbeatPublisher {
    persister: Arc<dyn SyncRecordPersister>,
    node_id: String,
    remote_address: Option<String>,
    interval: Duration,
    logger: Logger,
}

impl HeartbeatPublisher {
    /// Create a publisher; nothing is written until [`start`](Self::start)
    ///
    /// # Arguments
    /// * `persister` - Receives one node upsert per heartbeat
    /// * `node_id` - ID of the node whose record is published
    /// * `interval` - Time between heartbeats
    /// * `logger` - Parent logger; `component` and `node_id` keys are added
    pub fn new(
        persister: Arc<dyn SyncRecordPersister>,
        node_id: impl Into<String>,
        interval: Duration,
        logger: Logger,
    ) -> Self {
        let node_id = node_id.into();
        let logger = logger.new(slog::o!("component" => "heartbeat", "node_id" => node_id.clone()));
        Self {
            persister,
            node_id,
            remote_address: None,
            interval,
            logger,
        }
    }

    pub fn with_remote_address(mut self, address: Option<String>) -> Self {
        self.remote_address = address;
        self
    }

    /// This node's record with the given status, stamped now
    pub fn record(&self, status: NodeStatus) -> ManagementNodeSyncRecord {
        let mut record = ManagementNodeSyncRecord::new(&self.node_id, status, current_timestamp());
        record.remote_address = self.remote_address.clone();
        record
    }

    fn publish(&self, status: NodeStatus) {
        let delta = HaDelta::new().upsert_node(self.record(status));
        if let Err(e) = self.persister.delta(delta) {
            warn!(self.logger, "Failed to publish heartbeat"; "error" => %e);
        }
    }

    /// Spawn the heartbeat task. The first heartbeat is published immediately.
    pub fn start(self, initial_status: NodeStatus) -> HeartbeatHandle {
        let (status_tx, mut status_rx) = watch::channel(initial_status);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        info!(self.logger, "Starting heartbeat";
            "interval_ms" => self.interval.as_millis() as u64,
            "status" => %initial_status
        );

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let status = *status_rx.borrow();
                        self.publish(status);
                    }

                    // Publish status changes without waiting for the next tick
                    changed = status_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let status = *status_rx.borrow_and_update();
                        debug!(self.logger, "Status changed"; "status" => %status);
                        self.publish(status);
                    }

                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            info!(self.logger, "Heartbeat stopped");
        });

        HeartbeatHandle {
            status_tx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Control handle for a running heartbeat task
pub struct HeartbeatHandle {
    status_tx: watch::Sender<NodeStatus>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    /// Status published from now on
    pub fn set_status(&self, status: NodeStatus) {
        self.status_tx.send_replace(status);
    }

    pub fn status(&self) -> NodeStatus {
        *self.status_tx.borrow()
    }

    /// Stop the task and wait for it to exit
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
