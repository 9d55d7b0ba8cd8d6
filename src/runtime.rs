//! Persistence Runtime (Layer 7)
//!
//! Composition root for one management node: opens the store, creates the
//! codec, both persisters, the periodic change listener and the heartbeat,
//! and tears them down in order on shutdown.
//!
//! # Example
//!
//! ```no_run
//! use mnemos::{PersistenceConfig, PersistenceRuntime};
//! # use mnemos::change_listener::MementoSource;
//! # use std::sync::Arc;
//! # async fn run(source: Arc<dyn MementoSource>, logger: slog::Logger) -> mnemos::Result<()> {
//! let config = PersistenceConfig::new("node-1").with_rocksdb("/var/lib/mnemos");
//! let runtime = PersistenceRuntime::start(config, source, logger).await?;
//!
//! let graph = runtime.rebind()?;
//! println!("rebound {} objects", graph.len());
//! runtime.promote_if_no_master().await?;
//!
//! // ... run the management plane ...
//!
//! runtime.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use crate::change_listener::{
    EntityChangeListener, EntityDeltaTracker, MementoSource, NoopEntityChangeListener,
    PeriodicDeltaChangeListener,
};
use crate::codec::MementoCodec;
use crate::config::PersistenceConfig;
use crate::error::Result;
use crate::events::{EventBus, PersistenceEvent};
use crate::ha::{
    current_timestamp, detect_failed_nodes, HaDelta, HeartbeatHandle, HeartbeatPublisher,
    ManagementNodeSyncRecord, ManagementPlaneSyncRecord, NodeStatus, ObjectStoreSyncRecordPersister, SyncRecordPersister,
};
use crate::memento::MementoGraph;
use crate::persister::{MementoPersister, ObjectStoreMementoPersister};
use crate::rebind::{RebindGraph, RebindResolver};
use crate::store::write_queue::WriteQueueConfig;
use crate::store::{open_store, ObjectStore};
use slog::{info, warn, Logger};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

/// Running persistence and HA services of one management node
pub struct PersistenceRuntime {
    config: PersistenceConfig,
    events: Arc<EventBus<PersistenceEvent>>,
    memento_persister: Arc<ObjectStoreMementoPersister>,
    sync_persister: Arc<ObjectStoreSyncRecordPersister>,
    change_listener: Arc<PeriodicDeltaChangeListener>,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
    logger: Logger,
}

impl PersistenceRuntime {
    /// Open the configured store and start all services
    ///
    /// # Arguments
    /// * `config` - Node identity, store backend and timing
    /// * `source` - Generates mementos for objects reported as changed
    /// * `logger` - Parent logger; a `node_id` key is added
    ///
    /// # Returns
    /// The running runtime, with this node heartbeating as STANDBY
    pub async fn start(
        config: PersistenceConfig,
        source: Arc<dyn MementoSource>,
        logger: Logger,
    ) -> Result<Self> {
        let store = open_store(&config.store)?;
        Self::start_with_store(config, store, source, logger).await
    }

    /// Start all services on an already opened store, e.g. one shared by
    /// several nodes in the same process.
    pub async fn start_with_store(
        config: PersistenceConfig,
        store: Arc<dyn ObjectStore>,
        source: Arc<dyn MementoSource>,
        logger: Logger,
    ) -> Result<Self> {
        let logger = logger.new(slog::o!("node_id" => config.node_id.clone()));
        info!(logger, "Starting persistence runtime";
            "store" => store.describe(),
            "delta_period_ms" => config.delta_period_ms,
            "heartbeat_interval_ms" => config.heartbeat_interval_ms
        );

        // Created once here and handed to everything that encodes blobs
        let codec = Arc::new(MementoCodec::new());
        let events = Arc::new(EventBus::new(config.event_capacity));
        let queue_config = WriteQueueConfig::from(&config);

        let memento_persister = Arc::new(ObjectStoreMementoPersister::new(
            store.clone(),
            codec.clone(),
            queue_config,
            events.clone(),
            logger.clone(),
        ));
        let sync_persister = Arc::new(ObjectStoreSyncRecordPersister::new(
            store,
            codec,
            queue_config,
            events.clone(),
            logger.clone(),
        ));

        let change_listener = Arc::new(PeriodicDeltaChangeListener::new(
            memento_persister.clone(),
            source,
            events.clone(),
            logger.clone(),
        ));
        change_listener.start(config.delta_period());

        let heartbeat = HeartbeatPublisher::new(
            sync_persister.clone(),
            config.node_id.clone(),
            config.heartbeat_interval(),
            logger.clone(),
        )
        .with_remote_address(config.remote_address.clone())
        .start(NodeStatus::Standby);

        info!(logger, "Persistence runtime started");

        Ok(Self {
            config,
            events,
            memento_persister,
            sync_persister,
            change_listener,
            heartbeat: Mutex::new(Some(heartbeat)),
            logger,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Receive asynchronous write failures from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<PersistenceEvent> {
        self.events.subscribe()
    }

    pub fn memento_persister(&self) -> Arc<dyn MementoPersister> {
        self.memento_persister.clone()
    }

    pub fn sync_record_persister(&self) -> Arc<dyn SyncRecordPersister> {
        self.sync_persister.clone()
    }

    pub fn change_listener(&self) -> Arc<PeriodicDeltaChangeListener> {
        self.change_listener.clone()
    }

    /// Listener to install on the live entity `entity_id`.
    ///
    /// Once the runtime is shutting down this is a no-op listener.
    pub fn entity_listener(&self, entity_id: &str) -> Arc<dyn EntityChangeListener> {
        if self.change_listener.is_stopped() {
            Arc::new(NoopEntityChangeListener)
        } else {
            Arc::new(EntityDeltaTracker::new(entity_id, self.change_listener.clone()))
        }
    }

    /// Load every persisted memento and rebuild the live graph.
    ///
    /// Call during startup, before live objects start reporting changes.
    pub fn rebind(&self) -> Result<RebindGraph> {
        let mementos = self.memento_persister.load_memento()?;
        RebindResolver::new(self.logger.clone()).rebind(&mementos)
    }

    /// Replace the persisted graph and wait until it is stored
    pub async fn checkpoint(&self, graph: &MementoGraph) -> Result<()> {
        self.memento_persister.checkpoint_and_wait(graph).await
    }

    pub fn sync_record(&self) -> Result<ManagementPlaneSyncRecord> {
        self.sync_persister.load_sync_record()
    }

    pub fn is_master(&self) -> Result<bool> {
        Ok(self.sync_record()?.is_master(self.node_id()))
    }

    fn own_record(&self, status: NodeStatus) -> ManagementNodeSyncRecord {
        let mut record =
            ManagementNodeSyncRecord::new(self.node_id(), status, current_timestamp());
        record.remote_address = self.config.remote_address.clone();
        record
    }

    /// Status carried by this node's heartbeats, if the heartbeat is running
    pub fn heartbeat_status(&self) -> Option<NodeStatus> {
        self.heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(HeartbeatHandle::status)
    }

    fn set_heartbeat_status(&self, status: NodeStatus) {
        let heartbeat = self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(heartbeat) = heartbeat.as_ref() {
            heartbeat.set_status(status);
        }
    }

    /// Become master if the cluster has none, or if the recorded master is
    /// no longer live. Returns whether this node is master afterwards.
    ///
    /// There is no fencing: callers running several nodes must ensure only
    /// one of them promotes at a time.
    pub async fn promote_if_no_master(&self) -> Result<bool> {
        let record = self.sync_record()?;
        if record.is_master(self.node_id()) {
            return Ok(true);
        }

        let master_alive = record.master().map(|m| m.status.is_live()).unwrap_or(false);
        if master_alive {
            return Ok(false);
        }

        info!(self.logger, "Promoting to master";
            "previous" => record.master_node_id().unwrap_or("-")
        );
        // Heartbeats published from here on already carry MASTER
        self.set_heartbeat_status(NodeStatus::Master);
        let promoted = self.sync_persister.delta(
            HaDelta::new()
                .upsert_node(self.own_record(NodeStatus::Master))
                .set_master(self.node_id()),
        );
        if let Err(e) = promoted {
            self.set_heartbeat_status(NodeStatus::Standby);
            return Err(e);
        }
        self.sync_persister
            .wait_for_writes_completed(self.config.shutdown_write_timeout())
            .await?;
        Ok(true)
    }

    /// Mark nodes with stale heartbeats FAILED, clearing the master if it is
    /// one of them. Returns the number of nodes marked.
    pub async fn fail_stale_nodes(&self) -> Result<usize> {
        let record = self.sync_record()?;
        let delta = detect_failed_nodes(
            &record,
            current_timestamp(),
            self.config.heartbeat_timeout(),
            self.node_id(),
        );
        if delta.is_empty() {
            return Ok(0);
        }

        let failed = delta.nodes.len();
        for node in &delta.nodes {
            warn!(self.logger, "Node heartbeat timed out"; "failed_node" => &node.node_id);
        }
        self.sync_persister.delta(delta)?;
        self.sync_persister
            .wait_for_writes_completed(self.config.shutdown_write_timeout())
            .await?;
        Ok(failed)
    }

    /// Flush pending changes, publish a TERMINATED heartbeat, give up
    /// mastership, drain writes and stop both persisters.
    pub async fn shutdown(self) -> Result<()> {
        info!(self.logger, "Shutting down persistence runtime");
        let timeout = self.config.shutdown_write_timeout();

        if let Err(e) = self.change_listener.persist_now() {
            warn!(self.logger, "Final delta failed"; "error" => %e);
        }
        self.change_listener.stop().await;

        let heartbeat = self
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.stop().await;
        }

        let was_master = self.is_master().unwrap_or(false);
        let mut farewell = HaDelta::new().upsert_node(self.own_record(NodeStatus::Terminated));
        if was_master {
            farewell = farewell.clear_master();
        }
        self.sync_persister.delta(farewell)?;

        let memento_drained = self.memento_persister.wait_for_writes_completed(timeout).await;
        let sync_drained = self.sync_persister.wait_for_writes_completed(timeout).await;

        self.memento_persister.stop();
        self.sync_persister.stop();

        memento_drained?;
        sync_drained?;
        info!(self.logger, "Persistence runtime stopped"; "was_master" => was_master);
        Ok(())
    }
}
