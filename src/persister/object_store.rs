//! Object-store backed memento persister

use super::MementoPersister;
use crate::codec::MementoCodec;
use crate::error::{PersistError, Result};
use crate::events::{EventBus, PersistenceEvent};
use crate::memento::{
    EntityMemento, LocationMemento, Memento, MementoDelta, MementoGraph, MementoKind,
    PolicyMemento,
};
use crate::store::write_queue::WriteQueueConfig;
use crate::store::{ObjectStore, StoreOp, WriteHandle, WriteQueue};
use async_trait::async_trait;
use slog::{debug, info, Logger};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const COMPONENT: &str = "memento persister";

/// Stores one blob per memento at `<kind prefix><id>`
pub struct ObjectStoreMementoPersister {
    store: Arc<dyn ObjectStore>,
    queue: WriteQueue,
    codec: Arc<MementoCodec>,
    running: AtomicBool,
    logger: Logger,
}

impl ObjectStoreMementoPersister {
    /// Create a persister and spawn its background writer.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    /// * `store` - Object store holding one blob per memento
    /// * `codec` - Shared envelope codec for every blob
    /// * `queue_config` - Retry policy of the background writer
    /// * `events` - Bus for asynchronous write failures
    /// * `logger` - Parent logger; a `component` key is added
    pub fn new(
        store: Arc<dyn ObjectStore>,
        codec: Arc<MementoCodec>,
        queue_config: WriteQueueConfig,
        events: Arc<EventBus<PersistenceEvent>>,
        logger: Logger,
    ) -> Self {
        let logger = logger.new(slog::o!("component" => "memento_persister"));
        info!(logger, "Creating memento persister"; "store" => store.describe());

        let queue = WriteQueue::new(store.clone(), queue_config, events, logger.clone());
        Self {
            store,
            queue,
            codec,
            running: AtomicBool::new(true),
            logger,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Checkpoint and wait for the rewrite to reach the store
    pub async fn checkpoint_and_wait(&self, graph: &MementoGraph) -> Result<()> {
        self.checkpoint(graph)?.wait().await
    }

    /// Number of write batches not yet applied
    pub fn backlog(&self) -> u64 {
        self.queue.backlog()
    }

    fn load_kind<M: Memento>(&self, mut add: impl FnMut(M)) -> Result<()> {
        let prefix = M::KIND.prefix();
        for path in self.store.list(prefix)? {
            // Removed by a concurrent writer between list and get
            let Some(bytes) = self.store.get(&path)? else {
                continue;
            };

            let memento: M = self.codec.decode_memento(&bytes).map_err(|e| {
                PersistError::storage(&path, format!("corrupt {}: {}", M::KIND.name(), e))
            })?;

            let expected_id = &path[prefix.len()..];
            if memento.id() != expected_id {
                return Err(PersistError::Codec {
                    reason: format!(
                        "blob at '{}' holds {} '{}'",
                        path,
                        M::KIND.name(),
                        memento.id()
                    ),
                });
            }
            add(memento);
        }
        Ok(())
    }

    fn put_ops<'a, M: Memento + 'a>(
        &self,
        mementos: impl IntoIterator<Item = &'a M>,
        ops: &mut Vec<StoreOp>,
    ) -> Result<()> {
        for memento in mementos {
            ops.push(StoreOp::Put {
                path: M::KIND.path_for(memento.id()),
                bytes: self.codec.encode_memento(memento)?,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MementoPersister for ObjectStoreMementoPersister {
    fn load_memento(&self) -> Result<MementoGraph> {
        if !self.is_running() {
            return Err(PersistError::NotRunning { component: COMPONENT });
        }

        let mut graph = MementoGraph::new();
        self.load_kind::<LocationMemento>(|m| graph.add_location(m))?;
        self.load_kind::<EntityMemento>(|m| graph.add_entity(m))?;
        self.load_kind::<PolicyMemento>(|m| graph.add_policy(m))?;

        info!(self.logger, "Loaded mementos";
            "entities" => graph.count(MementoKind::Entity),
            "locations" => graph.count(MementoKind::Location),
            "policies" => graph.count(MementoKind::Policy)
        );
        Ok(graph)
    }

    fn checkpoint(&self, graph: &MementoGraph) -> Result<WriteHandle> {
        if !self.is_running() {
            debug!(self.logger, "Ignoring checkpoint after stop");
            return Ok(WriteHandle::ready(Ok(())));
        }

        let mut ops = Vec::new();
        self.put_ops(graph.locations(), &mut ops)?;
        self.put_ops(graph.entities(), &mut ops)?;
        self.put_ops(graph.policies(), &mut ops)?;

        for kind in MementoKind::ALL {
            let keep: BTreeSet<String> = graph
                .ids(kind)
                .into_iter()
                .map(|id| kind.path_for(id))
                .collect();
            ops.push(StoreOp::DeleteUnder {
                prefix: kind.prefix().to_string(),
                keep,
            });
        }

        debug!(self.logger, "Enqueueing checkpoint"; "ops" => ops.len());
        self.queue.submit_with_handle(ops)
    }

    fn delta(&self, delta: MementoDelta) -> Result<()> {
        if !self.is_running() {
            debug!(self.logger, "Ignoring delta after stop"; "changes" => delta.len());
            return Ok(());
        }
        if delta.is_empty() {
            return Ok(());
        }

        let mut ops = Vec::with_capacity(delta.len());
        self.put_ops(&delta.locations, &mut ops)?;
        self.put_ops(&delta.entities, &mut ops)?;
        self.put_ops(&delta.policies, &mut ops)?;

        // Removals go last so that an ID both upserted and removed ends up absent
        for kind in MementoKind::ALL {
            for id in delta.removed_ids(kind) {
                ops.push(StoreOp::Delete {
                    path: kind.path_for(id),
                });
            }
        }

        self.queue.submit(ops)
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(self.logger, "Memento persister stopped"; "backlog" => self.queue.backlog());
        }
    }

    async fn wait_for_writes_completed(&self, timeout: Duration) -> Result<()> {
        self.queue.wait_for_completed(timeout).await
    }
}
