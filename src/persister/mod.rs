//! Memento Persister (Layer 3)
//!
//! Turns a memento graph into checkpoints and deltas against an object store,
//! and loads the full graph back on restart.
//!
//! Writes never block the caller: they are encoded, then enqueued on a
//! single-consumer [`WriteQueue`](crate::store::WriteQueue) which applies them
//! in submission order. `wait_for_writes_completed` is the only blocking
//! synchronization point.

pub mod object_store;

use crate::error::Result;
use crate::memento::{MementoDelta, MementoGraph};
use crate::store::WriteHandle;
use async_trait::async_trait;
use std::time::Duration;

pub use object_store::ObjectStoreMementoPersister;

/// Persists the entity, location and policy graph
#[async_trait]
pub trait MementoPersister: Send + Sync {
    /// Load every persisted memento.
    ///
    /// Must only be called while no writes are in flight, typically during
    /// startup before any change listener is running. Fails with
    /// `NotRunning` after [`stop`](Self::stop).
    fn load_memento(&self) -> Result<MementoGraph>;

    /// Replace the entire persisted state with `graph`.
    ///
    /// Returns as soon as the rewrite is enqueued; the handle resolves with
    /// the storage outcome. A no-op after `stop`.
    fn checkpoint(&self, graph: &MementoGraph) -> Result<WriteHandle>;

    /// Enqueue an incremental change. A no-op after `stop`.
    ///
    /// Permanent storage failures are reported on the event bus, not here.
    fn delta(&self, delta: MementoDelta) -> Result<()>;

    /// Permanently disable writes. Idempotent.
    fn stop(&self);

    /// Wait until every write enqueued before this call has been applied
    async fn wait_for_writes_completed(&self, timeout: Duration) -> Result<()>;
}
