//! Write Queue (Layer 1)
//!
//! Serializes all writes towards an [`ObjectStore`] behind a single consumer
//! task, so batches reach the store in exactly the order they were submitted.
//! Callers never block on submission. Completion can be observed per batch
//! through a [`WriteHandle`], or for everything submitted so far through
//! [`WriteQueue::wait_for_completed`].
//!
//! Permanent failures are logged and published on the event bus; they are
//! also delivered to the batch's handle when the caller kept one.

use super::ObjectStore;
use crate::config::PersistenceConfig;
use crate::error::{PersistError, Result};
use crate::events::{EventBus, PersistenceEvent};
use slog::{error, warn, Logger};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// A single mutation of the object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Put { path: String, bytes: Vec<u8> },
    Delete { path: String },
    /// Delete every path under `prefix` that is not in `keep`
    DeleteUnder { prefix: String, keep: BTreeSet<String> },
}

impl StoreOp {
    fn describe(&self) -> &str {
        match self {
            StoreOp::Put { path, .. } | StoreOp::Delete { path } => path,
            StoreOp::DeleteUnder { prefix, .. } => prefix,
        }
    }
}

/// Retry policy for the background writer
#[derive(Debug, Clone, Copy)]
pub struct WriteQueueConfig {
    /// Extra attempts after the first failure of an operation
    pub retries: u32,
    /// Delay before retry `n` is `backoff * n`
    pub backoff: Duration,
}

impl Default for WriteQueueConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff: Duration::from_millis(50),
        }
    }
}

impl From<&PersistenceConfig> for WriteQueueConfig {
    fn from(config: &PersistenceConfig) -> Self {
        Self {
            retries: config.write_retries,
            backoff: config.retry_backoff(),
        }
    }
}

/// Completion handle for one submitted batch
pub struct WriteHandle {
    rx: oneshot::Receiver<Result<()>>,
}

impl WriteHandle {
    /// A handle that is already complete with `result`
    pub fn ready(result: Result<()>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// Wait until the batch has been applied to the store
    pub async fn wait(self) -> Result<()> {
        self.rx.await.map_err(|_| PersistError::WriteQueueClosed)?
    }
}

struct WriteBatch {
    seq: u64,
    ops: Vec<StoreOp>,
    done: Option<oneshot::Sender<Result<()>>>,
}

struct Submitter {
    tx: mpsc::UnboundedSender<WriteBatch>,
    last_seq: u64,
}

/// Single-writer queue in front of an object store
pub struct WriteQueue {
    /// Sequence assignment and channel send happen under one lock so that
    /// channel order always matches sequence order.
    submitter: Mutex<Submitter>,
    completed: watch::Receiver<u64>,
}

impl WriteQueue {
    /// Create the queue and spawn its writer task.
    ///
    /// Must be called from within a tokio runtime. The writer task exits once
    /// the queue is dropped and the backlog has drained.
    ///
    /// # Arguments
    /// * `store` - Destination of every batch
    /// * `config` - Retry count and linear backoff for failed operations
    /// * `events` - Bus on which permanently failed writes are published
    /// * `logger` - Logger for retries and failures
    pub fn new(
        store: Arc<dyn ObjectStore>,
        config: WriteQueueConfig,
        events: Arc<EventBus<PersistenceEvent>>,
        logger: Logger,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (completed_tx, completed_rx) = watch::channel(0);

        tokio::spawn(run_writer(store, rx, completed_tx, config, events, logger));

        Self {
            submitter: Mutex::new(Submitter { tx, last_seq: 0 }),
            completed: completed_rx,
        }
    }

    /// Enqueue a batch whose outcome is only reported via logs and the event bus
    pub fn submit(&self, ops: Vec<StoreOp>) -> Result<()> {
        self.enqueue(ops, None)
    }

    /// Enqueue a batch and return a handle resolving with its outcome
    pub fn submit_with_handle(&self, ops: Vec<StoreOp>) -> Result<WriteHandle> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(ops, Some(tx))?;
        Ok(WriteHandle { rx })
    }

    fn enqueue(&self, ops: Vec<StoreOp>, done: Option<oneshot::Sender<Result<()>>>) -> Result<()> {
        let mut submitter = self
            .submitter
            .lock()
            .map_err(|_| PersistError::WriteQueueClosed)?;

        let seq = submitter.last_seq + 1;
        submitter
            .tx
            .send(WriteBatch { seq, ops, done })
            .map_err(|_| PersistError::WriteQueueClosed)?;
        submitter.last_seq = seq;
        Ok(())
    }

    /// Wait until every batch submitted before this call has been applied.
    ///
    /// Fails with [`PersistError::WriteTimeout`] if the backlog does not
    /// drain within `timeout`.
    pub async fn wait_for_completed(&self, timeout: Duration) -> Result<()> {
        let target = self
            .submitter
            .lock()
            .map_err(|_| PersistError::WriteQueueClosed)?
            .last_seq;
        let mut completed = self.completed.clone();

        let drained = async move {
            while *completed.borrow_and_update() < target {
                if completed.changed().await.is_err() {
                    return Err(PersistError::WriteQueueClosed);
                }
            }
            Ok(())
        };

        tokio::time::timeout(timeout, drained)
            .await
            .map_err(|_| PersistError::WriteTimeout(timeout))?
    }

    /// Number of batches submitted but not yet applied
    pub fn backlog(&self) -> u64 {
        let submitted = self.submitter.lock().map(|s| s.last_seq).unwrap_or(0);
        submitted.saturating_sub(*self.completed.borrow())
    }
}

async fn run_writer(
    store: Arc<dyn ObjectStore>,
    mut rx: mpsc::UnboundedReceiver<WriteBatch>,
    completed: watch::Sender<u64>,
    config: WriteQueueConfig,
    events: Arc<EventBus<PersistenceEvent>>,
    logger: Logger,
) {
    while let Some(batch) = rx.recv().await {
        let mut first_error = None;

        for op in &batch.ops {
            if let Err(e) = apply_with_retry(store.as_ref(), op, config, &logger).await {
                error!(logger, "Write permanently failed";
                    "path" => op.describe(),
                    "store" => store.describe(),
                    "error" => %e
                );
                events.publish(PersistenceEvent::WriteFailed {
                    path: op.describe().to_string(),
                    error: e.to_string(),
                });
                first_error.get_or_insert(e);
            }
        }

        if let Some(done) = batch.done {
            let _ = done.send(first_error.map_or(Ok(()), Err));
        }

        completed.send_replace(batch.seq);
    }
}

async fn apply_with_retry(
    store: &dyn ObjectStore,
    op: &StoreOp,
    config: WriteQueueConfig,
    logger: &Logger,
) -> Result<()> {
    let mut attempt = 0;
    loop {
        match apply_op(store, op) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < config.retries => {
                attempt += 1;
                warn!(logger, "Write failed, retrying";
                    "path" => op.describe(),
                    "attempt" => attempt,
                    "error" => %e
                );
                tokio::time::sleep(config.backoff * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn apply_op(store: &dyn ObjectStore, op: &StoreOp) -> Result<()> {
    match op {
        StoreOp::Put { path, bytes } => store.put(path, bytes),
        StoreOp::Delete { path } => store.delete(path),
        StoreOp::DeleteUnder { prefix, keep } => {
            for path in store.list(prefix)? {
                if !keep.contains(&path) {
                    store.delete(&path)?;
                }
            }
            Ok(())
        }
    }
}
