//! Periodic delta persistence
//!
//! Collects the IDs of changed and removed objects. Every period (or on
//! [`persist_now`](PeriodicDeltaChangeListener::persist_now)) the collected
//! set is swapped out, mementos are generated for it, and a single delta is
//! handed to the persister. Changes arriving meanwhile go into the next
//! period's collector.

use super::MementoSource;
use crate::error::Result;
use crate::events::{EventBus, PersistenceEvent};
use crate::memento::MementoDelta;
use crate::persister::MementoPersister;
use slog::{debug, info, warn, Logger};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;

#[derive(Debug, Default)]
struct DeltaCollector {
    entities: BTreeSet<String>,
    locations: BTreeSet<String>,
    policies: BTreeSet<String>,
    removed_entity_ids: BTreeSet<String>,
    removed_location_ids: BTreeSet<String>,
    removed_policy_ids: BTreeSet<String>,
}

impl DeltaCollector {
    fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.locations.is_empty()
            && self.policies.is_empty()
            && self.removed_entity_ids.is_empty()
            && self.removed_location_ids.is_empty()
            && self.removed_policy_ids.is_empty()
    }
}

struct ScheduledTask {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Batches change notifications into periodic deltas
pub struct PeriodicDeltaChangeListener {
    persister: Arc<dyn MementoPersister>,
    source: Arc<dyn MementoSource>,
    collector: Mutex<DeltaCollector>,
    /// Held from the collector swap until the delta is submitted, so deltas
    /// reach the persister in swap order.
    persist_lock: Mutex<()>,
    stopped: AtomicBool,
    write_count: AtomicU64,
    task: Mutex<Option<ScheduledTask>>,
    events: Arc<EventBus<PersistenceEvent>>,
    logger: Logger,
}

impl PeriodicDeltaChangeListener {
    /// Create a listener that is not yet scheduled
    ///
    /// # Arguments
    /// * `persister` - Receives one delta per persist cycle
    /// * `source` - Generates the current memento for a changed ID
    /// * `events` - Bus on which memento generation failures are published
    /// * `logger` - Parent logger; a `component` key is added
    pub fn new(
        persister: Arc<dyn MementoPersister>,
        source: Arc<dyn MementoSource>,
        events: Arc<EventBus<PersistenceEvent>>,
        logger: Logger,
    ) -> Self {
        Self {
            persister,
            source,
            collector: Mutex::new(DeltaCollector::default()),
            persist_lock: Mutex::new(()),
            stopped: AtomicBool::new(false),
            write_count: AtomicU64::new(0),
            task: Mutex::new(None),
            events,
            logger: logger.new(slog::o!("component" => "delta_listener")),
        }
    }

    fn collector(&self) -> MutexGuard<'_, DeltaCollector> {
        self.collector.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a change unless the listener has been stopped
    fn record(&self, update: impl FnOnce(&mut DeltaCollector)) {
        if self.is_stopped() {
            return;
        }
        update(&mut self.collector());
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Whether the periodic task is running
    pub fn is_active(&self) -> bool {
        !self.is_stopped()
            && self
                .task
                .lock()
                .map(|task| task.is_some())
                .unwrap_or(false)
    }

    /// Number of persist cycles that found something to write
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }

    pub fn on_entity_changed(&self, id: &str) {
        self.record(|c| {
            c.entities.insert(id.to_string());
        });
    }

    pub fn on_entity_unmanaged(&self, id: &str) {
        self.record(|c| {
            c.entities.remove(id);
            c.removed_entity_ids.insert(id.to_string());
        });
    }

    pub fn on_location_changed(&self, id: &str) {
        self.record(|c| {
            c.locations.insert(id.to_string());
        });
    }

    pub fn on_location_unmanaged(&self, id: &str) {
        self.record(|c| {
            c.locations.remove(id);
            c.removed_location_ids.insert(id.to_string());
        });
    }

    pub fn on_policy_changed(&self, id: &str) {
        self.record(|c| {
            c.policies.insert(id.to_string());
        });
    }

    pub fn on_policy_unmanaged(&self, id: &str) {
        self.record(|c| {
            c.policies.remove(id);
            c.removed_policy_ids.insert(id.to_string());
        });
    }

    fn generation_failed(&self, kind: &str, id: &str, error: &dyn std::fmt::Display) {
        warn!(self.logger, "Problem generating memento"; "kind" => kind, "id" => id, "error" => %error);
        self.events.publish(PersistenceEvent::EncodeFailed {
            id: id.to_string(),
            error: error.to_string(),
        });
    }

    /// Build a delta from everything collected so far.
    ///
    /// Locations of changed entities, and their ancestors, are included
    /// since a location does not report its own changes.
    fn build_delta(&self, collected: DeltaCollector) -> MementoDelta {
        let mut delta = MementoDelta::new();

        let mut pending_locations = collected.locations;
        for id in &collected.entities {
            match self.source.entity_memento(id) {
                Ok(memento) => {
                    pending_locations.extend(memento.locations().iter().cloned());
                    delta.entities.push(memento);
                }
                Err(e) => self.generation_failed("entity", id, &e),
            }
        }

        let mut seen = BTreeSet::new();
        while let Some(id) = pending_locations.pop_first() {
            if !seen.insert(id.clone()) {
                continue;
            }
            match self.source.location_memento(&id) {
                Ok(memento) => {
                    if let Some(parent) = memento.parent() {
                        if !seen.contains(parent) {
                            pending_locations.insert(parent.to_string());
                        }
                    }
                    delta.locations.push(memento);
                }
                Err(e) => self.generation_failed("location", &id, &e),
            }
        }

        for id in &collected.policies {
            match self.source.policy_memento(id) {
                Ok(memento) => delta.policies.push(memento),
                Err(e) => self.generation_failed("policy", id, &e),
            }
        }

        delta.removed_entity_ids = collected.removed_entity_ids;
        delta.removed_location_ids = collected.removed_location_ids;
        delta.removed_policy_ids = collected.removed_policy_ids;
        delta
    }

    /// Persist everything collected since the last cycle.
    ///
    /// Concurrent calls run one at a time.
    pub fn persist_now(&self) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }

        let _cycle = self.persist_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let collected = std::mem::take(&mut *self.collector());
        if collected.is_empty() {
            return Ok(());
        }

        let delta = self.build_delta(collected);
        debug!(self.logger, "Persisting delta";
            "entities" => delta.entities.len(),
            "locations" => delta.locations.len(),
            "policies" => delta.policies.len(),
            "removed" => delta.removed_entity_ids.len()
                + delta.removed_location_ids.len()
                + delta.removed_policy_ids.len()
        );

        let result = self.persister.delta(delta);
        self.write_count.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// Persist now, then wait for the persister to drain
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        self.persist_now()?;
        self.persister.wait_for_writes_completed(timeout).await
    }

    /// Start persisting every `period`. Has no effect if already started or stopped.
    pub fn start(self: &Arc<Self>, period: Duration) {
        if self.is_stopped() {
            return;
        }
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }

        info!(self.logger, "Starting periodic persistence"; "period_ms" => period.as_millis() as u64);

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let listener = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = listener.persist_now() {
                            warn!(listener.logger, "Problem persisting change-delta"; "error" => %e);
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        *task = Some(ScheduledTask { shutdown_tx, handle });
    }

    /// Stop the periodic task and discard anything not yet persisted
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.shutdown_tx.send(());
            let _ = task.handle.await;
        }

        let discarded = std::mem::take(&mut *self.collector());
        if !discarded.is_empty() {
            info!(self.logger, "Discarded unpersisted changes on stop";
                "entities" => discarded.entities.len(),
                "locations" => discarded.locations.len(),
                "policies" => discarded.policies.len()
            );
        }
    }
}
