//! Event Bus
//!
//! Broadcasts asynchronous notifications (failed writes, master changes) to
//! any number of subscribers. Publishing never blocks; slow subscribers lose
//! the oldest events.

use tokio::sync::broadcast;

/// Notifications emitted by the background writers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceEvent {
    /// A write failed after exhausting its retries
    WriteFailed { path: String, error: String },

    /// A memento or delta could not be encoded and was dropped
    EncodeFailed { id: String, error: String },
}

/// Broadcast channel wrapper shared by the persisters
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// Create a bus for the given per-subscriber capacity
    ///
    /// # Arguments
    /// * `capacity` - Events buffered per subscriber before the oldest are
    ///   dropped; zero is raised to one
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all current subscribers
    ///
    /// # Arguments
    /// * `event` - The notification to broadcast
    ///
    /// # Returns
    /// Number of subscribers that received the event (0 if there are none)
    pub fn publish(&self, event: E) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Receive all events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(100)
    }
}
