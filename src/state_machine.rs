//! State Machine
//!
//! A deterministic state machine applies ordered commands and emits events
//! describing what changed. Snapshots let a fresh instance be restored to the
//! same state.

use crate::error::Result;

/// Deterministic command-applying state machine
pub trait StateMachine: Send + Sync {
    /// Command type applied in submission order
    type Command;

    /// Event type describing applied changes
    type Event: Clone + Send + Sync;

    /// Apply a command, returning the resulting events.
    ///
    /// A command that is rejected must leave the state untouched.
    fn apply(&mut self, command: &Self::Command) -> Result<Vec<Self::Event>>;

    /// Serialize the current state
    fn snapshot(&self) -> Result<Vec<u8>>;

    /// Replace the current state with a previously taken snapshot
    fn restore(&mut self, snapshot: &[u8]) -> Result<()>;
}
