//! Configuration for a management node's persistence layer

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which object store backend to use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Volatile in-process store
    Memory,

    /// Local RocksDB database
    RocksDb {
        path: PathBuf,
        #[serde(default = "default_true")]
        sync_writes: bool,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

/// Configuration for persisting state and taking part in HA coordination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Unique identifier of this management node
    pub node_id: String,

    /// Address other nodes can reach this node at (informational)
    #[serde(default)]
    pub remote_address: Option<String>,

    /// Backing object store
    #[serde(default)]
    pub store: StoreConfig,

    /// How often collected changes are flushed as one delta
    #[serde(default = "default_delta_period")]
    pub delta_period_ms: u64,

    /// How often this node publishes its own heartbeat
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Heartbeat age after which another node is considered failed
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,

    /// Extra attempts for a failed store write
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,

    /// Linear backoff between write retries
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// How long shutdown waits for queued writes to drain
    #[serde(default = "default_shutdown_write_timeout")]
    pub shutdown_write_timeout_ms: u64,

    /// Buffer size of the asynchronous error channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_true() -> bool { true }
fn default_delta_period() -> u64 { 1_000 }
fn default_heartbeat_interval() -> u64 { 1_000 }
fn default_heartbeat_timeout() -> u64 { 30_000 }
fn default_write_retries() -> u32 { 2 }
fn default_retry_backoff() -> u64 { 50 }
fn default_shutdown_write_timeout() -> u64 { 10_000 }
fn default_event_capacity() -> usize { 256 }

impl PersistenceConfig {
    /// Configuration for `node_id` with defaults for everything else
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            remote_address: None,
            store: StoreConfig::default(),
            delta_period_ms: default_delta_period(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            write_retries: default_write_retries(),
            retry_backoff_ms: default_retry_backoff(),
            shutdown_write_timeout_ms: default_shutdown_write_timeout(),
            event_capacity: default_event_capacity(),
        }
    }

    /// Parse a configuration from JSON, filling defaults for missing fields
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Persist to a RocksDB database at `path`.
    pub fn with_rocksdb(mut self, path: impl Into<PathBuf>) -> Self {
        self.store = StoreConfig::RocksDb {
            path: path.into(),
            sync_writes: true,
        };
        self
    }

    /// Set the address advertised in heartbeats.
    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = Some(address.into());
        self
    }

    pub fn with_delta_period(mut self, period: Duration) -> Self {
        self.delta_period_ms = period.as_millis() as u64;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the retry policy for failed store writes.
    pub fn with_write_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.write_retries = retries;
        self.retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn delta_period(&self) -> Duration {
        Duration::from_millis(self.delta_period_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn shutdown_write_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_write_timeout_ms)
    }
}
