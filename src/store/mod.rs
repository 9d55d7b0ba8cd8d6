//! Object Store (Layer 0)
//!
//! Path-addressed blob storage consumed by the persisters. Every memento and
//! sync record lives under its own path, so a crash in the middle of a write
//! can damage at most the blob being written.

pub mod memory;
pub mod rocks;
pub mod write_queue;

use crate::config::StoreConfig;
use crate::error::Result;
use std::sync::Arc;

pub use self::memory::InMemoryObjectStore;
pub use self::rocks::RocksDbObjectStore;
pub use write_queue::{StoreOp, WriteHandle, WriteQueue};

/// Blob storage addressed by `/`-separated paths
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` at `path`, replacing any previous value
    fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read the blob at `path`, or `None` if nothing is stored there
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Remove the blob at `path`. Removing an absent path is not an error.
    fn delete(&self, path: &str) -> Result<()>;

    /// List all paths starting with `prefix`, in lexicographic order
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Open the backend selected by `config`
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(InMemoryObjectStore::new())),
        StoreConfig::RocksDb { path, sync_writes } => {
            Ok(Arc::new(RocksDbObjectStore::open(path, *sync_writes)?))
        }
    }
}
