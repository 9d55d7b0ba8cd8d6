//! In-memory object store for tests and single-process deployments

use super::ObjectStore;
use crate::error::{PersistError, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Object store backed by an ordered map
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    /// When set, every mutation fails with a storage error
    read_only: AtomicBool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject all subsequent writes (simulates a store that went read-only)
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.read().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.blobs
            .read()
            .map_err(|_| PersistError::storage("<memory>", "lock poisoned"))
    }

    fn write(&self, path: &str) -> Result<RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>>> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(PersistError::storage(path, "store is read-only"));
        }
        self.blobs
            .write()
            .map_err(|_| PersistError::storage(path, "lock poisoned"))
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.write(path)?.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.get(path).cloned())
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.write(path)?.remove(path);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let blobs = self.read()?;
        Ok(blobs
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, _)| path.clone())
            .collect())
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}
