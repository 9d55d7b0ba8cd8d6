//! RocksDB-backed object store
//!
//! Each path is stored as one key in the default column family. Writes of a
//! single path are atomic; listing walks keys forward from the prefix.

use super::ObjectStore;
use crate::error::{PersistError, Result};
use rocksdb::{Direction, IteratorMode, Options, WriteOptions, DB};
use std::path::{Path, PathBuf};

/// Durable object store on a local RocksDB database
pub struct RocksDbObjectStore {
    db: DB,
    path: PathBuf,
    sync_writes: bool,
}

impl RocksDbObjectStore {
    /// Open (or create) the database at `path`
    ///
    /// With `sync_writes` every put/delete is fsynced before returning.
    pub fn open<P: AsRef<Path>>(path: P, sync_writes: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, &path)
            .map_err(|e| PersistError::storage(path.display().to_string(), e))?;

        Ok(Self {
            db,
            path,
            sync_writes,
        })
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }
}

impl ObjectStore for RocksDbObjectStore {
    fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.db
            .put_opt(path.as_bytes(), bytes, &self.write_options())
            .map_err(|e| PersistError::storage(path, e))
    }

    fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.db
            .get(path.as_bytes())
            .map_err(|e| PersistError::storage(path, e))
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.db
            .delete_opt(path.as_bytes(), &self.write_options())
            .map_err(|e| PersistError::storage(path, e))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));

        for item in iter {
            let (key, _) = item.map_err(|e| PersistError::storage(prefix, e))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let path = String::from_utf8(key.to_vec())
                .map_err(|e| PersistError::storage(prefix, e))?;
            paths.push(path);
        }

        Ok(paths)
    }

    fn describe(&self) -> String {
        format!("rocksdb:{}", self.path.display())
    }
}
