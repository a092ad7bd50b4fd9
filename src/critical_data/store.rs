//! Backing stores for critical data.
//!
//! The durable deployment keeps critical data in RocksDB; tests and
//! short-lived standalone runs use an in-memory map. Both sit behind
//! [`CriticalDataStore`], which the standalone foundation and the
//! privileged cache write against.

use crate::critical_data::CriticalDataScope;
use crate::errors::{CriticalDataError, Result};
use rocksdb::{Options, DB};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Flat storage key for a `(scope, path)` pair.
///
/// Layout: `cd:<scope-prefix>:<path>`. The scope prefix keeps scopes
/// disjoint so clearing the game-cycle scope is a bounded prefix scan.
pub fn storage_key(scope: CriticalDataScope, path: &str) -> Vec<u8> {
    let prefix = scope.prefix();
    let mut key = Vec::with_capacity(3 + prefix.len() + 1 + path.len());
    key.extend_from_slice(b"cd:");
    key.extend_from_slice(prefix.as_bytes());
    key.push(b':');
    key.extend_from_slice(path.as_bytes());
    key
}

/// Minimal key/value surface the critical-data layer needs from a store.
pub trait CriticalDataStore: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), String>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, String>;

    /// Deletes the key; returns whether it existed.
    fn delete(&self, key: &[u8]) -> Result<bool, String>;

    /// Deletes every key under the prefix; returns how many were removed.
    fn delete_prefix(&self, prefix: &[u8]) -> Result<usize, String>;
}

/// RocksDB-backed store for durable deployments.
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
}

impl RocksStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CriticalDataError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path).map_err(|e| CriticalDataError::Open(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl CriticalDataStore for RocksStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), String> {
        self.db.put(key, value).map_err(|e| e.to_string())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, String> {
        self.db.get(key).map_err(|e| e.to_string())
    }

    fn delete(&self, key: &[u8]) -> Result<bool, String> {
        let existed = self.db.get(key).map_err(|e| e.to_string())?.is_some();
        if existed {
            self.db.delete(key).map_err(|e| e.to_string())?;
        }
        Ok(existed)
    }

    fn delete_prefix(&self, prefix: &[u8]) -> Result<usize, String> {
        let mut removed = 0usize;
        let iter = self.db.prefix_iterator(prefix);
        for item in iter {
            let (key, _) = item.map_err(|e| e.to_string())?;
            if !key.starts_with(prefix) {
                break;
            }
            self.db.delete(&key).map_err(|e| e.to_string())?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// In-memory store for tests and volatile standalone runs.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries, used by tests asserting cleanup.
    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CriticalDataStore for MemoryStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), String> {
        self.map.lock().unwrap().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, String> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> Result<bool, String> {
        Ok(self.map.lock().unwrap().remove(key).is_some())
    }

    fn delete_prefix(&self, prefix: &[u8]) -> Result<usize, String> {
        let mut map = self.map.lock().unwrap();
        let doomed: Vec<Vec<u8>> = map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &doomed {
            map.remove(key);
        }
        Ok(doomed.len())
    }
}
