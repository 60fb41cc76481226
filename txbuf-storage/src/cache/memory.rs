//! Process-local cache backend.
//!
//! Entries live in an ordered map behind a `RwLock`. Nothing survives a
//! restart; use the LMDB backend when persistence is requested.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use txbuf_core::{CacheError, TxBufError, TxBufResult};

use super::traits::{CacheBackend, CacheStats, EntryVisitor, StatsCounter};

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory cache.
#[derive(Debug)]
pub struct InMemoryCache {
    name: String,
    entries: RwLock<Entries>,
    stats: StatsCounter,
}

impl InMemoryCache {
    /// Create an empty cache.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_statistics(name, true)
    }

    /// Create an empty cache, optionally recording hit/miss counters.
    pub fn with_statistics(name: impl Into<String>, statistics: bool) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(BTreeMap::new()),
            stats: StatsCounter::new(statistics),
        }
    }

    fn read(&self) -> TxBufResult<RwLockReadGuard<'_, Entries>> {
        self.entries.read().map_err(|_| self.poisoned())
    }

    fn write(&self) -> TxBufResult<RwLockWriteGuard<'_, Entries>> {
        self.entries.write().map_err(|_| self.poisoned())
    }

    fn poisoned(&self) -> TxBufError {
        TxBufError::Cache(CacheError::LockPoisoned {
            cache_name: self.name.clone(),
        })
    }
}

impl CacheBackend for InMemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &[u8]) -> TxBufResult<Option<Vec<u8>>> {
        let value = self.read()?.get(key).cloned();
        self.stats.record_read(value.is_some());
        Ok(value)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> TxBufResult<Option<Vec<u8>>> {
        let previous = self.write()?.insert(key.to_vec(), value.to_vec());
        self.stats.record_write();
        Ok(previous)
    }

    fn remove(&self, key: &[u8]) -> TxBufResult<bool> {
        let removed = self.write()?.remove(key).is_some();
        if removed {
            self.stats.record_removals(1);
        }
        Ok(removed)
    }

    fn clear(&self) -> TxBufResult<()> {
        let mut entries = self.write()?;
        let count = entries.len() as u64;
        entries.clear();
        self.stats.record_removals(count);
        Ok(())
    }

    fn size(&self) -> TxBufResult<u64> {
        Ok(self.read()?.len() as u64)
    }

    fn for_each(&self, visitor: &mut EntryVisitor<'_>) -> TxBufResult<()> {
        let entries = self.read()?;
        for (key, value) in entries.iter() {
            if let ControlFlow::Break(()) = visitor(key, value) {
                break;
            }
        }
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}
