//! Cache backend and cache manager traits.
//!
//! This module defines the traits that concrete stores implement. The buffer
//! components depend only on these traits, never on a concrete backend.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use txbuf_core::{CacheConfiguration, GlobalConfiguration, TxBufResult};

/// Visitor used by [`CacheBackend::for_each`]. Return `ControlFlow::Break(())`
/// to stop the scan early.
pub type EntryVisitor<'a> = dyn FnMut(&[u8], &[u8]) -> ControlFlow<()> + 'a;

/// Key/value contract for one named cache.
///
/// This trait abstracts over different stores (in-memory, LMDB, a remote
/// grid). Implementations must be thread-safe: a single writer drives all
/// mutations while a statistics path may call `size` and `for_each`
/// concurrently.
///
/// # Ordering
///
/// No ordering is guaranteed across keys. Only per-key read-after-write
/// consistency for the single writer is required.
pub trait CacheBackend: Send + Sync {
    /// Internal cache name.
    fn name(&self) -> &str;

    /// Get the value stored under `key`.
    fn get(&self, key: &[u8]) -> TxBufResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, returning the previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> TxBufResult<Option<Vec<u8>>>;

    /// Remove `key`. Returns whether an entry was removed.
    fn remove(&self, key: &[u8]) -> TxBufResult<bool>;

    /// Remove every entry.
    fn clear(&self) -> TxBufResult<()>;

    /// Number of entries.
    fn size(&self) -> TxBufResult<u64>;

    /// Visit every entry without materializing the whole cache.
    ///
    /// Each call starts a fresh scan, so recovery can restart it at will.
    fn for_each(&self, visitor: &mut EntryVisitor<'_>) -> TxBufResult<()>;

    /// Hit/miss counters for this cache.
    fn stats(&self) -> CacheStats;

    /// Whether the cache has no entries.
    fn is_empty(&self) -> TxBufResult<bool> {
        Ok(self.size()? == 0)
    }
}

/// The backend's manager object: defines caches and administers their storage.
pub trait CacheManager: Send + Sync {
    /// Manager name from the global configuration.
    fn name(&self) -> &str;

    /// Define (or reopen) a cache from its resolved configuration.
    fn define_cache(&self, config: &CacheConfiguration) -> TxBufResult<Arc<dyn CacheBackend>>;

    /// Administratively destroy a named cache and its stored data.
    fn remove_cache(&self, cache_name: &str) -> TxBufResult<()>;

    /// Whether storage for `cache_name` currently exists.
    fn cache_exists(&self, cache_name: &str) -> bool;

    /// Names of the caches defined through this manager.
    fn cache_names(&self) -> Vec<String>;

    /// Stop the manager. Caches already handed out keep working until dropped.
    fn shutdown(&self) -> TxBufResult<()>;
}

/// Starts a [`CacheManager`] from a resolved global configuration.
pub trait CacheManagerFactory: Send + Sync {
    fn start(&self, global: &GlobalConfiguration) -> TxBufResult<Box<dyn CacheManager>>;
}

impl<F> CacheManagerFactory for F
where
    F: Fn(&GlobalConfiguration) -> TxBufResult<Box<dyn CacheManager>> + Send + Sync,
{
    fn start(&self, global: &GlobalConfiguration) -> TxBufResult<Box<dyn CacheManager>> {
        self(global)
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of writes.
    pub writes: u64,
    /// Number of removed entries.
    pub removals: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Atomic counters behind [`CacheStats`], shared by the backends.
#[derive(Debug, Default)]
pub(crate) struct StatsCounter {
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    removals: AtomicU64,
}

impl StatsCounter {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    pub(crate) fn record_read(&self, hit: bool) {
        if !self.enabled {
            return;
        }
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_write(&self) {
        if self.enabled {
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_removals(&self, count: u64) {
        if self.enabled {
            self.removals.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
        }
    }
}
