//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped,
//! crash-safe key-value store. Each persistent cache owns one LMDB
//! environment in its own directory, so destroying a cache is a matter of
//! removing that directory.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get`, `size` and `for_each`
//! - Write transactions for `put`, `remove` and `clear`
//! - Statistics are tracked with atomic counters

use std::fmt;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use txbuf_core::{CacheError, TxBufError, TxBufResult};

use super::traits::{CacheBackend, CacheStats, EntryVisitor, StatsCounter};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// The requested map size does not fit in the address space.
    #[error("Map size of {0} MB overflows")]
    MapSize(usize),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LmdbCacheError {
    /// Attribute this failure to a named cache.
    pub fn into_cache_error(self, cache_name: &str) -> TxBufError {
        TxBufError::Cache(CacheError::BackendUnavailable {
            cache_name: cache_name.to_string(),
            reason: self.to_string(),
        })
    }
}

/// LMDB-backed cache.
///
/// # Example
///
/// ```ignore
/// use txbuf_storage::cache::{CacheBackend, LmdbCache};
///
/// let cache = LmdbCache::open("events", "/var/lib/txbuf/events", 64, 126, true)?;
/// cache.put(b"key", b"value")?;
/// assert_eq!(cache.get(b"key")?, Some(b"value".to_vec()));
/// ```
pub struct LmdbCache {
    name: String,
    path: PathBuf,
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    stats: StatsCounter,
}

impl fmt::Debug for LmdbCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LmdbCache")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

impl LmdbCache {
    /// Open (or create) an LMDB cache in `path`.
    ///
    /// # Arguments
    ///
    /// * `name` - Internal cache name
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    /// * `max_readers` - Maximum concurrent read transactions
    /// * `statistics` - Whether to record hit/miss counters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `max_size_mb` in bytes overflows `usize`
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn open<P: AsRef<Path>>(
        name: impl Into<String>,
        path: P,
        max_size_mb: usize,
        max_readers: u32,
        statistics: bool,
    ) -> Result<Self, LmdbCacheError> {
        let map_size = max_size_mb
            .checked_mul(1024 * 1024)
            .ok_or(LmdbCacheError::MapSize(max_size_mb))?;

        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_readers(max_readers)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            path: path.as_ref().to_path_buf(),
            env,
            db,
            stats: StatsCounter::new(statistics),
        })
    }

    /// Directory holding this cache's LMDB files.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush dirty pages to disk.
    pub fn sync(&self) -> TxBufResult<()> {
        self.env.force_sync().map_err(|e| self.unavailable(e))
    }

    fn unavailable(&self, e: impl fmt::Display) -> TxBufError {
        LmdbCacheError::Transaction(e.to_string()).into_cache_error(&self.name)
    }
}

impl CacheBackend for LmdbCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &[u8]) -> TxBufResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(|e| self.unavailable(e))?;

        let value = self
            .db
            .get(&rtxn, key)
            .map_err(|e| self.unavailable(e))?
            .map(|bytes| bytes.to_vec());

        self.stats.record_read(value.is_some());
        Ok(value)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> TxBufResult<Option<Vec<u8>>> {
        let mut wtxn = self.env.write_txn().map_err(|e| self.unavailable(e))?;

        let previous = self
            .db
            .get(&wtxn, key)
            .map_err(|e| self.unavailable(e))?
            .map(|bytes| bytes.to_vec());

        self.db
            .put(&mut wtxn, key, value)
            .map_err(|e| self.unavailable(e))?;

        wtxn.commit().map_err(|e| self.unavailable(e))?;

        self.stats.record_write();
        Ok(previous)
    }

    fn remove(&self, key: &[u8]) -> TxBufResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(|e| self.unavailable(e))?;

        let deleted = self
            .db
            .delete(&mut wtxn, key)
            .map_err(|e| self.unavailable(e))?;

        wtxn.commit().map_err(|e| self.unavailable(e))?;

        if deleted {
            self.stats.record_removals(1);
        }
        Ok(deleted)
    }

    fn clear(&self) -> TxBufResult<()> {
        let mut wtxn = self.env.write_txn().map_err(|e| self.unavailable(e))?;

        let count = self.db.len(&wtxn).map_err(|e| self.unavailable(e))?;
        self.db.clear(&mut wtxn).map_err(|e| self.unavailable(e))?;

        wtxn.commit().map_err(|e| self.unavailable(e))?;

        self.stats.record_removals(count);
        Ok(())
    }

    fn size(&self) -> TxBufResult<u64> {
        let rtxn = self.env.read_txn().map_err(|e| self.unavailable(e))?;
        self.db.len(&rtxn).map_err(|e| self.unavailable(e))
    }

    fn for_each(&self, visitor: &mut EntryVisitor<'_>) -> TxBufResult<()> {
        let rtxn = self.env.read_txn().map_err(|e| self.unavailable(e))?;

        let iter = self.db.iter(&rtxn).map_err(|e| self.unavailable(e))?;
        for result in iter {
            let (key, value) = result.map_err(|e| self.unavailable(e))?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_cache() -> (LmdbCache, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let cache = LmdbCache::open("events", temp_dir.path().join("events"), 10, 16, true)
            .expect("cache creation should succeed");
        (cache, temp_dir)
    }

    #[test]
    fn test_put_and_get() {
        let (cache, _temp_dir) = create_test_cache();

        assert_eq!(cache.put(b"tx1", b"meta").expect("put should succeed"), None);
        assert_eq!(
            cache.get(b"tx1").expect("get should succeed"),
            Some(b"meta".to_vec())
        );
    }

    #[test]
    fn test_overflowing_map_size_is_an_error() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let path = temp_dir.path().join("events");

        let err = LmdbCache::open("events", &path, usize::MAX, 16, true)
            .expect_err("overflowing map size should fail");
        assert!(matches!(err, LmdbCacheError::MapSize(usize::MAX)));
        assert!(!path.exists());

        let err = err.into_cache_error("events");
        assert!(matches!(
            err,
            TxBufError::Cache(CacheError::BackendUnavailable { .. })
        ));
    }

    #[test]
    fn test_get_nonexistent() {
        let (cache, _temp_dir) = create_test_cache();
        assert!(cache.get(b"missing").expect("get should succeed").is_none());
    }

    #[test]
    fn test_overwrite_returns_previous() {
        let (cache, _temp_dir) = create_test_cache();

        cache.put(b"k", b"first").expect("put should succeed");
        let previous = cache.put(b"k", b"second").expect("put should succeed");
        assert_eq!(previous, Some(b"first".to_vec()));
        assert_eq!(cache.get(b"k").expect("get should succeed"), Some(b"second".to_vec()));
        assert_eq!(cache.size().expect("size should succeed"), 1);
    }

    #[test]
    fn test_remove() {
        let (cache, _temp_dir) = create_test_cache();

        cache.put(b"k", b"v").expect("put should succeed");
        assert!(cache.remove(b"k").expect("remove should succeed"));
        assert!(!cache.remove(b"k").expect("remove should succeed"));
        assert!(cache.get(b"k").expect("get should succeed").is_none());
    }

    #[test]
    fn test_clear() {
        let (cache, _temp_dir) = create_test_cache();

        for i in 0u8..10 {
            cache.put(&[i], &[i]).expect("put should succeed");
        }
        assert_eq!(cache.size().expect("size should succeed"), 10);

        cache.clear().expect("clear should succeed");
        assert!(cache.is_empty().expect("is_empty should succeed"));
        assert_eq!(cache.stats().removals, 10);
    }

    #[test]
    fn test_for_each_visits_in_key_order() {
        let (cache, _temp_dir) = create_test_cache();

        cache.put(b"b", b"2").expect("put should succeed");
        cache.put(b"a", b"1").expect("put should succeed");
        cache.put(b"c", b"3").expect("put should succeed");

        let mut keys = Vec::new();
        cache
            .for_each(&mut |key, _| {
                keys.push(key.to_vec());
                ControlFlow::Continue(())
            })
            .expect("scan should succeed");
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let path = temp_dir.path().join("processed-transactions");

        {
            let cache = LmdbCache::open("processed-transactions", &path, 10, 16, true)
                .expect("cache creation should succeed");
            cache.put(b"tx1", b"101").expect("put should succeed");
            cache.sync().expect("sync should succeed");
        }

        let cache = LmdbCache::open("processed-transactions", &path, 10, 16, true)
            .expect("cache reopen should succeed");
        assert_eq!(cache.get(b"tx1").expect("get should succeed"), Some(b"101".to_vec()));
    }

    #[test]
    fn test_stats() {
        let (cache, _temp_dir) = create_test_cache();

        let _ = cache.get(b"k");
        cache.put(b"k", b"v").expect("put should succeed");
        let _ = cache.get(b"k");
        let _ = cache.get(b"k");

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
    }
}
