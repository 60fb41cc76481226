//! Embedded cache manager.
//!
//! Runs in-process and hands out either an [`InMemoryCache`] or an
//! [`LmdbCache`] per cache definition, depending on its storage mode.
//! Persistent caches live in `<store_dir>/<cache-name>/`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use txbuf_core::{
    CacheConfiguration, CacheError, GlobalConfiguration, StorageMode, TxBufError, TxBufResult,
};

use super::lmdb_backend::LmdbCache;
use super::memory::InMemoryCache;
use super::traits::{CacheBackend, CacheManager, CacheManagerFactory};

#[derive(Clone)]
enum DefinedCache {
    Memory(Arc<InMemoryCache>),
    Lmdb(Arc<LmdbCache>),
}

impl DefinedCache {
    fn backend(&self) -> Arc<dyn CacheBackend> {
        match self {
            DefinedCache::Memory(cache) => cache.clone(),
            DefinedCache::Lmdb(cache) => cache.clone(),
        }
    }
}

/// In-process cache manager over the memory and LMDB backends.
pub struct EmbeddedCacheManager {
    global: GlobalConfiguration,
    caches: RwLock<HashMap<String, DefinedCache>>,
    shut_down: AtomicBool,
}

impl EmbeddedCacheManager {
    /// Start a manager with the given global configuration.
    pub fn start(global: GlobalConfiguration) -> TxBufResult<Self> {
        global.validate()?;
        tracing::info!(
            manager = %global.name,
            store_dir = %global.store_dir.display(),
            "Using embedded cache manager"
        );
        Ok(Self {
            global,
            caches: RwLock::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn global(&self) -> &GlobalConfiguration {
        &self.global
    }

    fn poisoned(&self, cache_name: &str) -> TxBufError {
        TxBufError::Cache(CacheError::LockPoisoned {
            cache_name: cache_name.to_string(),
        })
    }

    fn open_cache(&self, config: &CacheConfiguration) -> TxBufResult<DefinedCache> {
        let settings = config.settings();
        match settings.storage {
            StorageMode::Memory => Ok(DefinedCache::Memory(Arc::new(
                InMemoryCache::with_statistics(&config.cache_name, settings.statistics),
            ))),
            StorageMode::Persistent => {
                let cache = LmdbCache::open(
                    &config.cache_name,
                    self.global.cache_dir(&config.cache_name),
                    settings.map_size_mb.unwrap_or(self.global.map_size_mb),
                    self.global.max_readers,
                    settings.statistics,
                )
                .map_err(|e| e.into_cache_error(&config.cache_name))?;
                Ok(DefinedCache::Lmdb(Arc::new(cache)))
            }
        }
    }
}

impl CacheManager for EmbeddedCacheManager {
    fn name(&self) -> &str {
        &self.global.name
    }

    fn define_cache(&self, config: &CacheConfiguration) -> TxBufResult<Arc<dyn CacheBackend>> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TxBufError::Cache(CacheError::BackendUnavailable {
                cache_name: config.cache_name.clone(),
                reason: format!("cache manager '{}' is shut down", self.global.name),
            }));
        }

        let mut caches = self
            .caches
            .write()
            .map_err(|_| self.poisoned(&config.cache_name))?;

        if let Some(existing) = caches.get(&config.cache_name) {
            return Ok(existing.backend());
        }

        let cache = self.open_cache(config)?;
        tracing::debug!(
            cache = %config.cache_name,
            source_name = %config.definition.source_name,
            storage = ?config.settings().storage,
            "Defined cache"
        );
        let backend = cache.backend();
        caches.insert(config.cache_name.clone(), cache);
        Ok(backend)
    }

    fn remove_cache(&self, cache_name: &str) -> TxBufResult<()> {
        let removed = self
            .caches
            .write()
            .map_err(|_| self.poisoned(cache_name))?
            .remove(cache_name);

        let dir = match removed {
            Some(DefinedCache::Lmdb(cache)) => cache.path().to_path_buf(),
            _ => self.global.cache_dir(cache_name),
        };

        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| {
                TxBufError::Cache(CacheError::Shutdown {
                    cache_name: cache_name.to_string(),
                    reason: format!("failed to remove {}: {}", dir.display(), e),
                })
            })?;
        }
        Ok(())
    }

    fn cache_exists(&self, cache_name: &str) -> bool {
        let defined = self
            .caches
            .read()
            .map(|caches| caches.contains_key(cache_name))
            .unwrap_or(false);
        defined || self.global.cache_dir(cache_name).exists()
    }

    fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .caches
            .read()
            .map(|caches| caches.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn shutdown(&self) -> TxBufResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let drained: Vec<(String, DefinedCache)> = self
            .caches
            .write()
            .map_err(|_| self.poisoned(&self.global.name))?
            .drain()
            .collect();

        let mut first_error = None;
        for (name, cache) in drained {
            if let DefinedCache::Lmdb(lmdb) = cache {
                if let Err(e) = lmdb.sync() {
                    tracing::warn!(cache = %name, error = %e, "Failed to sync cache on shutdown");
                    first_error.get_or_insert(e);
                }
            }
        }

        tracing::info!(manager = %self.global.name, "Shut down embedded cache manager");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Factory for [`EmbeddedCacheManager`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedCacheManagerFactory;

impl CacheManagerFactory for EmbeddedCacheManagerFactory {
    fn start(&self, global: &GlobalConfiguration) -> TxBufResult<Box<dyn CacheManager>> {
        Ok(Box::new(EmbeddedCacheManager::start(global.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use txbuf_core::{CacheDefinition, CacheSettings};

    fn configuration(name: &str, storage: StorageMode) -> CacheConfiguration {
        CacheConfiguration {
            cache_name: name.to_string(),
            definition: CacheDefinition {
                source_name: format!("user_{}", name),
                settings: CacheSettings {
                    storage,
                    ..Default::default()
                },
            },
        }
    }

    fn manager(temp_dir: &TempDir) -> EmbeddedCacheManager {
        EmbeddedCacheManager::start(GlobalConfiguration {
            store_dir: temp_dir.path().to_path_buf(),
            map_size_mb: 10,
            ..Default::default()
        })
        .expect("manager should start")
    }

    #[test]
    fn test_define_returns_same_cache_twice() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let manager = manager(&temp_dir);
        let config = configuration("events", StorageMode::Memory);

        let first = manager.define_cache(&config).expect("define should succeed");
        first.put(b"k", b"v").expect("put should succeed");

        let second = manager.define_cache(&config).expect("define should succeed");
        assert_eq!(second.get(b"k").expect("get should succeed"), Some(b"v".to_vec()));
        assert_eq!(manager.cache_names(), vec!["events".to_string()]);
    }

    #[test]
    fn test_persistent_cache_lives_under_store_dir() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let manager = manager(&temp_dir);

        manager
            .define_cache(&configuration("transactions", StorageMode::Persistent))
            .expect("define should succeed");
        assert!(temp_dir.path().join("transactions").is_dir());
        assert!(manager.cache_exists("transactions"));
    }

    #[test]
    fn test_remove_cache_deletes_storage() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let manager = manager(&temp_dir);

        let persistent = manager
            .define_cache(&configuration("transactions", StorageMode::Persistent))
            .expect("define should succeed");
        manager
            .define_cache(&configuration("events", StorageMode::Memory))
            .expect("define should succeed");
        drop(persistent);

        manager.remove_cache("transactions").expect("remove should succeed");
        manager.remove_cache("events").expect("remove should succeed");

        assert!(!manager.cache_exists("transactions"));
        assert!(!manager.cache_exists("events"));
        assert!(!temp_dir.path().join("transactions").exists());
        // Removing an unknown cache is a no-op.
        manager.remove_cache("unknown").expect("remove should succeed");
    }

    #[test]
    fn test_define_after_shutdown_fails() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let manager = manager(&temp_dir);

        manager.shutdown().expect("shutdown should succeed");
        manager.shutdown().expect("second shutdown should be a no-op");

        let err = match manager.define_cache(&configuration("events", StorageMode::Memory)) {
            Ok(_) => panic!("define after shutdown should fail"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            TxBufError::Cache(CacheError::BackendUnavailable { .. })
        ));
    }

    #[test]
    fn test_factory_rejects_invalid_global() {
        let global = GlobalConfiguration {
            max_readers: 0,
            ..Default::default()
        };
        assert!(EmbeddedCacheManagerFactory.start(&global).is_err());
    }
}
