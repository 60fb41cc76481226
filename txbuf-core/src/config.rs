//! Configuration types

use crate::{ConfigurationError, TxBufError, TxBufResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The four logical caches the buffer is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalCache {
    Transactions,
    Events,
    ProcessedTransactions,
    SchemaChanges,
}

impl LogicalCache {
    /// All logical caches in the order they are defined on open.
    pub const ALL: [LogicalCache; 4] = [
        LogicalCache::Transactions,
        LogicalCache::Events,
        LogicalCache::ProcessedTransactions,
        LogicalCache::SchemaChanges,
    ];

    /// Internal cache name; stable across restarts.
    pub fn name(self) -> &'static str {
        match self {
            LogicalCache::Transactions => "transactions",
            LogicalCache::Events => "events",
            LogicalCache::ProcessedTransactions => "processed-transactions",
            LogicalCache::SchemaChanges => "schema-changes",
        }
    }
}

impl fmt::Display for LogicalCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a cache keeps its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Process-local; lost on restart.
    #[default]
    Memory,
    /// Stored under the global store directory; survives restart.
    Persistent,
}

/// Settings of one named cache definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(default)]
    pub storage: StorageMode,
    /// Overrides the global map size for a persistent cache.
    #[serde(default)]
    pub map_size_mb: Option<usize>,
    /// Record hit/miss counters.
    #[serde(default = "default_statistics")]
    pub statistics: bool,
}

fn default_statistics() -> bool {
    true
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            storage: StorageMode::Memory,
            map_size_mb: None,
            statistics: true,
        }
    }
}

/// A cache definition as it appeared in the user's configuration text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDefinition {
    /// The name the user gave the definition; never used for storage.
    pub source_name: String,
    pub settings: CacheSettings,
}

/// One resolved definition bound to an internal cache name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfiguration {
    pub cache_name: String,
    pub definition: CacheDefinition,
}

impl CacheConfiguration {
    pub fn settings(&self) -> &CacheSettings {
        &self.definition.settings
    }

    pub fn is_persistent(&self) -> bool {
        self.settings().storage == StorageMode::Persistent
    }
}

/// Largest accepted map size for a persistent cache, in megabytes (1 TiB).
pub const MAX_MAP_SIZE_MB: usize = 1 << 20;

/// Manager-level settings shared by every cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct GlobalConfiguration {
    /// Manager name, used in logs.
    pub name: String,
    /// Root directory for persistent caches; each cache gets a subdirectory.
    pub store_dir: PathBuf,
    /// Default map size for persistent caches.
    pub map_size_mb: usize,
    /// Maximum concurrent readers per persistent cache.
    pub max_readers: u32,
}

impl Default for GlobalConfiguration {
    fn default() -> Self {
        Self {
            name: "txbuf".to_string(),
            store_dir: PathBuf::from("data/txbuf"),
            map_size_mb: 64,
            max_readers: 126,
        }
    }
}

impl GlobalConfiguration {
    /// Directory holding a persistent cache's storage.
    pub fn cache_dir(&self, cache_name: &str) -> PathBuf {
        self.store_dir.join(cache_name)
    }

    pub fn validate(&self) -> TxBufResult<()> {
        if self.map_size_mb == 0 {
            return Err(TxBufError::Configuration(ConfigurationError::InvalidValue {
                field: "map-size-mb".to_string(),
                value: self.map_size_mb.to_string(),
                reason: "map-size-mb must be greater than 0".to_string(),
            }));
        }
        if self.map_size_mb > MAX_MAP_SIZE_MB {
            return Err(TxBufError::Configuration(ConfigurationError::InvalidValue {
                field: "map-size-mb".to_string(),
                value: self.map_size_mb.to_string(),
                reason: format!("map-size-mb must not exceed {}", MAX_MAP_SIZE_MB),
            }));
        }
        if self.max_readers == 0 {
            return Err(TxBufError::Configuration(ConfigurationError::InvalidValue {
                field: "max-readers".to_string(),
                value: self.max_readers.to_string(),
                reason: "max-readers must be greater than 0".to_string(),
            }));
        }
        Ok(())
    }
}

/// Buffer configuration: one configuration text per logical cache, an
/// optional global text, and the drop-on-stop flag.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferConfig {
    pub transactions: String,
    pub events: String,
    pub processed_transactions: String,
    pub schema_changes: String,
    /// Absent means backend defaults.
    pub global: Option<String>,
    /// Delete all buffered state on clean shutdown.
    pub drop_buffer_on_stop: bool,
}

impl BufferConfig {
    /// Use the same configuration text for all four caches.
    pub fn uniform(cache_text: impl Into<String>) -> Self {
        let text = cache_text.into();
        Self {
            transactions: text.clone(),
            events: text.clone(),
            processed_transactions: text.clone(),
            schema_changes: text,
            global: None,
            drop_buffer_on_stop: false,
        }
    }

    pub fn with_global(mut self, global: impl Into<String>) -> Self {
        self.global = Some(global.into());
        self
    }

    pub fn with_drop_buffer_on_stop(mut self, drop: bool) -> Self {
        self.drop_buffer_on_stop = drop;
        self
    }

    /// Configuration text for a logical cache.
    pub fn cache_text(&self, cache: LogicalCache) -> &str {
        match cache {
            LogicalCache::Transactions => &self.transactions,
            LogicalCache::Events => &self.events,
            LogicalCache::ProcessedTransactions => &self.processed_transactions,
            LogicalCache::SchemaChanges => &self.schema_changes,
        }
    }

    /// Every per-cache configuration text is required.
    pub fn validate(&self) -> TxBufResult<()> {
        for cache in LogicalCache::ALL {
            if self.cache_text(cache).trim().is_empty() {
                return Err(TxBufError::Configuration(ConfigurationError::NoDefinition {
                    cache_name: cache.name().to_string(),
                }));
            }
        }
        Ok(())
    }

    /// Create from environment variables.
    ///
    /// Environment variables:
    /// - `TXBUF_CACHE_TRANSACTIONS`
    /// - `TXBUF_CACHE_EVENTS`
    /// - `TXBUF_CACHE_PROCESSED_TRANSACTIONS`
    /// - `TXBUF_CACHE_SCHEMA_CHANGES`
    /// - `TXBUF_GLOBAL_CONFIG` (optional)
    /// - `TXBUF_DROP_BUFFER_ON_STOP` (default: false)
    ///
    /// Missing cache texts are left empty and rejected by [`validate`](Self::validate).
    pub fn from_env() -> Self {
        Self {
            transactions: std::env::var("TXBUF_CACHE_TRANSACTIONS").unwrap_or_default(),
            events: std::env::var("TXBUF_CACHE_EVENTS").unwrap_or_default(),
            processed_transactions: std::env::var("TXBUF_CACHE_PROCESSED_TRANSACTIONS")
                .unwrap_or_default(),
            schema_changes: std::env::var("TXBUF_CACHE_SCHEMA_CHANGES").unwrap_or_default(),
            global: std::env::var("TXBUF_GLOBAL_CONFIG").ok(),
            drop_buffer_on_stop: std::env::var("TXBUF_DROP_BUFFER_ON_STOP")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
        }
    }
}
