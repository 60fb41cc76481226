//! txbuf Storage - Cache Backends and Transaction Buffering
//!
//! Layers the buffering and deduplication semantics on top of a key/value
//! cache backend:
//!
//! - [`cache`]: the backend contract plus the in-memory and LMDB backends
//! - [`resolver`]: binds opaque configuration text to the internal cache names
//! - [`lifecycle`]: opens, closes and optionally destroys the four caches
//! - [`transaction_buffer`], [`dedup`], [`schema_changes`]: the buffer components
//!
//! # Example
//!
//! ```ignore
//! use txbuf_core::{BufferConfig, LogPosition};
//! use txbuf_storage::{CacheLifecycleManager, StreamingContext};
//!
//! let mut lifecycle = CacheLifecycleManager::embedded(BufferConfig::from_env());
//! let handles = lifecycle.open(&StreamingContext::new())?;
//! handles.buffer_event(&event)?;
//! handles.flush_committed(&event.transaction_id, LogPosition::new(110), |e| emit(e))?;
//! let report = lifecycle.close();
//! ```

pub mod cache;
pub mod context;
pub mod dedup;
pub mod lifecycle;
pub mod metrics;
pub mod resolver;
pub mod schema_changes;
pub mod transaction_buffer;

pub use cache::{
    CacheBackend, CacheManager, CacheManagerFactory, CacheStats, EmbeddedCacheManager,
    EmbeddedCacheManagerFactory, EntryVisitor, EventSlotKey, InMemoryCache, LmdbCache,
    LmdbCacheError,
};
pub use context::StreamingContext;
pub use dedup::DedupCache;
pub use lifecycle::{
    BufferHandles, BufferStatistics, CacheLifecycleManager, CacheStatistics, FlushOutcome,
    LifecycleState, ShutdownReport,
};
pub use metrics::{BufferCounters, BufferCountersSnapshot, BufferMetrics, NoopMetrics};
pub use resolver::CacheConfigurationResolver;
pub use schema_changes::SchemaChangeCache;
pub use transaction_buffer::{DrainOrdered, TransactionBuffer};
