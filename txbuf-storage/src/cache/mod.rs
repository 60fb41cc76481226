//! Cache layer: the backend contract and its implementations.
//!
//! [`CacheBackend`] is a byte-oriented key/value contract for one named
//! cache, and [`CacheManager`] is the backend's manager object that defines
//! caches and administers their storage. The buffer components layered on top
//! only ever see these traits.
//!
//! Two backends ship with the crate:
//! - [`InMemoryCache`]: process-local, lost on restart
//! - [`LmdbCache`]: one LMDB environment per cache, survives restart
//!
//! [`EmbeddedCacheManager`] picks between them per cache definition.

pub mod codec;
pub mod embedded;
pub mod lmdb_backend;
pub mod memory;
pub mod traits;

pub use codec::EventSlotKey;
pub use embedded::{EmbeddedCacheManager, EmbeddedCacheManagerFactory};
pub use lmdb_backend::{LmdbCache, LmdbCacheError};
pub use memory::InMemoryCache;
pub use traits::{CacheBackend, CacheManager, CacheManagerFactory, CacheStats, EntryVisitor};
