//! txbuf Core - Data Types
//!
//! Pure data structures shared by the buffer crates: identifiers, mined
//! events, in-flight transaction metadata, emission markers, configuration,
//! and the error taxonomy. This crate performs no I/O.

pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod marker;

pub use config::{
    BufferConfig, CacheConfiguration, CacheDefinition, CacheSettings, GlobalConfiguration,
    LogicalCache, StorageMode, MAX_MAP_SIZE_MB,
};
pub use error::{BufferError, CacheError, ConfigurationError, TxBufError, TxBufResult};
pub use event::{Event, OperationKind, TransactionMetadata};
pub use identity::{LogPosition, RowImageRef, SequenceNumber, TableId, Timestamp, TransactionId};
pub use marker::{ProcessedTransactionMarker, SchemaChangeMarker};
