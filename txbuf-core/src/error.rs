//! Error types for txbuf operations

use crate::{LogPosition, SequenceNumber, TransactionId};
use thiserror::Error;

/// Configuration errors raised while resolving cache configuration text.
///
/// All variants are fatal at startup; retrying will not make a malformed
/// configuration valid.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Cache configuration for '{cache_name}' contained no cache definition")]
    NoDefinition { cache_name: String },

    #[error("Cache configuration for '{cache_name}' contains multiple cache definitions ({found:?}) and should only contain one")]
    MultipleDefinitions {
        cache_name: String,
        found: Vec<String>,
    },

    #[error("Cache configuration for '{cache_name}' is malformed: {reason}")]
    Malformed { cache_name: String, reason: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Cache backend errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend unavailable for '{cache_name}': {reason}")]
    BackendUnavailable { cache_name: String, reason: String },

    #[error("Failed to destroy cache '{cache_name}': {reason}")]
    Shutdown { cache_name: String, reason: String },

    #[error("Codec error in cache '{cache_name}': {reason}")]
    Codec { cache_name: String, reason: String },

    #[error("Cache '{cache_name}' is not defined")]
    NotDefined { cache_name: String },

    #[error("Cache lock poisoned for '{cache_name}'")]
    LockPoisoned { cache_name: String },
}

/// Buffering and lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("Out-of-order event for transaction {transaction_id}: sequence {sequence} does not follow {last_sequence}")]
    OutOfOrder {
        transaction_id: TransactionId,
        sequence: SequenceNumber,
        last_sequence: SequenceNumber,
    },

    #[error("Cache lifecycle is {actual}, expected {expected}")]
    InvalidState {
        actual: &'static str,
        expected: &'static str,
    },

    #[error("Streaming context was stopped")]
    Cancelled,

    #[error("Transaction {transaction_id} metadata lists {expected} events but slot {slot} is missing")]
    MissingEvent {
        transaction_id: TransactionId,
        slot: u64,
        expected: u64,
    },

    #[error("Downstream emission failed for transaction {transaction_id} at position {position}: {reason}")]
    EmitFailed {
        transaction_id: TransactionId,
        position: LogPosition,
        reason: String,
    },
}

/// Master error type for all txbuf errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TxBufError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),
}

impl TxBufError {
    /// Whether this error leaves the buffered ordering untrustworthy.
    ///
    /// Configuration and ordering failures stop the pipeline; backend
    /// unavailability is left to the caller to abort or retry the run.
    pub fn is_fatal(&self) -> bool {
        match self {
            TxBufError::Configuration(_) => true,
            TxBufError::Buffer(BufferError::OutOfOrder { .. }) => true,
            TxBufError::Buffer(BufferError::MissingEvent { .. }) => true,
            TxBufError::Cache(CacheError::Codec { .. }) => true,
            _ => false,
        }
    }
}

/// Result type alias for txbuf operations.
pub type TxBufResult<T> = Result<T, TxBufError>;

// =============================================================================
// TESTS
// =============================================================================
