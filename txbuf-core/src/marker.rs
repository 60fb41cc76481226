//! Markers recording what has already been emitted downstream

use crate::{LogPosition, TableId, Timestamp, TransactionId};
use serde::{Deserialize, Serialize};

/// Records that a committed transaction has been emitted.
///
/// Presence of a marker means the transaction must not be re-buffered or
/// re-emitted, even when a restart replays earlier log positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedTransactionMarker {
    pub transaction_id: TransactionId,
    pub commit_position: LogPosition,
    pub recorded_at: Timestamp,
}

/// A DDL record seen in the log and whether it has been applied to the
/// downstream schema representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChangeMarker {
    pub position: LogPosition,
    pub table_id: TableId,
    pub ddl_text: String,
    pub applied: bool,
}

impl SchemaChangeMarker {
    /// A marker for a DDL record that has not been applied yet.
    pub fn pending(
        position: impl Into<LogPosition>,
        table_id: TableId,
        ddl_text: impl Into<String>,
    ) -> Self {
        Self {
            position: position.into(),
            table_id,
            ddl_text: ddl_text.into(),
            applied: false,
        }
    }
}
