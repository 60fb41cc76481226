//! Mined events and in-flight transaction metadata

use crate::{LogPosition, RowImageRef, SequenceNumber, TableId, Timestamp, TransactionId};
use serde::{Deserialize, Serialize};

/// Kind of row-level mutation reconstructed from the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

/// A single row-level mutation belonging to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub transaction_id: TransactionId,
    pub sequence_number: SequenceNumber,
    pub table_id: TableId,
    pub operation: OperationKind,
    pub before_image: Option<RowImageRef>,
    pub after_image: Option<RowImageRef>,
    pub position: LogPosition,
}

impl Event {
    pub fn insert(
        transaction_id: impl Into<TransactionId>,
        sequence_number: SequenceNumber,
        table_id: TableId,
        after_image: RowImageRef,
        position: impl Into<LogPosition>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            sequence_number,
            table_id,
            operation: OperationKind::Insert,
            before_image: None,
            after_image: Some(after_image),
            position: position.into(),
        }
    }

    pub fn update(
        transaction_id: impl Into<TransactionId>,
        sequence_number: SequenceNumber,
        table_id: TableId,
        before_image: RowImageRef,
        after_image: RowImageRef,
        position: impl Into<LogPosition>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            sequence_number,
            table_id,
            operation: OperationKind::Update,
            before_image: Some(before_image),
            after_image: Some(after_image),
            position: position.into(),
        }
    }

    pub fn delete(
        transaction_id: impl Into<TransactionId>,
        sequence_number: SequenceNumber,
        table_id: TableId,
        before_image: RowImageRef,
        position: impl Into<LogPosition>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            sequence_number,
            table_id,
            operation: OperationKind::Delete,
            before_image: Some(before_image),
            after_image: None,
            position: position.into(),
        }
    }
}

/// Metadata for one active (uncommitted) transaction.
///
/// Events live in a separate cache keyed by `(transaction_id, slot)` where
/// `slot` runs `0..event_count` in arrival order, so a large transaction never
/// has to fit into a single cached value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    pub transaction_id: TransactionId,
    /// Position of the first event seen for this transaction.
    pub start_position: LogPosition,
    /// Number of stored event slots.
    pub event_count: u64,
    /// Sequence number of the most recently appended event.
    pub last_sequence: SequenceNumber,
    pub started_at: Timestamp,
}

impl TransactionMetadata {
    /// Metadata for a transaction whose first event is `event`, before that
    /// event is counted.
    pub fn begin(event: &Event, started_at: Timestamp) -> Self {
        Self {
            transaction_id: event.transaction_id.clone(),
            start_position: event.position,
            event_count: 0,
            last_sequence: 0,
            started_at,
        }
    }

    /// Whether `sequence` may be appended after the events already stored.
    pub fn accepts(&self, sequence: SequenceNumber) -> bool {
        self.event_count == 0 || sequence > self.last_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn table() -> TableId {
        TableId::new("HR", "EMP")
    }

    #[test]
    fn test_event_constructors_set_images() {
        let insert = Event::insert("tx1", 1, table(), RowImageRef::new("a"), 100u64);
        assert_eq!(insert.operation, OperationKind::Insert);
        assert!(insert.before_image.is_none());
        assert!(insert.after_image.is_some());

        let delete = Event::delete("tx1", 2, table(), RowImageRef::new("a"), 101u64);
        assert_eq!(delete.operation, OperationKind::Delete);
        assert!(delete.after_image.is_none());
    }

    #[test]
    fn test_metadata_accepts_only_increasing_sequences() {
        let first = Event::insert("tx1", 7, table(), RowImageRef::new("a"), 100u64);
        let mut meta = TransactionMetadata::begin(&first, Utc::now());
        assert_eq!(meta.start_position, LogPosition::new(100));
        assert!(meta.accepts(7));

        meta.event_count = 1;
        meta.last_sequence = 7;
        assert!(!meta.accepts(7));
        assert!(!meta.accepts(6));
        assert!(meta.accepts(8));
    }
}
