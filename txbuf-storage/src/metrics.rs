//! Buffer metrics collaborator.
//!
//! The lifecycle manager reports buffer activity through [`BufferMetrics`].
//! Every hook defaults to a no-op so sinks only implement what they export.

use std::sync::atomic::{AtomicU64, Ordering};

use txbuf_core::{LogPosition, TransactionId};

/// Receiver for buffer activity.
pub trait BufferMetrics: Send + Sync {
    /// An event was appended to an in-flight transaction.
    fn event_buffered(&self, _transaction_id: &TransactionId) {}

    /// A committed transaction was emitted downstream.
    fn transaction_committed(&self, _transaction_id: &TransactionId, _event_count: u64) {}

    /// An in-flight transaction was discarded.
    fn transaction_rolled_back(&self, _transaction_id: &TransactionId) {}

    /// An event or commit for an already processed transaction was skipped.
    fn duplicate_skipped(&self, _transaction_id: &TransactionId) {}

    /// A schema change was marked applied.
    fn schema_change_applied(&self, _position: LogPosition) {}
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl BufferMetrics for NoopMetrics {}

/// Atomic counters over the buffer activity.
#[derive(Debug, Default)]
pub struct BufferCounters {
    events_buffered: AtomicU64,
    transactions_committed: AtomicU64,
    events_emitted: AtomicU64,
    transactions_rolled_back: AtomicU64,
    duplicates_skipped: AtomicU64,
    schema_changes_applied: AtomicU64,
}

/// Point-in-time copy of [`BufferCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferCountersSnapshot {
    pub events_buffered: u64,
    pub transactions_committed: u64,
    pub events_emitted: u64,
    pub transactions_rolled_back: u64,
    pub duplicates_skipped: u64,
    pub schema_changes_applied: u64,
}

impl BufferCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BufferCountersSnapshot {
        BufferCountersSnapshot {
            events_buffered: self.events_buffered.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            transactions_rolled_back: self.transactions_rolled_back.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            schema_changes_applied: self.schema_changes_applied.load(Ordering::Relaxed),
        }
    }
}

impl BufferMetrics for BufferCounters {
    fn event_buffered(&self, _transaction_id: &TransactionId) {
        self.events_buffered.fetch_add(1, Ordering::Relaxed);
    }

    fn transaction_committed(&self, _transaction_id: &TransactionId, event_count: u64) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
        self.events_emitted.fetch_add(event_count, Ordering::Relaxed);
    }

    fn transaction_rolled_back(&self, _transaction_id: &TransactionId) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    fn duplicate_skipped(&self, _transaction_id: &TransactionId) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn schema_change_applied(&self, _position: LogPosition) {
        self.schema_changes_applied.fetch_add(1, Ordering::Relaxed);
    }
}
