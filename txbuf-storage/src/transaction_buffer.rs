//! In-flight transaction buffer.
//!
//! Events of a transaction arrive interleaved with other transactions and
//! are held until the transaction's commit marker is seen. The buffer is
//! split over two caches:
//!
//! - `transactions`: transaction id -> [`TransactionMetadata`]
//! - `events`: `(transaction id, slot)` -> [`Event`], slots `0..event_count`
//!
//! Slots are assigned in arrival order and arrival order must match sequence
//! order, so draining slots in ascending order yields the events in log
//! order without sorting.

use std::iter::FusedIterator;
use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::Utc;
use txbuf_core::{
    BufferError, CacheError, Event, LogPosition, TransactionId, TransactionMetadata, TxBufError,
    TxBufResult,
};

use crate::cache::codec::{
    collect_entries, decode_value, encode_value, transaction_key, EventSlotKey,
};
use crate::cache::CacheBackend;

/// Buffer of in-flight transactions.
pub struct TransactionBuffer {
    transactions: Arc<dyn CacheBackend>,
    events: Arc<dyn CacheBackend>,
}

impl TransactionBuffer {
    pub fn new(transactions: Arc<dyn CacheBackend>, events: Arc<dyn CacheBackend>) -> Self {
        Self {
            transactions,
            events,
        }
    }

    /// Append an event to its transaction, creating the transaction on its
    /// first event.
    ///
    /// # Errors
    ///
    /// `OutOfOrder` if the event's sequence number does not exceed the last
    /// one buffered for the transaction. Nothing is written in that case.
    pub fn append(&self, event: &Event) -> TxBufResult<()> {
        let transaction_id = &event.transaction_id;
        let mut metadata = match self.metadata(transaction_id)? {
            Some(metadata) => metadata,
            None => TransactionMetadata::begin(event, Utc::now()),
        };

        if !metadata.accepts(event.sequence_number) {
            tracing::error!(
                transaction_id = %transaction_id,
                sequence = event.sequence_number,
                last_sequence = metadata.last_sequence,
                "Rejected out-of-order event"
            );
            return Err(TxBufError::Buffer(BufferError::OutOfOrder {
                transaction_id: transaction_id.clone(),
                sequence: event.sequence_number,
                last_sequence: metadata.last_sequence,
            }));
        }

        // Event first: metadata never counts a slot that was not written.
        let slot = metadata.event_count;
        let key = EventSlotKey::new(transaction_id.clone(), slot).encode();
        self.events
            .put(&key, &encode_value(self.events.name(), event)?)?;

        metadata.event_count += 1;
        metadata.last_sequence = event.sequence_number;
        self.transactions.put(
            &transaction_key(transaction_id),
            &encode_value(self.transactions.name(), &metadata)?,
        )?;

        tracing::debug!(
            transaction_id = %transaction_id,
            sequence = event.sequence_number,
            slot,
            "Buffered event"
        );
        Ok(())
    }

    /// Iterate the buffered events of a transaction in sequence order.
    ///
    /// The iterator reads one event per step and does not remove anything.
    /// An unknown transaction yields no events.
    pub fn drain_ordered(&self, transaction_id: &TransactionId) -> TxBufResult<DrainOrdered<'_>> {
        let expected = self.event_count(transaction_id)?;
        Ok(DrainOrdered {
            events: self.events.as_ref(),
            transaction_id: transaction_id.clone(),
            next_slot: 0,
            expected,
            done: false,
        })
    }

    /// Delete a transaction's metadata and events. Returns whether it existed.
    pub fn remove(&self, transaction_id: &TransactionId) -> TxBufResult<bool> {
        let Some(metadata) = self.metadata(transaction_id)? else {
            return Ok(false);
        };

        // Metadata first: once it is gone the transaction is no longer visible.
        self.transactions.remove(&transaction_key(transaction_id))?;
        for slot in 0..metadata.event_count {
            let key = EventSlotKey::new(transaction_id.clone(), slot).encode();
            self.events.remove(&key)?;
        }

        tracing::debug!(
            transaction_id = %transaction_id,
            events = metadata.event_count,
            "Removed transaction"
        );
        Ok(true)
    }

    /// Discard a transaction the source rolled back.
    pub fn rollback(&self, transaction_id: &TransactionId) -> TxBufResult<bool> {
        let removed = self.remove(transaction_id)?;
        if removed {
            tracing::debug!(transaction_id = %transaction_id, "Rolled back transaction");
        }
        Ok(removed)
    }

    /// Number of in-flight transactions.
    pub fn size(&self) -> TxBufResult<u64> {
        self.transactions.size()
    }

    pub fn is_empty(&self) -> TxBufResult<bool> {
        self.transactions.is_empty()
    }

    pub fn metadata(
        &self,
        transaction_id: &TransactionId,
    ) -> TxBufResult<Option<TransactionMetadata>> {
        self.transactions
            .get(&transaction_key(transaction_id))?
            .map(|bytes| decode_value(self.transactions.name(), &bytes))
            .transpose()
    }

    /// Number of buffered events; 0 for an unknown transaction.
    pub fn event_count(&self, transaction_id: &TransactionId) -> TxBufResult<u64> {
        Ok(self
            .metadata(transaction_id)?
            .map_or(0, |metadata| metadata.event_count))
    }

    /// Ids of every in-flight transaction.
    pub fn transaction_ids(&self) -> TxBufResult<Vec<TransactionId>> {
        let mut ids = Vec::new();
        let mut failure = None;
        self.transactions.for_each(&mut |key, _| match std::str::from_utf8(key) {
            Ok(id) => {
                ids.push(TransactionId::new(id));
                ControlFlow::Continue(())
            }
            Err(e) => {
                failure = Some(e.to_string());
                ControlFlow::Break(())
            }
        })?;

        match failure {
            Some(reason) => Err(TxBufError::Cache(CacheError::Codec {
                cache_name: self.transactions.name().to_string(),
                reason,
            })),
            None => Ok(ids),
        }
    }

    /// Lowest start position among in-flight transactions.
    ///
    /// This is the position a resuming miner must restart from so that no
    /// buffered transaction loses its early events.
    pub fn oldest_start_position(&self) -> TxBufResult<Option<LogPosition>> {
        let entries =
            collect_entries::<TransactionMetadata, _>(self.transactions.as_ref(), |_| true)?;
        Ok(entries
            .into_iter()
            .map(|(_, metadata)| metadata.start_position)
            .min())
    }

    /// Drop every buffered transaction.
    pub fn clear(&self) -> TxBufResult<()> {
        self.transactions.clear()?;
        self.events.clear()
    }
}

/// Lazy iterator over a transaction's buffered events.
///
/// Stops after the first error.
pub struct DrainOrdered<'a> {
    events: &'a dyn CacheBackend,
    transaction_id: TransactionId,
    next_slot: u64,
    expected: u64,
    done: bool,
}

impl DrainOrdered<'_> {
    fn read_slot(&self, slot: u64) -> TxBufResult<Event> {
        let key = EventSlotKey::new(self.transaction_id.clone(), slot).encode();
        match self.events.get(&key)? {
            Some(bytes) => decode_value(self.events.name(), &bytes),
            None => Err(TxBufError::Buffer(BufferError::MissingEvent {
                transaction_id: self.transaction_id.clone(),
                slot,
                expected: self.expected,
            })),
        }
    }
}

impl Iterator for DrainOrdered<'_> {
    type Item = TxBufResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next_slot >= self.expected {
            return None;
        }

        let result = self.read_slot(self.next_slot);
        self.next_slot += 1;
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let remaining = usize::try_from(self.expected - self.next_slot).unwrap_or(usize::MAX);
        (0, Some(remaining))
    }
}

impl FusedIterator for DrainOrdered<'_> {}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use proptest::prelude::*;
    use txbuf_core::{RowImageRef, TableId};

    fn buffer() -> TransactionBuffer {
        TransactionBuffer::new(
            Arc::new(InMemoryCache::new("transactions")),
            Arc::new(InMemoryCache::new("events")),
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Strictly increasing appends drain back in the same order.
        #[test]
        fn prop_increasing_appends_drain_in_order(
            steps in proptest::collection::vec(1u64..1000, 1..40),
        ) {
            let buffer = buffer();
            let mut sequence = 0u64;
            let mut appended = Vec::new();
            for (i, step) in steps.iter().enumerate() {
                sequence += step;
                let event = Event::insert(
                    "tx",
                    sequence,
                    TableId::new("S", "T"),
                    RowImageRef::new(format!("r{}", i)),
                    1000 + i as u64,
                );
                buffer.append(&event).unwrap();
                appended.push(event);
            }

            let drained: Vec<Event> = buffer
                .drain_ordered(&TransactionId::new("tx"))
                .unwrap()
                .collect::<TxBufResult<_>>()
                .unwrap();
            prop_assert_eq!(drained, appended);
        }

        /// A non-increasing sequence is rejected and changes nothing.
        #[test]
        fn prop_non_increasing_append_rejected(last in 1u64..1000, back in 0u64..1000) {
            let buffer = buffer();
            let table = TableId::new("S", "T");
            buffer
                .append(&Event::insert("tx", last, table.clone(), RowImageRef::new("a"), 1u64))
                .unwrap();

            let stale = last.saturating_sub(back);
            let result =
                buffer.append(&Event::insert("tx", stale, table, RowImageRef::new("b"), 2u64));
            let rejected = matches!(
                result,
                Err(TxBufError::Buffer(BufferError::OutOfOrder { .. }))
            );
            prop_assert!(rejected);
            prop_assert_eq!(buffer.event_count(&TransactionId::new("tx")).unwrap(), 1);
        }
    }
}
