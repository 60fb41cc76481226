//! Processed-transaction markers.
//!
//! A transaction id present in this cache has already been emitted
//! downstream. After a restart the buffer consults it so that replayed log
//! records never produce a second emission.

use std::sync::Arc;

use chrono::Utc;
use txbuf_core::{LogPosition, ProcessedTransactionMarker, TransactionId, TxBufResult};

use crate::cache::codec::{collect_entries, decode_value, encode_value, transaction_key};
use crate::cache::CacheBackend;

/// Cache of transactions already emitted downstream.
pub struct DedupCache {
    cache: Arc<dyn CacheBackend>,
}

impl DedupCache {
    pub fn new(cache: Arc<dyn CacheBackend>) -> Self {
        Self { cache }
    }

    /// Record `transaction_id` as emitted at `commit_position`.
    ///
    /// Returns `true` on the first marking. Marking again keeps the original
    /// record time and only moves the commit position.
    pub fn mark_processed(
        &self,
        transaction_id: &TransactionId,
        commit_position: LogPosition,
    ) -> TxBufResult<bool> {
        let key = transaction_key(transaction_id);
        let (marker, first) = match self.marker(transaction_id)? {
            Some(mut marker) => {
                marker.commit_position = commit_position;
                (marker, false)
            }
            None => (
                ProcessedTransactionMarker {
                    transaction_id: transaction_id.clone(),
                    commit_position,
                    recorded_at: Utc::now(),
                },
                true,
            ),
        };

        self.cache
            .put(&key, &encode_value(self.cache.name(), &marker)?)?;
        tracing::debug!(
            transaction_id = %transaction_id,
            commit_position = %commit_position,
            first,
            "Marked transaction processed"
        );
        Ok(first)
    }

    pub fn is_processed(&self, transaction_id: &TransactionId) -> TxBufResult<bool> {
        Ok(self.cache.get(&transaction_key(transaction_id))?.is_some())
    }

    /// Commit position recorded for a processed transaction.
    pub fn commit_position(
        &self,
        transaction_id: &TransactionId,
    ) -> TxBufResult<Option<LogPosition>> {
        Ok(self
            .marker(transaction_id)?
            .map(|marker| marker.commit_position))
    }

    pub fn marker(
        &self,
        transaction_id: &TransactionId,
    ) -> TxBufResult<Option<ProcessedTransactionMarker>> {
        self.cache
            .get(&transaction_key(transaction_id))?
            .map(|bytes| decode_value(self.cache.name(), &bytes))
            .transpose()
    }

    /// Drop markers committed strictly before `position`. Returns how many
    /// were removed.
    ///
    /// Safe once the source can no longer replay records below `position`.
    pub fn prune_before(&self, position: LogPosition) -> TxBufResult<u64> {
        let stale = collect_entries::<ProcessedTransactionMarker, _>(self.cache.as_ref(), |m| {
            m.commit_position < position
        })?;

        let mut removed = 0;
        for (key, _) in stale {
            if self.cache.remove(&key)? {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(
                position = %position,
                removed,
                "Pruned processed transaction markers"
            );
        }
        Ok(removed)
    }

    pub fn size(&self) -> TxBufResult<u64> {
        self.cache.size()
    }

    pub fn clear(&self) -> TxBufResult<()> {
        self.cache.clear()
    }
}
