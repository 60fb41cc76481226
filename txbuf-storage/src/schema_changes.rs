//! Schema-change markers keyed by log position.
//!
//! DDL records are recorded as pending when mined and flipped to applied
//! once the schema history has absorbed them. A replayed DDL record whose
//! marker is already applied is skipped.

use std::sync::Arc;

use txbuf_core::{LogPosition, SchemaChangeMarker, TxBufResult};

use crate::cache::codec::{collect_entries, decode_value, encode_value, position_key};
use crate::cache::CacheBackend;

/// Cache of pending and applied schema changes.
pub struct SchemaChangeCache {
    cache: Arc<dyn CacheBackend>,
}

impl SchemaChangeCache {
    pub fn new(cache: Arc<dyn CacheBackend>) -> Self {
        Self { cache }
    }

    /// Record a DDL record as pending at its position.
    ///
    /// Returns `false` without touching the stored marker if one already
    /// exists at that position, so an applied marker is never reset.
    pub fn record_pending(&self, marker: SchemaChangeMarker) -> TxBufResult<bool> {
        let position = marker.position;
        if self.get(position)?.is_some() {
            tracing::debug!(position = %position, "Schema change already recorded");
            return Ok(false);
        }

        let marker = SchemaChangeMarker {
            applied: false,
            ..marker
        };
        self.cache.put(
            &position_key(position),
            &encode_value(self.cache.name(), &marker)?,
        )?;
        tracing::debug!(
            position = %position,
            table = %marker.table_id,
            "Recorded pending schema change"
        );
        Ok(true)
    }

    /// Flip the marker at `position` to applied.
    ///
    /// Returns `true` only for the transition itself. An unknown position is
    /// logged and reported as `false`.
    pub fn mark_applied(&self, position: LogPosition) -> TxBufResult<bool> {
        let Some(mut marker) = self.get(position)? else {
            tracing::warn!(position = %position, "No schema change recorded at position");
            return Ok(false);
        };
        if marker.applied {
            return Ok(false);
        }

        marker.applied = true;
        self.cache.put(
            &position_key(position),
            &encode_value(self.cache.name(), &marker)?,
        )?;
        tracing::debug!(position = %position, "Marked schema change applied");
        Ok(true)
    }

    /// Whether the schema change at `position` is applied; `false` if unknown.
    pub fn is_applied(&self, position: LogPosition) -> TxBufResult<bool> {
        Ok(self.get(position)?.is_some_and(|marker| marker.applied))
    }

    pub fn get(&self, position: LogPosition) -> TxBufResult<Option<SchemaChangeMarker>> {
        self.cache
            .get(&position_key(position))?
            .map(|bytes| decode_value(self.cache.name(), &bytes))
            .transpose()
    }

    /// Markers not yet applied, in ascending position order.
    pub fn pending(&self) -> TxBufResult<Vec<SchemaChangeMarker>> {
        let mut pending: Vec<SchemaChangeMarker> =
            collect_entries::<SchemaChangeMarker, _>(self.cache.as_ref(), |m| !m.applied)?
                .into_iter()
                .map(|(_, marker)| marker)
                .collect();
        pending.sort_by_key(|marker| marker.position);
        Ok(pending)
    }

    /// Drop applied markers strictly before `position`. Pending markers are
    /// always kept.
    pub fn prune_applied_before(&self, position: LogPosition) -> TxBufResult<u64> {
        let stale = collect_entries::<SchemaChangeMarker, _>(self.cache.as_ref(), |m| {
            m.applied && m.position < position
        })?;

        let mut removed = 0;
        for (key, _) in stale {
            if self.cache.remove(&key)? {
                removed += 1;
            }
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
