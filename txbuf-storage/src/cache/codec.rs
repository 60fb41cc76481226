//! Key and value encoding for the buffer caches.
//!
//! Keys are built so that byte order matches the order the buffer cares
//! about: event slots of one transaction sort by slot, schema-change markers
//! sort by log position. Values are JSON.

use std::ops::ControlFlow;

use serde::de::DeserializeOwned;
use serde::Serialize;
use txbuf_core::{CacheError, LogPosition, TransactionId, TxBufError, TxBufResult};

use super::traits::CacheBackend;

/// Separator byte between the transaction id and the slot.
const SEPARATOR: u8 = 0xFF;

/// Key of one stored event: `(transaction_id, slot)`.
///
/// # Binary Format
///
/// - Bytes 0-3: transaction id length (u32, big-endian)
/// - Bytes 4..4+n: transaction id bytes
/// - Byte 4+n: separator (0xFF)
/// - Last 8 bytes: slot (u64, big-endian)
///
/// The length prefix keeps ids that are prefixes of each other apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventSlotKey {
    transaction_id: TransactionId,
    slot: u64,
}

impl EventSlotKey {
    pub fn new(transaction_id: TransactionId, slot: u64) -> Self {
        Self {
            transaction_id,
            slot,
        }
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    pub fn slot(&self) -> u64 {
        self.slot
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Self::transaction_prefix(&self.transaction_id);
        bytes.extend_from_slice(&self.slot.to_be_bytes());
        bytes
    }

    /// Decode a key from bytes.
    ///
    /// Returns `None` if the length prefix, separator or slot are malformed
    /// or the id is not UTF-8.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let len_bytes: [u8; 4] = bytes.get(0..4)?.try_into().ok()?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if bytes.len() != 4 + len + 1 + 8 {
            return None;
        }
        if bytes[4 + len] != SEPARATOR {
            return None;
        }
        let id = std::str::from_utf8(&bytes[4..4 + len]).ok()?;
        let slot_bytes: [u8; 8] = bytes[5 + len..].try_into().ok()?;
        Some(Self {
            transaction_id: TransactionId::new(id),
            slot: u64::from_be_bytes(slot_bytes),
        })
    }

    /// Prefix shared by every event key of one transaction.
    pub fn transaction_prefix(transaction_id: &TransactionId) -> Vec<u8> {
        let id = transaction_id.as_bytes();
        let mut bytes = Vec::with_capacity(4 + id.len() + 1 + 8);
        bytes.extend_from_slice(&(id.len() as u32).to_be_bytes());
        bytes.extend_from_slice(id);
        bytes.push(SEPARATOR);
        bytes
    }
}

/// Key of a transaction-keyed entry (metadata, processed marker).
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.as_bytes().to_vec()
}

/// Key of a position-keyed entry (schema-change marker).
pub fn position_key(position: LogPosition) -> [u8; 8] {
    position.to_be_bytes()
}

/// Decode a position key; `None` if it is not 8 bytes.
pub fn decode_position_key(bytes: &[u8]) -> Option<LogPosition> {
    let array: [u8; 8] = bytes.try_into().ok()?;
    Some(LogPosition::from_be_bytes(array))
}

pub fn encode_value<T: Serialize>(cache_name: &str, value: &T) -> TxBufResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| codec_error(cache_name, e))
}

pub fn decode_value<T: DeserializeOwned>(cache_name: &str, bytes: &[u8]) -> TxBufResult<T> {
    serde_json::from_slice(bytes).map_err(|e| codec_error(cache_name, e))
}

/// Decode every entry of `cache` whose value passes `keep`.
///
/// Stops at the first value that fails to decode.
pub fn collect_entries<T, F>(cache: &dyn CacheBackend, mut keep: F) -> TxBufResult<Vec<(Vec<u8>, T)>>
where
    T: DeserializeOwned,
    F: FnMut(&T) -> bool,
{
    let name = cache.name();
    let mut entries = Vec::new();
    let mut failure = None;
    cache.for_each(&mut |key, value| match decode_value::<T>(name, value) {
        Ok(decoded) => {
            if keep(&decoded) {
                entries.push((key.to_vec(), decoded));
            }
            ControlFlow::Continue(())
        }
        Err(e) => {
            failure = Some(e);
            ControlFlow::Break(())
        }
    })?;

    match failure {
        Some(e) => Err(e),
        None => Ok(entries),
    }
}

fn codec_error(cache_name: &str, e: serde_json::Error) -> TxBufError {
    TxBufError::Cache(CacheError::Codec {
        cache_name: cache_name.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_key_encode_decode() {
        let key = EventSlotKey::new(TransactionId::new("0a001b00"), 42);
        let encoded = key.encode();
        assert_eq!(encoded.len(), 4 + 8 + 1 + 8);
        assert_eq!(EventSlotKey::decode(&encoded), Some(key));
    }

    #[test]
    fn test_event_keys_sort_by_slot() {
        let id = TransactionId::new("tx");
        let low = EventSlotKey::new(id.clone(), 9).encode();
        let high = EventSlotKey::new(id, 10).encode();
        assert!(low < high);
    }

    #[test]
    fn test_prefix_ids_do_not_collide() {
        let short = EventSlotKey::new(TransactionId::new("tx1"), 0).encode();
        let long = EventSlotKey::new(TransactionId::new("tx10"), 0).encode();
        let short_prefix = EventSlotKey::transaction_prefix(&TransactionId::new("tx1"));
        assert!(short.starts_with(&short_prefix));
        assert!(!long.starts_with(&short_prefix));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(EventSlotKey::decode(&[]), None);
        assert_eq!(EventSlotKey::decode(&[0, 0, 0, 1, b'a']), None);

        let mut bad_separator = EventSlotKey::new(TransactionId::new("a"), 1).encode();
        bad_separator[5] = 0x00;
        assert_eq!(EventSlotKey::decode(&bad_separator), None);
    }

    #[test]
    fn test_value_decode_failure_is_codec_error() {
        let err = decode_value::<u64>("events", b"not json").expect_err("decode should fail");
        assert!(matches!(err, TxBufError::Cache(CacheError::Codec { .. })));
    }

    #[test]
    fn test_collect_entries_filters_and_reports_corruption() {
        use crate::cache::InMemoryCache;

        let cache = InMemoryCache::new("schema-changes");
        for n in 1u64..=4 {
            cache
                .put(&n.to_be_bytes(), &encode_value("schema-changes", &n).expect("encode"))
                .expect("put should succeed");
        }

        let even = collect_entries::<u64, _>(&cache, |n| n % 2 == 0).expect("scan should succeed");
        assert_eq!(even.iter().map(|(_, n)| *n).collect::<Vec<_>>(), vec![2, 4]);

        cache.put(b"bad", b"{").expect("put should succeed");
        let err = collect_entries::<u64, _>(&cache, |_| true).expect_err("scan should fail");
        assert!(matches!(err, TxBufError::Cache(CacheError::Codec { .. })));
    }

    #[test]
    fn test_position_key_roundtrip() {
        let key = position_key(LogPosition::new(1234));
        assert_eq!(decode_position_key(&key), Some(LogPosition::new(1234)));
        assert_eq!(decode_position_key(b"short"), None);
    }
}
