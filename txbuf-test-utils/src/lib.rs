//! txbuf Test Utilities
//!
//! Shared test infrastructure for the txbuf workspace:
//! - Proptest generators for ids, events and markers
//! - Fixtures for configuration text and common event scenarios
//! - A cache manager that fails on demand
//! - Tracing setup for tests

// Re-export core types for convenience
pub use txbuf_core::{
    BufferConfig, Event, LogPosition, LogicalCache, OperationKind, RowImageRef,
    SchemaChangeMarker, StorageMode, TableId, TransactionId, TxBufError, TxBufResult,
};

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use txbuf_core::{CacheConfiguration, CacheError, GlobalConfiguration};
use txbuf_storage::{
    CacheBackend, CacheManager, CacheManagerFactory, EmbeddedCacheManager, TransactionBuffer,
};

// ============================================================================
// TRACING
// ============================================================================

/// Install a `fmt` subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`. Safe to call from every test; only the first call
/// installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_transaction_id() -> impl Strategy<Value = TransactionId> {
        // Oracle-style XIDs: hex with dot separators.
        "[0-9a-f]{4}\\.[0-9a-f]{2}\\.[0-9a-f]{4}".prop_map(TransactionId::new)
    }

    pub fn arb_position() -> impl Strategy<Value = LogPosition> {
        any::<u64>().prop_map(LogPosition::new)
    }

    pub fn arb_table_id() -> impl Strategy<Value = TableId> {
        ("[A-Z][A-Z0-9_]{0,11}", "[A-Z][A-Z0-9_]{0,11}")
            .prop_map(|(schema, table)| TableId::new(schema, table))
    }

    pub fn arb_operation() -> impl Strategy<Value = OperationKind> {
        prop_oneof![
            Just(OperationKind::Insert),
            Just(OperationKind::Update),
            Just(OperationKind::Delete),
        ]
    }

    /// Events of one transaction with strictly increasing sequence numbers
    /// and positions, in arrival order.
    pub fn arb_event_sequence(
        transaction_id: TransactionId,
        max_len: usize,
    ) -> impl Strategy<Value = Vec<Event>> {
        proptest::collection::vec(
            (1u64..100, 1u64..100, arb_table_id(), arb_operation()),
            1..=max_len.max(1),
        )
        .prop_map(move |steps| {
            let mut sequence = 0u64;
            let mut position = 0u64;
            steps
                .into_iter()
                .enumerate()
                .map(|(i, (seq_step, pos_step, table, operation))| {
                    sequence += seq_step;
                    position += pos_step;
                    let image = RowImageRef::new(format!("row-{}", i));
                    match operation {
                        OperationKind::Insert => Event::insert(
                            transaction_id.clone(),
                            sequence,
                            table,
                            image,
                            position,
                        ),
                        OperationKind::Update => Event::update(
                            transaction_id.clone(),
                            sequence,
                            table,
                            image.clone(),
                            image,
                            position,
                        ),
                        OperationKind::Delete => Event::delete(
                            transaction_id.clone(),
                            sequence,
                            table,
                            image,
                            position,
                        ),
                    }
                })
                .collect()
        })
    }

    pub fn arb_schema_change() -> impl Strategy<Value = SchemaChangeMarker> {
        (1u64..1_000_000, arb_table_id(), "[A-Z]{1,10}").prop_map(|(position, table, column)| {
            let ddl = format!("ALTER TABLE {} ADD ({} NUMBER)", table, column);
            SchemaChangeMarker::pending(position, table, ddl)
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use std::path::Path;

    /// One named cache definition.
    pub fn cache_config_text(source_name: &str, storage: StorageMode) -> String {
        let storage = match storage {
            StorageMode::Memory => "memory",
            StorageMode::Persistent => "persistent",
        };
        format!("[cache.{}]\nstorage = \"{}\"\n", source_name, storage)
    }

    /// Global configuration rooted at `store_dir` with a small map size.
    pub fn global_config_text(name: &str, store_dir: &Path) -> String {
        format!(
            "name = \"{}\"\nstore-dir = \"{}\"\nmap-size-mb = 10\nmax-readers = 16\n",
            name,
            store_dir.display().to_string().replace('\\', "\\\\")
        )
    }

    /// All four caches in memory.
    pub fn memory_buffer_config() -> BufferConfig {
        BufferConfig::uniform(cache_config_text("buffer", StorageMode::Memory))
    }

    /// All four caches persisted under `store_dir`, each definition named the
    /// way a user would name it.
    pub fn persistent_buffer_config(store_dir: &Path) -> BufferConfig {
        BufferConfig {
            transactions: cache_config_text("transactions", StorageMode::Persistent),
            events: cache_config_text("events", StorageMode::Persistent),
            processed_transactions: cache_config_text(
                "processed_transactions",
                StorageMode::Persistent,
            ),
            schema_changes: cache_config_text("schema_changes", StorageMode::Persistent),
            global: Some(global_config_text("txbuf-test", store_dir)),
            drop_buffer_on_stop: false,
        }
    }

    pub fn orders_table() -> TableId {
        TableId::new("INVENTORY", "ORDERS")
    }

    pub fn insert_event(transaction_id: &str, sequence: u64, position: u64) -> Event {
        Event::insert(
            transaction_id,
            sequence,
            orders_table(),
            RowImageRef::new(format!("{}:{}:after", transaction_id, sequence)),
            position,
        )
    }

    pub fn update_event(transaction_id: &str, sequence: u64, position: u64) -> Event {
        Event::update(
            transaction_id,
            sequence,
            orders_table(),
            RowImageRef::new(format!("{}:{}:before", transaction_id, sequence)),
            RowImageRef::new(format!("{}:{}:after", transaction_id, sequence)),
            position,
        )
    }

    /// `tx1`: an insert at position 100 followed by an update at 101.
    pub fn tx1_insert_update() -> [Event; 2] {
        [insert_event("tx1", 1, 100), update_event("tx1", 2, 101)]
    }

    pub fn schema_change(position: u64) -> SchemaChangeMarker {
        SchemaChangeMarker::pending(
            position,
            orders_table(),
            "ALTER TABLE INVENTORY.ORDERS ADD (NOTE VARCHAR2(100))",
        )
    }

    /// Every buffered event of a transaction, in drain order.
    pub fn drain_all(buffer: &TransactionBuffer, transaction_id: &str) -> TxBufResult<Vec<Event>> {
        buffer
            .drain_ordered(&TransactionId::new(transaction_id))?
            .collect()
    }
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Shared record of the cache removals a manager was asked to perform.
#[derive(Debug, Clone, Default)]
pub struct RemovalLog(Arc<Mutex<Vec<String>>>);

impl RemovalLog {
    pub fn attempts(&self) -> Vec<String> {
        self.0.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn record(&self, cache_name: &str) {
        if let Ok(mut log) = self.0.lock() {
            log.push(cache_name.to_string());
        }
    }
}

/// Embedded cache manager whose `remove_cache` fails for chosen caches.
pub struct FailingRemovalManager {
    inner: EmbeddedCacheManager,
    failing: HashSet<String>,
    log: RemovalLog,
}

impl CacheManager for FailingRemovalManager {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn define_cache(&self, config: &CacheConfiguration) -> TxBufResult<Arc<dyn CacheBackend>> {
        self.inner.define_cache(config)
    }

    fn remove_cache(&self, cache_name: &str) -> TxBufResult<()> {
        self.log.record(cache_name);
        if self.failing.contains(cache_name) {
            return Err(TxBufError::Cache(CacheError::Shutdown {
                cache_name: cache_name.to_string(),
                reason: "injected removal failure".to_string(),
            }));
        }
        self.inner.remove_cache(cache_name)
    }

    fn cache_exists(&self, cache_name: &str) -> bool {
        self.inner.cache_exists(cache_name)
    }

    fn cache_names(&self) -> Vec<String> {
        self.inner.cache_names()
    }

    fn shutdown(&self) -> TxBufResult<()> {
        self.inner.shutdown()
    }
}

/// Factory for [`FailingRemovalManager`].
#[derive(Debug, Clone, Default)]
pub struct FailingRemovalFactory {
    failing: HashSet<String>,
    log: RemovalLog,
}

impl FailingRemovalFactory {
    pub fn failing<I, S>(caches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing: caches.into_iter().map(Into::into).collect(),
            log: RemovalLog::default(),
        }
    }

    /// Handle on the removals attempted by managers this factory starts.
    pub fn removal_log(&self) -> RemovalLog {
        self.log.clone()
    }
}

impl CacheManagerFactory for FailingRemovalFactory {
    fn start(&self, global: &GlobalConfiguration) -> TxBufResult<Box<dyn CacheManager>> {
        Ok(Box::new(FailingRemovalManager {
            inner: EmbeddedCacheManager::start(global.clone())?,
            failing: self.failing.clone(),
            log: self.log.clone(),
        }))
    }
}
