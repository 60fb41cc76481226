//! End-to-end tests of the buffer lifecycle over the embedded backends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;
use txbuf_core::{
    BufferConfig, CacheError, ConfigurationError, GlobalConfiguration, LogPosition, LogicalCache,
    StorageMode, TransactionId, TxBufError,
};
use txbuf_storage::{
    CacheLifecycleManager, CacheManager, EmbeddedCacheManager, FlushOutcome, LifecycleState,
    NoopMetrics, StreamingContext,
};
use txbuf_test_utils::fixtures::{
    cache_config_text, drain_all, insert_event, memory_buffer_config, persistent_buffer_config,
    schema_change, tx1_insert_update,
};
use txbuf_test_utils::{init_test_tracing, FailingRemovalFactory};

fn all_cache_names() -> Vec<String> {
    LogicalCache::ALL
        .iter()
        .map(|cache| cache.name().to_string())
        .collect()
}

#[test]
fn tx1_insert_update_is_buffered_and_flushed_once() {
    init_test_tracing();
    let mut lifecycle = CacheLifecycleManager::embedded(memory_buffer_config());
    let handles = lifecycle
        .open(&StreamingContext::new())
        .expect("open should succeed");
    let [insert, update] = tx1_insert_update();
    let tx1 = TransactionId::new("tx1");

    handles.buffer_event(&insert).expect("buffer insert");
    handles.buffer_event(&update).expect("buffer update");

    let buffered = drain_all(handles.transaction_buffer(), "tx1").expect("drain tx1");
    assert_eq!(buffered, vec![insert.clone(), update.clone()]);

    let mut emitted = Vec::new();
    let outcome = handles
        .flush_committed(&tx1, LogPosition::new(102), |event| {
            emitted.push(event);
            Ok::<(), String>(())
        })
        .expect("flush tx1");
    assert_eq!(outcome, FlushOutcome::Emitted(2));
    assert_eq!(emitted, vec![insert, update]);

    let processed = handles.processed_transactions();
    assert!(processed.is_processed(&tx1).expect("dedup lookup"));
    assert_eq!(
        processed.commit_position(&tx1).expect("dedup lookup"),
        Some(LogPosition::new(102))
    );
    assert!(handles
        .transaction_buffer()
        .is_empty()
        .expect("buffer is_empty"));

    assert!(lifecycle.close().is_clean());
}

#[test]
fn drop_on_stop_empties_and_removes_every_cache() {
    init_test_tracing();
    let store = TempDir::new().expect("TempDir creation should succeed");
    let config = persistent_buffer_config(store.path()).with_drop_buffer_on_stop(true);

    let mut lifecycle = CacheLifecycleManager::embedded(config);
    let handles = lifecycle
        .open(&StreamingContext::new())
        .expect("open should succeed");
    handles
        .buffer_event(&insert_event("tx7", 1, 700))
        .expect("buffer event");
    handles
        .processed_transactions()
        .mark_processed(&TransactionId::new("tx6"), LogPosition::new(650))
        .expect("mark processed");
    handles
        .schema_changes()
        .record_pending(schema_change(690))
        .expect("record schema change");

    for cache in LogicalCache::ALL {
        assert!(store.path().join(cache.name()).is_dir(), "{} storage missing", cache);
    }

    let report = lifecycle.close();
    assert!(report.dropped);
    assert!(report.is_clean(), "unexpected failures: {:?}", report.failures);
    assert_eq!(report.removed, all_cache_names());
    assert_eq!(lifecycle.state(), LifecycleState::Closed);
    for cache in LogicalCache::ALL {
        assert!(!store.path().join(cache.name()).exists(), "{} storage left behind", cache);
    }

    // A fresh backend manager over the same store sees none of them.
    let manager = EmbeddedCacheManager::start(GlobalConfiguration {
        store_dir: store.path().to_path_buf(),
        map_size_mb: 10,
        ..Default::default()
    })
    .expect("manager start should succeed");
    for cache in LogicalCache::ALL {
        assert!(!manager.cache_exists(cache.name()), "{} still exists", cache);
    }
    assert!(manager.cache_names().is_empty());
    manager.shutdown().expect("shutdown should succeed");

    // The same names come back empty.
    let mut reopened = CacheLifecycleManager::embedded(persistent_buffer_config(store.path()));
    reopened
        .open(&StreamingContext::new())
        .expect("reopen should succeed");
    let statistics = reopened.statistics().expect("statistics");
    for cache in LogicalCache::ALL {
        assert_eq!(statistics.entries(cache), 0, "{} not empty", cache);
    }
    reopened.close();
}

#[test]
fn reopen_without_drop_recovers_pending_transaction() {
    init_test_tracing();
    let store = TempDir::new().expect("TempDir creation should succeed");
    let tx1 = TransactionId::new("tx1");
    let [insert, update] = tx1_insert_update();

    {
        let mut lifecycle = CacheLifecycleManager::embedded(persistent_buffer_config(store.path()));
        let handles = lifecycle
            .open(&StreamingContext::new())
            .expect("open should succeed");
        handles.buffer_event(&insert).expect("buffer insert");
        handles.buffer_event(&update).expect("buffer update");
        handles
            .buffer_event(&insert_event("tx0", 1, 90))
            .expect("buffer tx0");
        handles
            .flush_committed(&TransactionId::new("tx0"), LogPosition::new(95), |_| {
                Ok::<(), String>(())
            })
            .expect("flush tx0");

        let report = lifecycle.close();
        assert!(!report.dropped);
        assert!(report.removed.is_empty());
        assert!(report.is_clean());
    }

    let mut lifecycle = CacheLifecycleManager::embedded(persistent_buffer_config(store.path()));
    let handles = lifecycle
        .open(&StreamingContext::new())
        .expect("reopen should succeed");

    let buffer = handles.transaction_buffer();
    assert_eq!(buffer.size().expect("buffer size"), 1);
    assert_eq!(
        buffer.oldest_start_position().expect("low-water mark"),
        Some(LogPosition::new(100))
    );
    assert_eq!(
        drain_all(buffer, "tx1").expect("drain tx1"),
        vec![insert.clone(), update]
    );

    // tx0 was emitted before the restart; its replay is suppressed.
    assert!(!handles
        .buffer_event(&insert_event("tx0", 1, 90))
        .expect("buffer replayed tx0"));

    // The next event of tx1 continues after the recovered sequence.
    let err = handles
        .buffer_event(&insert)
        .expect_err("stale sequence should be rejected");
    assert!(err.is_fatal());

    let outcome = handles
        .flush_committed(&tx1, LogPosition::new(110), |_| Ok::<(), String>(()))
        .expect("flush tx1");
    assert_eq!(outcome, FlushOutcome::Emitted(2));
    lifecycle.close();
}

#[test]
fn removal_failures_are_reported_and_do_not_stop_other_removals() {
    init_test_tracing();
    let factory = FailingRemovalFactory::failing(["transactions", "schema-changes"]);
    let log = factory.removal_log();
    let config = memory_buffer_config().with_drop_buffer_on_stop(true);

    let mut lifecycle =
        CacheLifecycleManager::new(config, Box::new(factory), Arc::new(NoopMetrics));
    lifecycle
        .open(&StreamingContext::new())
        .expect("open should succeed");

    let report = lifecycle.close();
    assert!(report.dropped);
    assert_eq!(log.attempts(), all_cache_names());
    assert_eq!(
        report.removed,
        vec!["events".to_string(), "processed-transactions".to_string()]
    );
    assert_eq!(report.failures.len(), 2);
    assert!(report
        .failures
        .iter()
        .all(|e| matches!(e, TxBufError::Cache(CacheError::Shutdown { .. }))));
    assert_eq!(lifecycle.state(), LifecycleState::Closed);
}

#[test]
fn close_is_idempotent() {
    let store = TempDir::new().expect("TempDir creation should succeed");
    let config = persistent_buffer_config(store.path()).with_drop_buffer_on_stop(true);
    let mut lifecycle = CacheLifecycleManager::embedded(config);
    lifecycle
        .open(&StreamingContext::new())
        .expect("open should succeed");

    let first = lifecycle.close();
    assert_eq!(first.removed.len(), 4);

    let second = lifecycle.close();
    assert!(!second.dropped);
    assert!(second.removed.is_empty());
    assert!(second.is_clean());
}

#[test]
fn clear_resets_every_cache() {
    let mut lifecycle = CacheLifecycleManager::embedded(memory_buffer_config());
    let handles = lifecycle
        .open(&StreamingContext::new())
        .expect("open should succeed");
    let tx1 = TransactionId::new("tx1");

    handles
        .buffer_event(&insert_event("tx1", 1, 10))
        .expect("buffer event");
    handles
        .processed_transactions()
        .mark_processed(&tx1, LogPosition::new(11))
        .expect("mark processed");
    handles
        .schema_changes()
        .record_pending(schema_change(12))
        .expect("record schema change");

    handles.transaction_buffer().clear().expect("clear buffer");
    handles.processed_transactions().clear().expect("clear dedup");
    handles.schema_changes().clear().expect("clear schema changes");

    let statistics = lifecycle.statistics().expect("statistics");
    for cache in LogicalCache::ALL {
        assert_eq!(statistics.entries(cache), 0, "{} not empty", cache);
    }

    let handles = lifecycle.handles().expect("handles");
    assert!(handles
        .processed_transactions()
        .mark_processed(&tx1, LogPosition::new(11))
        .expect("mark processed"));
    assert!(handles
        .schema_changes()
        .record_pending(schema_change(12))
        .expect("record schema change"));
    assert!(handles
        .buffer_event(&insert_event("tx2", 1, 13))
        .expect("buffer event"));
}

#[test]
fn invalid_cache_text_fails_open() {
    let config = BufferConfig {
        events: String::new(),
        ..memory_buffer_config()
    };
    let mut lifecycle = CacheLifecycleManager::embedded(config);
    let err = lifecycle
        .open(&StreamingContext::new())
        .expect_err("open should fail");
    assert!(matches!(err, TxBufError::Configuration(_)));
    assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
}

#[test]
fn mismatched_buffer_storage_fails_open() {
    let store = TempDir::new().expect("TempDir creation should succeed");
    let config = BufferConfig {
        events: cache_config_text("events", StorageMode::Memory),
        ..persistent_buffer_config(store.path())
    };
    let mut lifecycle = CacheLifecycleManager::embedded(config);

    let err = lifecycle
        .open(&StreamingContext::new())
        .expect_err("open should fail");
    assert!(matches!(
        err,
        TxBufError::Configuration(ConfigurationError::InvalidValue { ref field, .. })
            if field == "cache.events.storage"
    ));
    assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
    for cache in LogicalCache::ALL {
        assert!(!store.path().join(cache.name()).exists(), "{} storage created", cache);
    }
}

#[test]
fn persistent_buffer_reads_run_alongside_appends() {
    init_test_tracing();
    const TRANSACTIONS: u64 = 4;
    const EVENTS_PER_TRANSACTION: u64 = 50;

    let store = TempDir::new().expect("TempDir creation should succeed");
    let mut lifecycle = CacheLifecycleManager::embedded(persistent_buffer_config(store.path()));
    lifecycle
        .open(&StreamingContext::new())
        .expect("open should succeed");
    let lifecycle = &lifecycle;
    let handles = lifecycle.handles().expect("handles");
    let writing = AtomicBool::new(true);

    thread::scope(|scope| {
        let writer = scope.spawn(|| {
            let mut position = 0;
            for sequence in 1..=EVENTS_PER_TRANSACTION {
                for tx in 0..TRANSACTIONS {
                    position += 1;
                    let event = insert_event(&format!("tx{}", tx), sequence, position);
                    assert!(handles.buffer_event(&event).expect("buffer event"));
                }
            }
            writing.store(false, Ordering::Release);
        });

        let reader = scope.spawn(|| {
            let buffer = handles.transaction_buffer();
            let mut last_events = 0;
            let mut rounds = 0u64;
            while writing.load(Ordering::Acquire) || rounds == 0 {
                rounds += 1;
                let size = buffer.size().expect("buffer size");
                assert!(size <= TRANSACTIONS);
                assert_eq!(buffer.is_empty().expect("buffer is_empty"), size == 0);
                let ids = buffer.transaction_ids().expect("transaction ids");
                assert!(ids.len() as u64 <= TRANSACTIONS);

                let events = drain_all(buffer, "tx0").expect("drain tx0");
                assert!(events
                    .windows(2)
                    .all(|pair| pair[0].sequence_number < pair[1].sequence_number));

                let statistics = lifecycle.statistics().expect("statistics");
                let buffered = statistics.entries(LogicalCache::Events);
                assert!(buffered >= last_events, "event count went backwards");
                last_events = buffered;
            }
            rounds
        });

        writer.join().expect("writer thread panicked");
        assert!(reader.join().expect("reader thread panicked") > 0);
    });

    let statistics = lifecycle.statistics().expect("statistics");
    assert_eq!(
        statistics.entries(LogicalCache::Events),
        TRANSACTIONS * EVENTS_PER_TRANSACTION
    );
    assert_eq!(statistics.entries(LogicalCache::Transactions), TRANSACTIONS);
    assert_eq!(
        drain_all(handles.transaction_buffer(), "tx3")
            .expect("drain tx3")
            .len() as u64,
        EVENTS_PER_TRANSACTION
    );
}
