//! Cache lifecycle management.
//!
//! [`CacheLifecycleManager`] owns the backend manager and the four logical
//! caches, builds the buffer components over them, and tears everything
//! down on close. Components are handed out as [`BufferHandles`] borrowed
//! from the manager, so nothing can keep a cache alive past `close`.
//!
//! ```text
//! Uninitialized --open--> Open --close--> Closed
//! ```

use std::fmt;
use std::sync::Arc;

use txbuf_core::{
    BufferConfig, BufferError, CacheConfiguration, ConfigurationError, Event, LogPosition,
    LogicalCache, TransactionId, TxBufError, TxBufResult,
};

use crate::cache::{
    CacheBackend, CacheManager, CacheManagerFactory, CacheStats, EmbeddedCacheManagerFactory,
};
use crate::context::StreamingContext;
use crate::dedup::DedupCache;
use crate::metrics::{BufferMetrics, NoopMetrics};
use crate::resolver::CacheConfigurationResolver;
use crate::schema_changes::SchemaChangeCache;
use crate::transaction_buffer::TransactionBuffer;

// ============================================================================
// STATE AND REPORTS
// ============================================================================

/// Lifecycle state of a [`CacheLifecycleManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Open,
    Closed,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Open => "open",
            LifecycleState::Closed => "closed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`CacheLifecycleManager::close`].
///
/// Cleanup failures end up here instead of failing the close.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Whether the buffer was dropped (cleared and its caches removed).
    pub dropped: bool,
    /// Caches whose storage was removed.
    pub removed: Vec<String>,
    /// Every failure encountered while clearing, removing or shutting down.
    pub failures: Vec<TxBufError>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Entry count and counters of one logical cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatistics {
    pub cache: LogicalCache,
    pub entries: u64,
    pub stats: CacheStats,
}

/// Statistics of all four caches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStatistics {
    pub caches: Vec<CacheStatistics>,
}

impl BufferStatistics {
    pub fn get(&self, cache: LogicalCache) -> Option<&CacheStatistics> {
        self.caches.iter().find(|stats| stats.cache == cache)
    }

    pub fn entries(&self, cache: LogicalCache) -> u64 {
        self.get(cache).map_or(0, |stats| stats.entries)
    }
}

/// Result of flushing a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The transaction's events were emitted; holds the event count.
    Emitted(u64),
    /// The transaction had already been emitted before; nothing was emitted.
    AlreadyProcessed,
    /// No events were buffered for the transaction.
    Unknown,
}

// ============================================================================
// OPEN CACHES
// ============================================================================

/// Resolved configuration of the four logical caches.
struct ResolvedCaches {
    transactions: CacheConfiguration,
    events: CacheConfiguration,
    processed_transactions: CacheConfiguration,
    schema_changes: CacheConfiguration,
}

impl ResolvedCaches {
    fn resolve(config: &BufferConfig) -> Result<Self, ConfigurationError> {
        let resolve = |cache: LogicalCache| {
            CacheConfigurationResolver::resolve(cache.name(), config.cache_text(cache))
        };
        let resolved = Self {
            transactions: resolve(LogicalCache::Transactions)?,
            events: resolve(LogicalCache::Events)?,
            processed_transactions: resolve(LogicalCache::ProcessedTransactions)?,
            schema_changes: resolve(LogicalCache::SchemaChanges)?,
        };

        // A buffered transaction's metadata and its events are recovered
        // together, so they must live in the same kind of storage.
        let transactions = resolved.transactions.settings().storage;
        let events = resolved.events.settings().storage;
        if transactions != events {
            let expected = format!("{:?}", transactions).to_lowercase();
            return Err(ConfigurationError::InvalidValue {
                field: format!("cache.{}.storage", resolved.events.definition.source_name),
                value: format!("{:?}", events).to_lowercase(),
                reason: format!("events storage must match transactions storage ({})", expected),
            });
        }

        Ok(resolved)
    }
}

/// The four defined caches.
struct CacheSet {
    transactions: Arc<dyn CacheBackend>,
    events: Arc<dyn CacheBackend>,
    processed_transactions: Arc<dyn CacheBackend>,
    schema_changes: Arc<dyn CacheBackend>,
}

impl CacheSet {
    fn define(manager: &dyn CacheManager, resolved: &ResolvedCaches) -> TxBufResult<Self> {
        Ok(Self {
            transactions: manager.define_cache(&resolved.transactions)?,
            events: manager.define_cache(&resolved.events)?,
            processed_transactions: manager.define_cache(&resolved.processed_transactions)?,
            schema_changes: manager.define_cache(&resolved.schema_changes)?,
        })
    }

    fn all(&self) -> [(LogicalCache, &Arc<dyn CacheBackend>); 4] {
        [
            (LogicalCache::Transactions, &self.transactions),
            (LogicalCache::Events, &self.events),
            (LogicalCache::ProcessedTransactions, &self.processed_transactions),
            (LogicalCache::SchemaChanges, &self.schema_changes),
        ]
    }

    fn statistics(&self) -> TxBufResult<BufferStatistics> {
        let caches = self
            .all()
            .into_iter()
            .map(|(cache, backend)| {
                Ok(CacheStatistics {
                    cache,
                    entries: backend.size()?,
                    stats: backend.stats(),
                })
            })
            .collect::<TxBufResult<Vec<_>>>()?;
        Ok(BufferStatistics { caches })
    }
}

struct OpenCaches {
    manager: Box<dyn CacheManager>,
    caches: CacheSet,
    transaction_buffer: TransactionBuffer,
    processed_transactions: DedupCache,
    schema_changes: SchemaChangeCache,
    context: StreamingContext,
}

enum State {
    Uninitialized,
    Open(OpenCaches),
    Closed,
}

// ============================================================================
// LIFECYCLE MANAGER
// ============================================================================

/// Owner of the buffer caches.
pub struct CacheLifecycleManager {
    config: BufferConfig,
    factory: Box<dyn CacheManagerFactory>,
    metrics: Arc<dyn BufferMetrics>,
    state: State,
    span: tracing::Span,
}

impl CacheLifecycleManager {
    pub fn new(
        config: BufferConfig,
        factory: Box<dyn CacheManagerFactory>,
        metrics: Arc<dyn BufferMetrics>,
    ) -> Self {
        Self {
            config,
            factory,
            metrics,
            state: State::Uninitialized,
            span: tracing::info_span!("cache_lifecycle", manager = tracing::field::Empty),
        }
    }

    /// Lifecycle manager over the embedded backends, without metrics.
    pub fn embedded(config: BufferConfig) -> Self {
        Self::new(
            config,
            Box::new(EmbeddedCacheManagerFactory),
            Arc::new(NoopMetrics),
        )
    }

    pub fn state(&self) -> LifecycleState {
        match self.state {
            State::Uninitialized => LifecycleState::Uninitialized,
            State::Open(_) => LifecycleState::Open,
            State::Closed => LifecycleState::Closed,
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Resolve the configuration, start the backend manager and define the
    /// four caches.
    ///
    /// All configuration is resolved before any cache is defined, so a bad
    /// configuration text leaves the backend untouched.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if already open or closed
    /// - `Cancelled` if `context` is stopped
    /// - any configuration or backend error
    pub fn open(&mut self, context: &StreamingContext) -> TxBufResult<BufferHandles<'_>> {
        let span = self.span.clone();
        let _entered = span.enter();

        if !matches!(self.state, State::Uninitialized) {
            return Err(self.invalid_state(LifecycleState::Uninitialized));
        }
        if !context.is_running() {
            return Err(TxBufError::Buffer(BufferError::Cancelled));
        }

        self.config.validate()?;
        let global = CacheConfigurationResolver::resolve_global(self.config.global.as_deref())?;
        let resolved = ResolvedCaches::resolve(&self.config)?;
        span.record("manager", global.name.as_str());

        let manager = self.factory.start(&global)?;
        let caches = match CacheSet::define(manager.as_ref(), &resolved) {
            Ok(caches) => caches,
            Err(e) => {
                tracing::error!(error = %e, "Failed to define caches");
                if let Err(shutdown) = manager.shutdown() {
                    tracing::warn!(error = %shutdown, "Failed to shut down cache manager");
                }
                return Err(e);
            }
        };

        let open = OpenCaches {
            transaction_buffer: TransactionBuffer::new(
                caches.transactions.clone(),
                caches.events.clone(),
            ),
            processed_transactions: DedupCache::new(caches.processed_transactions.clone()),
            schema_changes: SchemaChangeCache::new(caches.schema_changes.clone()),
            manager,
            caches,
            context: context.clone(),
        };

        display_statistics(&open.caches);
        log_recovery(&open.transaction_buffer);
        tracing::info!(
            drop_buffer_on_stop = self.config.drop_buffer_on_stop,
            "Opened buffer caches"
        );

        self.state = State::Open(open);
        self.handles()
    }

    /// Tear down the caches. Never fails; see [`ShutdownReport`].
    ///
    /// With drop-on-stop every cache is cleared and then every cache removal
    /// is attempted, even after an earlier one failed. The backend manager is
    /// shut down in every case. Closing a manager that is not open does
    /// nothing.
    pub fn close(&mut self) -> ShutdownReport {
        let span = self.span.clone();
        let _entered = span.enter();

        match std::mem::replace(&mut self.state, State::Closed) {
            State::Open(open) => self.teardown(open),
            other => {
                self.state = other;
                ShutdownReport::default()
            }
        }
    }

    fn teardown(&self, open: OpenCaches) -> ShutdownReport {
        let OpenCaches {
            manager,
            caches,
            transaction_buffer,
            processed_transactions,
            schema_changes,
            context: _,
        } = open;
        let mut report = ShutdownReport::default();

        if self.config.drop_buffer_on_stop {
            report.dropped = true;
            match transaction_buffer.size() {
                Ok(0) => {}
                Ok(in_flight) => tracing::warn!(
                    in_flight,
                    "Dropping buffer with in-flight transactions; they will not be emitted"
                ),
                Err(e) => tracing::warn!(error = %e, "Failed to count in-flight transactions"),
            }

            tracing::info!("Clearing buffer caches");
            for (cache, backend) in caches.all() {
                if let Err(e) = backend.clear() {
                    tracing::warn!(cache = %cache, error = %e, "Failed to clear cache");
                    report.failures.push(e);
                }
            }
        }

        // Release every handle on the caches before the backend destroys them.
        drop(transaction_buffer);
        drop(processed_transactions);
        drop(schema_changes);
        drop(caches);

        if self.config.drop_buffer_on_stop {
            for cache in LogicalCache::ALL {
                match manager.remove_cache(cache.name()) {
                    Ok(()) => report.removed.push(cache.name().to_string()),
                    Err(e) => {
                        tracing::warn!(cache = %cache, error = %e, "Failed to remove cache");
                        report.failures.push(e);
                    }
                }
            }
        }

        tracing::info!(manager = manager.name(), "Shutting down cache manager");
        if let Err(e) = manager.shutdown() {
            tracing::warn!(error = %e, "Failed to shut down cache manager");
            report.failures.push(e);
        }

        tracing::info!(
            dropped = report.dropped,
            removed = report.removed.len(),
            failures = report.failures.len(),
            "Closed buffer caches"
        );
        report
    }

    /// Handles on the buffer components.
    pub fn handles(&self) -> TxBufResult<BufferHandles<'_>> {
        let open = self.open_caches()?;
        Ok(BufferHandles {
            transaction_buffer: &open.transaction_buffer,
            processed_transactions: &open.processed_transactions,
            schema_changes: &open.schema_changes,
            metrics: self.metrics.as_ref(),
            context: &open.context,
        })
    }

    pub fn transaction_buffer(&self) -> TxBufResult<&TransactionBuffer> {
        Ok(&self.open_caches()?.transaction_buffer)
    }

    pub fn processed_transactions(&self) -> TxBufResult<&DedupCache> {
        Ok(&self.open_caches()?.processed_transactions)
    }

    pub fn schema_changes(&self) -> TxBufResult<&SchemaChangeCache> {
        Ok(&self.open_caches()?.schema_changes)
    }

    /// Entry counts and counters of the four caches.
    pub fn statistics(&self) -> TxBufResult<BufferStatistics> {
        self.open_caches()?.caches.statistics()
    }

    fn open_caches(&self) -> TxBufResult<&OpenCaches> {
        match &self.state {
            State::Open(open) => Ok(open),
            _ => Err(self.invalid_state(LifecycleState::Open)),
        }
    }

    fn invalid_state(&self, expected: LifecycleState) -> TxBufError {
        TxBufError::Buffer(BufferError::InvalidState {
            actual: self.state().as_str(),
            expected: expected.as_str(),
        })
    }
}

impl fmt::Debug for CacheLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLifecycleManager")
            .field("state", &self.state())
            .field("drop_buffer_on_stop", &self.config.drop_buffer_on_stop)
            .finish()
    }
}

fn display_statistics(caches: &CacheSet) {
    for (cache, backend) in caches.all() {
        match backend.size() {
            Ok(entries) => {
                let stats = backend.stats();
                tracing::info!(
                    cache = %cache,
                    entries,
                    hits = stats.hits,
                    misses = stats.misses,
                    "Cache statistics"
                );
            }
            Err(e) => tracing::warn!(cache = %cache, error = %e, "Failed to read cache size"),
        }
    }
}

fn log_recovery(buffer: &TransactionBuffer) {
    match (buffer.size(), buffer.oldest_start_position()) {
        (Ok(0), _) => {}
        (Ok(in_flight), Ok(oldest)) => tracing::info!(
            in_flight,
            oldest_start_position = ?oldest.map(LogPosition::value),
            "Recovered in-flight transactions"
        ),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Failed to inspect recovered transactions")
        }
    }
}

// ============================================================================
// HANDLES
// ============================================================================

/// Borrowed view of the open buffer components.
#[derive(Clone, Copy)]
pub struct BufferHandles<'a> {
    transaction_buffer: &'a TransactionBuffer,
    processed_transactions: &'a DedupCache,
    schema_changes: &'a SchemaChangeCache,
    metrics: &'a dyn BufferMetrics,
    context: &'a StreamingContext,
}

impl<'a> BufferHandles<'a> {
    pub fn transaction_buffer(&self) -> &'a TransactionBuffer {
        self.transaction_buffer
    }

    pub fn processed_transactions(&self) -> &'a DedupCache {
        self.processed_transactions
    }

    pub fn schema_changes(&self) -> &'a SchemaChangeCache {
        self.schema_changes
    }

    /// Buffer an event unless its transaction was already emitted.
    ///
    /// Returns whether the event was buffered, or `Cancelled` once the
    /// streaming context has stopped.
    pub fn buffer_event(&self, event: &Event) -> TxBufResult<bool> {
        if !self.context.is_running() {
            return Err(TxBufError::Buffer(BufferError::Cancelled));
        }

        if self
            .processed_transactions
            .is_processed(&event.transaction_id)?
        {
            tracing::debug!(
                transaction_id = %event.transaction_id,
                sequence = event.sequence_number,
                "Skipping event of processed transaction"
            );
            self.metrics.duplicate_skipped(&event.transaction_id);
            return Ok(false);
        }

        self.transaction_buffer.append(event)?;
        self.metrics.event_buffered(&event.transaction_id);
        Ok(true)
    }

    /// Emit a committed transaction to `sink` in sequence order, record it as
    /// processed and remove it from the buffer.
    ///
    /// The marker is written only after every event reached the sink, so a
    /// failure part way leaves the transaction buffered for a retry.
    ///
    /// # Errors
    ///
    /// - `Cancelled` if the streaming context was stopped
    /// - `EmitFailed` if the sink rejects an event
    pub fn flush_committed<F, E>(
        &self,
        transaction_id: &TransactionId,
        commit_position: LogPosition,
        mut sink: F,
    ) -> TxBufResult<FlushOutcome>
    where
        F: FnMut(Event) -> Result<(), E>,
        E: fmt::Display,
    {
        if !self.context.is_running() {
            return Err(TxBufError::Buffer(BufferError::Cancelled));
        }

        if self.processed_transactions.is_processed(transaction_id)? {
            self.transaction_buffer.remove(transaction_id)?;
            self.metrics.duplicate_skipped(transaction_id);
            tracing::debug!(
                transaction_id = %transaction_id,
                "Skipping commit of processed transaction"
            );
            return Ok(FlushOutcome::AlreadyProcessed);
        }

        if self.transaction_buffer.metadata(transaction_id)?.is_none() {
            tracing::debug!(
                transaction_id = %transaction_id,
                "Commit for transaction with no buffered events"
            );
            return Ok(FlushOutcome::Unknown);
        }

        let mut emitted = 0u64;
        for event in self.transaction_buffer.drain_ordered(transaction_id)? {
            sink(event?).map_err(|e| {
                TxBufError::Buffer(BufferError::EmitFailed {
                    transaction_id: transaction_id.clone(),
                    position: commit_position,
                    reason: e.to_string(),
                })
            })?;
            emitted += 1;
        }

        self.processed_transactions
            .mark_processed(transaction_id, commit_position)?;
        self.transaction_buffer.remove(transaction_id)?;
        self.metrics.transaction_committed(transaction_id, emitted);

        tracing::debug!(
            transaction_id = %transaction_id,
            commit_position = %commit_position,
            events = emitted,
            "Flushed committed transaction"
        );
        Ok(FlushOutcome::Emitted(emitted))
    }

    /// Discard a rolled-back transaction.
    pub fn rollback(&self, transaction_id: &TransactionId) -> TxBufResult<bool> {
        let removed = self.transaction_buffer.rollback(transaction_id)?;
        if removed {
            self.metrics.transaction_rolled_back(transaction_id);
        }
        Ok(removed)
    }

    /// Mark the schema change at `position` applied.
    pub fn apply_schema_change(&self, position: LogPosition) -> TxBufResult<bool> {
        let applied = self.schema_changes.mark_applied(position)?;
        if applied {
            self.metrics.schema_change_applied(position);
        }
        Ok(applied)
    }
}

impl fmt::Debug for BufferHandles<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHandles")
            .field("running", &self.context.is_running())
            .finish()
    }
}
