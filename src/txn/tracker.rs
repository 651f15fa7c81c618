//! In-flight transaction tracking and admission control.
//!
//! Each tablet owns one [`TransactionTracker`]. Admission charges the
//! request's serialized size against the tablet's memory budget (a
//! child node in the server's memory accounting tree); a transaction
//! that would push any tracker in the chain over its limit is rejected
//! with a retryable error. Release returns the cached footprint, so it
//! never needs to touch the request again.

use crate::core::error::{SlateError, SlateResult};
use crate::core::memory::MemTracker;
use crate::ops::metrics::{Counter, Gauge, MetricEntity};
use crate::txn::driver::{driver_key, TransactionDriver, TransactionKind};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Gauge: number of transactions currently in-flight, any type.
pub const ALL_TRANSACTIONS_INFLIGHT: &str = "all_transactions_inflight";
/// Gauge: write transactions currently in-flight.
pub const WRITE_TRANSACTIONS_INFLIGHT: &str = "write_transactions_inflight";
/// Gauge: alter-schema transactions currently in-flight.
pub const ALTER_SCHEMA_TRANSACTIONS_INFLIGHT: &str = "alter_schema_transactions_inflight";
/// Counter: transactions rejected because this tablet's usage exceeded
/// the transaction memory limit or the limit of an ancestral tracker.
pub const TRANSACTION_MEMORY_PRESSURE_REJECTIONS: &str = "transaction_memory_pressure_rejections";
/// Counter: transactions rejected because this tablet's own limit was
/// the binding constraint.
pub const TRANSACTION_MEMORY_LIMIT_REJECTIONS: &str = "transaction_memory_limit_rejections";

/// Bound on how many outstanding transactions a drain complaint dumps.
const MAX_TXNS_TO_PRINT: usize = 50;

/// Instrument handles for one tracker.
struct TrackerMetrics {
    all_transactions_inflight: Arc<Gauge>,
    write_transactions_inflight: Arc<Gauge>,
    alter_schema_transactions_inflight: Arc<Gauge>,
    transaction_memory_pressure_rejections: Arc<Counter>,
    transaction_memory_limit_rejections: Arc<Counter>,
}

impl TrackerMetrics {
    fn new(entity: &MetricEntity) -> Self {
        Self {
            all_transactions_inflight: entity.gauge(ALL_TRANSACTIONS_INFLIGHT, 0),
            write_transactions_inflight: entity.gauge(WRITE_TRANSACTIONS_INFLIGHT, 0),
            alter_schema_transactions_inflight: entity.gauge(ALTER_SCHEMA_TRANSACTIONS_INFLIGHT, 0),
            transaction_memory_pressure_rejections: entity
                .counter(TRANSACTION_MEMORY_PRESSURE_REJECTIONS),
            transaction_memory_limit_rejections: entity
                .counter(TRANSACTION_MEMORY_LIMIT_REJECTIONS),
        }
    }
}

/// Interval gate for repetitive warnings.
struct LogThrottler {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl LogThrottler {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    fn should_log(&self) -> bool {
        let mut last = self.last.lock();
        match *last {
            Some(at) if at.elapsed() < self.interval => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }
}

/// Footprint cached at admission so release never re-measures a
/// request that may already be gone.
struct TrackedTransaction {
    driver: Arc<TransactionDriver>,
    memory_footprint: u64,
}

/// Admission controller and in-flight registry for one tablet.
pub struct TransactionTracker {
    pending: Mutex<HashMap<usize, TrackedTransaction>>,
    metrics: RwLock<Option<TrackerMetrics>>,
    mem_tracker: RwLock<Option<Arc<MemTracker>>>,
    rejection_throttler: LogThrottler,
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionTracker {
    /// Create a tracker with no instrumentation or memory budget;
    /// both are late-bound.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            metrics: RwLock::new(None),
            mem_tracker: RwLock::new(None),
            rejection_throttler: LogThrottler::new(Duration::from_secs(1)),
        }
    }

    /// Replace the metric set with instruments from `entity`.
    pub fn start_instrumentation(&self, entity: &MetricEntity) {
        *self.metrics.write() = Some(TrackerMetrics::new(entity));
    }

    /// Attach a memory budget as a child of `parent`.
    ///
    /// A `limit_mb` of -1 disables memory tracking entirely.
    pub fn start_memory_tracking(&self, parent: &Arc<MemTracker>, limit_mb: i64) {
        if limit_mb < 0 {
            return;
        }
        let limit = Some(limit_mb as u64 * 1024 * 1024);
        *self.mem_tracker.write() = Some(MemTracker::child(parent, "txn_tracker", limit));
    }

    /// Admit a transaction, charging its footprint to the memory
    /// budget and registering it as in-flight.
    pub fn add(&self, driver: &Arc<TransactionDriver>) -> SlateResult<()> {
        let footprint = driver.request_size();

        let mem_tracker = self.mem_tracker.read().clone();
        if let Some(ref tracker) = mem_tracker {
            if !tracker.try_consume(footprint) {
                if let Some(metrics) = &*self.metrics.read() {
                    metrics.transaction_memory_pressure_rejections.increment();
                    if !tracker.can_consume_no_ancestors(footprint) {
                        metrics.transaction_memory_limit_rejections.increment();
                    }
                }

                let msg = format!(
                    "transaction on tablet {} rejected due to memory pressure: the memory \
                     usage of this transaction ({}) plus the current consumption ({}) \
                     exceeds the transaction memory limit ({}) or the limit of an \
                     ancestral memory tracker",
                    driver.tablet_id().unwrap_or("(unknown)"),
                    footprint,
                    tracker.consumption(),
                    tracker
                        .limit()
                        .map_or_else(|| "none".to_string(), |l| l.to_string()),
                );
                if self.rejection_throttler.should_log() {
                    tracing::warn!("{msg}");
                }
                return Err(SlateError::service_unavailable(msg));
            }
        }

        self.increment_counters(driver.kind());

        let mut pending = self.pending.lock();
        let previous = pending.insert(
            driver_key(driver),
            TrackedTransaction {
                driver: Arc::clone(driver),
                memory_footprint: footprint,
            },
        );
        if previous.is_some() {
            panic!(
                "transaction driver already tracked: {}",
                driver.description()
            );
        }
        Ok(())
    }

    /// Release a transaction admitted by [`add`](Self::add).
    ///
    /// Releasing an untracked driver is a fatal accounting bug.
    pub fn release(&self, driver: &Arc<TransactionDriver>) {
        self.decrement_counters(driver.kind());

        let mut pending = self.pending.lock();
        let tracked = pending.remove(&driver_key(driver)).unwrap_or_else(|| {
            panic!(
                "could not remove pending transaction from map: {}",
                driver.description()
            )
        });
        drop(pending);

        if let Some(tracker) = &*self.mem_tracker.read() {
            tracker.release(tracked.memory_footprint);
        }
    }

    fn increment_counters(&self, kind: TransactionKind) {
        let metrics = self.metrics.read();
        let Some(metrics) = &*metrics else {
            return;
        };
        metrics.all_transactions_inflight.increment();
        match kind {
            TransactionKind::Write => metrics.write_transactions_inflight.increment(),
            TransactionKind::AlterSchema => metrics.alter_schema_transactions_inflight.increment(),
        }
    }

    fn decrement_counters(&self, kind: TransactionKind) {
        let metrics = self.metrics.read();
        let Some(metrics) = &*metrics else {
            return;
        };
        metrics.all_transactions_inflight.decrement();
        match kind {
            TransactionKind::Write => metrics.write_transactions_inflight.decrement(),
            TransactionKind::AlterSchema => metrics.alter_schema_transactions_inflight.decrement(),
        }
    }

    /// Snapshot the in-flight driver handles.
    pub fn pending_transactions(&self) -> Vec<Arc<TransactionDriver>> {
        self.pending
            .lock()
            .values()
            .map(|t| Arc::clone(&t.driver))
            .collect()
    }

    /// Number of in-flight transactions.
    pub fn num_pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Current memory consumption charged by this tracker, in bytes.
    pub fn memory_consumption(&self) -> u64 {
        self.mem_tracker
            .read()
            .as_ref()
            .map(|t| t.consumption())
            .unwrap_or(0)
    }

    /// Wait until every in-flight transaction is released, without a
    /// deadline.
    pub fn wait_for_all_to_finish_indefinitely(&self) {
        self.wait_for_all_to_finish(Duration::MAX)
            .expect("indefinite drain cannot time out");
    }

    /// Wait until every in-flight transaction is released, or `timeout`
    /// elapses.
    ///
    /// Polls with exponential backoff (250 µs growing by 5/4 per round,
    /// capped at 1 s) and logs outstanding transactions on a doubling
    /// cadence, dumping at most 50 descriptions per complaint.
    pub fn wait_for_all_to_finish(&self, timeout: Duration) -> SlateResult<()> {
        let mut wait_time_us: u64 = 250;
        let mut num_complaints: u32 = 0;
        let start = Instant::now();
        let mut next_log_time = start + Duration::from_secs(1);

        loop {
            let txns = self.pending_transactions();
            if txns.is_empty() {
                return Ok(());
            }

            let now = Instant::now();
            let elapsed = now - start;
            if elapsed > timeout {
                return Err(SlateError::timed_out(format!(
                    "timed out waiting for all transactions to finish: {} transactions \
                     pending, waited for {:?}",
                    txns.len(),
                    elapsed
                )));
            }

            if now > next_log_time {
                tracing::warn!(
                    pending = txns.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "waiting for outstanding transactions to complete"
                );
                for txn in txns.iter().take(MAX_TXNS_TO_PRINT) {
                    tracing::info!(transaction = %txn.description(), "still running");
                }
                num_complaints += 1;
                // Exponential back-off on how often the transactions
                // are dumped.
                next_log_time = now + Duration::from_secs(1 << num_complaints.min(8));
            }

            wait_time_us = (wait_time_us * 5 / 4).min(1_000_000);
            std::thread::sleep(Duration::from_micros(wait_time_us));
        }
    }
}

impl Drop for TransactionTracker {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let pending = self.pending.lock();
        assert!(
            pending.is_empty(),
            "transaction tracker dropped with {} transactions still pending",
            pending.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrumented_tracker() -> (Arc<MetricEntity>, TransactionTracker) {
        let entity = MetricEntity::new("tablet test");
        let tracker = TransactionTracker::new();
        tracker.start_instrumentation(&entity);
        (entity, tracker)
    }

    #[test]
    fn test_add_release_updates_gauges_by_kind() {
        let (entity, tracker) = instrumented_tracker();

        let write = TransactionDriver::new(TransactionKind::Write, 10);
        let alter = TransactionDriver::new(TransactionKind::AlterSchema, 10);
        tracker.add(&write).unwrap();
        tracker.add(&alter).unwrap();

        assert_eq!(entity.gauge_value(ALL_TRANSACTIONS_INFLIGHT), 2);
        assert_eq!(entity.gauge_value(WRITE_TRANSACTIONS_INFLIGHT), 1);
        assert_eq!(entity.gauge_value(ALTER_SCHEMA_TRANSACTIONS_INFLIGHT), 1);

        tracker.release(&write);
        tracker.release(&alter);
        assert_eq!(entity.gauge_value(ALL_TRANSACTIONS_INFLIGHT), 0);
        assert_eq!(tracker.num_pending(), 0);
    }

    #[test]
    fn test_pending_snapshot_holds_references() {
        let (_entity, tracker) = instrumented_tracker();
        let driver = TransactionDriver::for_tablet(TransactionKind::Write, 10, "t1");
        tracker.add(&driver).unwrap();

        let pending = tracker.pending_transactions();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].tablet_id(), Some("t1"));

        tracker.release(&driver);
    }

    #[test]
    #[should_panic(expected = "already tracked")]
    fn test_duplicate_add_is_fatal() {
        let (_entity, tracker) = instrumented_tracker();
        let driver = TransactionDriver::new(TransactionKind::Write, 10);
        tracker.add(&driver).unwrap();
        let _ = tracker.add(&driver);
    }

    #[test]
    #[should_panic(expected = "could not remove pending transaction")]
    fn test_release_of_untracked_is_fatal() {
        let tracker = TransactionTracker::new();
        let driver = TransactionDriver::new(TransactionKind::Write, 10);
        tracker.release(&driver);
    }
}
