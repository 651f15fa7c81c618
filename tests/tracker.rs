//! Transaction tracker admission and drain tests.

mod common;

use slate::core::error::SlateError;
use slate::core::memory::MemTracker;
use slate::txn::driver::{TransactionDriver, TransactionKind};
use slate::txn::tracker::{
    TransactionTracker, ALL_TRANSACTIONS_INFLIGHT, TRANSACTION_MEMORY_LIMIT_REJECTIONS,
    TRANSACTION_MEMORY_PRESSURE_REJECTIONS, WRITE_TRANSACTIONS_INFLIGHT,
};
use std::sync::Arc;
use std::time::Duration;

const KIB: u64 = 1024;

// ============================================================================
// Memory admission
// ============================================================================

#[test]
fn admission_against_one_mib_budget() {
    let root = MemTracker::root("server", None);
    let (entity, tracker) = common::tracker_with_budget(&root, 1);

    let t1 = TransactionDriver::for_tablet(TransactionKind::Write, 400 * KIB, "t1");
    let t2 = TransactionDriver::for_tablet(TransactionKind::Write, 400 * KIB, "t1");
    let t3 = TransactionDriver::for_tablet(TransactionKind::Write, 400 * KIB, "t1");

    tracker.add(&t1).unwrap();
    tracker.add(&t2).unwrap();

    let result = tracker.add(&t3);
    assert!(matches!(result, Err(SlateError::ServiceUnavailable { .. })));
    assert_eq!(
        entity.counter_value(TRANSACTION_MEMORY_PRESSURE_REJECTIONS),
        1
    );
    assert_eq!(entity.counter_value(TRANSACTION_MEMORY_LIMIT_REJECTIONS), 1);

    // The failed reservation must leave consumption untouched.
    assert_eq!(tracker.memory_consumption(), 800 * KIB);

    // Releasing one admits the retry.
    tracker.release(&t1);
    tracker.add(&t3).unwrap();

    tracker.release(&t2);
    tracker.release(&t3);
    assert_eq!(tracker.memory_consumption(), 0);
    assert_eq!(root.consumption(), 0);
}

#[test]
fn ancestor_limit_rejection_skips_limit_counter() {
    // The tablet's own budget is generous; the server-wide root is the
    // binding constraint.
    let root = MemTracker::root("server", Some(1024 * KIB));
    let (entity, tracker) = common::tracker_with_budget(&root, 1024);

    let t1 = TransactionDriver::for_tablet(TransactionKind::Write, 400 * KIB, "t1");
    let t2 = TransactionDriver::for_tablet(TransactionKind::Write, 400 * KIB, "t1");
    let t3 = TransactionDriver::for_tablet(TransactionKind::Write, 400 * KIB, "t1");

    tracker.add(&t1).unwrap();
    tracker.add(&t2).unwrap();
    assert!(tracker.add(&t3).is_err());

    assert_eq!(
        entity.counter_value(TRANSACTION_MEMORY_PRESSURE_REJECTIONS),
        1
    );
    assert_eq!(entity.counter_value(TRANSACTION_MEMORY_LIMIT_REJECTIONS), 0);

    tracker.release(&t1);
    tracker.release(&t2);
}

#[test]
fn matched_add_release_restores_all_accounting() {
    let root = MemTracker::root("server", None);
    let (entity, tracker) = common::tracker_with_budget(&root, 64);

    let driver = TransactionDriver::for_tablet(TransactionKind::Write, 128 * KIB, "t1");
    tracker.add(&driver).unwrap();
    assert_eq!(tracker.num_pending(), 1);
    assert_eq!(tracker.memory_consumption(), 128 * KIB);
    assert_eq!(entity.gauge_value(ALL_TRANSACTIONS_INFLIGHT), 1);
    assert_eq!(entity.gauge_value(WRITE_TRANSACTIONS_INFLIGHT), 1);

    tracker.release(&driver);
    assert_eq!(tracker.num_pending(), 0);
    assert_eq!(tracker.memory_consumption(), 0);
    assert_eq!(root.consumption(), 0);
    assert_eq!(entity.gauge_value(ALL_TRANSACTIONS_INFLIGHT), 0);
    assert_eq!(entity.gauge_value(WRITE_TRANSACTIONS_INFLIGHT), 0);
}

#[test]
fn disabled_memory_tracking_admits_anything() {
    let root = MemTracker::root("server", Some(1));
    let (entity, tracker) = common::tracker_with_budget(&root, -1);

    let huge = TransactionDriver::for_tablet(TransactionKind::Write, 10 * 1024 * 1024 * KIB, "t1");
    tracker.add(&huge).unwrap();
    assert_eq!(
        entity.counter_value(TRANSACTION_MEMORY_PRESSURE_REJECTIONS),
        0
    );
    assert_eq!(tracker.memory_consumption(), 0);
    assert_eq!(root.consumption(), 0);

    tracker.release(&huge);
}

// ============================================================================
// Drain
// ============================================================================

#[test]
fn drain_times_out_with_pending_transaction() {
    let root = MemTracker::root("server", None);
    let (_entity, tracker) = common::tracker_with_budget(&root, 64);

    let driver = TransactionDriver::for_tablet(TransactionKind::Write, KIB, "t1");
    tracker.add(&driver).unwrap();

    let result = tracker.wait_for_all_to_finish(Duration::from_millis(100));
    match result {
        Err(SlateError::TimedOut { message }) => {
            assert!(message.contains("1 transactions pending"), "got: {message}");
        }
        other => panic!("expected TimedOut, got {other:?}"),
    }

    tracker.release(&driver);
}

#[test]
fn drain_completes_when_transactions_release() {
    let root = MemTracker::root("server", None);
    let (_entity, tracker) = common::tracker_with_budget(&root, 64);
    let tracker = Arc::new(tracker);

    let driver = TransactionDriver::for_tablet(TransactionKind::Write, KIB, "t1");
    tracker.add(&driver).unwrap();

    let releaser = {
        let tracker = Arc::clone(&tracker);
        let driver = Arc::clone(&driver);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            tracker.release(&driver);
        })
    };

    tracker
        .wait_for_all_to_finish(Duration::from_secs(10))
        .unwrap();
    assert_eq!(tracker.num_pending(), 0);
    releaser.join().unwrap();
}

#[test]
fn drain_on_empty_tracker_is_immediate() {
    let tracker = TransactionTracker::new();
    tracker
        .wait_for_all_to_finish(Duration::from_millis(1))
        .unwrap();
}

// ============================================================================
// Pending snapshots
// ============================================================================

#[test]
fn pending_snapshot_reflects_inflight_set() {
    let root = MemTracker::root("server", None);
    let (_entity, tracker) = common::tracker_with_budget(&root, 64);

    let a = TransactionDriver::for_tablet(TransactionKind::Write, KIB, "t1");
    let b = TransactionDriver::for_tablet(TransactionKind::AlterSchema, KIB, "t1");
    tracker.add(&a).unwrap();
    tracker.add(&b).unwrap();

    let pending = tracker.pending_transactions();
    assert_eq!(pending.len(), 2);

    tracker.release(&a);
    assert_eq!(tracker.pending_transactions().len(), 1);
    tracker.release(&b);
}
