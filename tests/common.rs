//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

use slate::core::memory::MemTracker;
use slate::manager::{TabletManager, TabletManagerOptions};
use slate::ops::metrics::MetricEntity;
use slate::storage::fs::FsManager;
use slate::storage::metadata::{Quorum, Schema, TabletMasterBlock, TabletMetadata};
use slate::tablet::peer::TabletPeer;
use slate::txn::tracker::TransactionTracker;
use std::sync::Arc;
use tempfile::TempDir;

/// Open a fresh filesystem manager over a scratch directory.
pub fn new_fs() -> (TempDir, Arc<FsManager>) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let fs = Arc::new(FsManager::open(dir.path()).expect("failed to open data dir"));
    (dir, fs)
}

/// Manager options sized for tests.
pub fn test_options() -> TabletManagerOptions {
    TabletManagerOptions {
        num_tablets_to_open_simultaneously: 4,
        ..TabletManagerOptions::default()
    }
}

/// Build and init a manager over an empty data directory.
pub fn running_manager() -> (TempDir, Arc<FsManager>, TabletManager) {
    let (dir, fs) = new_fs();
    let manager = TabletManager::new(Arc::clone(&fs), test_options());
    manager.init().expect("manager init failed");
    (dir, fs, manager)
}

/// Create a tablet with a local quorum and the key/value schema.
pub fn create_tablet(manager: &TabletManager, tablet_id: &str) -> Arc<TabletPeer> {
    manager
        .create_new_tablet(
            "table-1",
            tablet_id,
            "",
            "",
            "users",
            Schema::key_value(),
            Quorum::local_quorum(manager.server_uuid()),
        )
        .expect("create_new_tablet failed")
}

/// Persist metadata for a tablet directly, as if written by an earlier
/// server instance, without registering it with any manager.
pub fn seed_tablet_on_disk(fs: &Arc<FsManager>, tablet_id: &str) {
    let master_block = TabletMasterBlock {
        table_id: "table-1".to_string(),
        tablet_id: tablet_id.to_string(),
        block_a: fs.generate_block_id(),
        block_b: fs.generate_block_id(),
    };
    TabletMetadata::create_new(
        fs,
        master_block.clone(),
        "users",
        Schema::key_value(),
        Quorum::local_quorum(fs.uuid()),
        "",
        "",
    )
    .expect("failed to create tablet metadata");
    master_block
        .persist(fs)
        .expect("failed to persist master block");
}

/// Build an instrumented tracker with a memory budget under `root`.
pub fn tracker_with_budget(
    root: &Arc<MemTracker>,
    limit_mb: i64,
) -> (Arc<MetricEntity>, TransactionTracker) {
    let entity = MetricEntity::new("tablet under test");
    let tracker = TransactionTracker::new();
    tracker.start_instrumentation(&entity);
    tracker.start_memory_tracking(root, limit_mb);
    (entity, tracker)
}
