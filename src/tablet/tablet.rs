//! In-memory tablet state.
//!
//! A [`Tablet`] holds the materialized rows of one key-range shard.
//! All durable effects flow through the operation log: the only way
//! rows change is [`Tablet::apply`], called during bootstrap replay and
//! by the downstream apply path.

use crate::storage::log::{LogEntry, LogOp};
use crate::storage::metadata::TabletMetadata;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Materialized state of one tablet.
pub struct Tablet {
    metadata: Arc<TabletMetadata>,
    rows: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl Tablet {
    /// Create an empty tablet over its metadata.
    pub fn new(metadata: Arc<TabletMetadata>) -> Self {
        Self {
            metadata,
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    /// Tablet identifier.
    pub fn tablet_id(&self) -> &str {
        self.metadata.tablet_id()
    }

    /// The tablet's metadata handle.
    pub fn metadata(&self) -> &Arc<TabletMetadata> {
        &self.metadata
    }

    /// Current schema version.
    pub fn schema_version(&self) -> u32 {
        self.metadata.schema_version()
    }

    /// Apply one log entry to the in-memory state.
    pub fn apply(&self, entry: &LogEntry) {
        match &entry.op {
            LogOp::InsertRow { row_key, payload } | LogOp::MutateRow { row_key, payload } => {
                self.rows.write().insert(row_key.clone(), payload.clone());
            }
            LogOp::DeleteRow { row_key } => {
                self.rows.write().remove(row_key);
            }
            LogOp::AlterSchema { schema_version } => {
                self.metadata.set_schema_version(*schema_version);
            }
            LogOp::Noop => {}
        }
    }

    /// Number of materialized rows.
    pub fn num_rows(&self) -> usize {
        self.rows.read().len()
    }

    /// Read a row by key.
    pub fn get_row(&self, row_key: &str) -> Option<Vec<u8>> {
        self.rows.read().get(row_key).cloned()
    }
}
