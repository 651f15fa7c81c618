//! Control-plane report messages.
//!
//! The manager describes its tablets to the control plane through
//! [`TabletReport`]s: either incremental deltas driven by the dirty
//! map, or full snapshots. Reports carry a sequence number; the control
//! plane acknowledges a sequence to let the manager garbage-collect
//! dirty entries covered by that report.

use crate::storage::metadata::Role;
use crate::tablet::peer::TabletState;
use serde::{Deserialize, Serialize};

/// Dirty-map entry: the sequence of the report that will carry this
/// tablet next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletReportState {
    /// Sequence number of the report in which this tablet most
    /// recently became dirty.
    pub change_seq: u32,
}

/// One tablet's entry within a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedTablet {
    /// Tablet identifier.
    pub tablet_id: String,
    /// Peer lifecycle state.
    pub state: TabletState,
    /// Failure description; present only for failed tablets.
    pub error: Option<String>,
    /// This server's role in the tablet's quorum.
    pub role: Role,
    /// Schema version; present only once the tablet is materialized.
    pub schema_version: Option<u32>,
}

/// A report to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabletReport {
    /// Monotonically increasing per-server report sequence.
    pub sequence_number: u32,
    /// Whether this report covers only dirty tablets.
    pub is_incremental: bool,
    /// Tablets with updated state.
    pub updated_tablets: Vec<ReportedTablet>,
    /// Tablets that no longer exist on this server.
    pub removed_tablet_ids: Vec<String>,
}

impl TabletReport {
    /// Look up an updated tablet by id.
    pub fn updated(&self, tablet_id: &str) -> Option<&ReportedTablet> {
        self.updated_tablets
            .iter()
            .find(|t| t.tablet_id == tablet_id)
    }
}
