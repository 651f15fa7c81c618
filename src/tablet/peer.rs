//! Tablet peer lifecycle.
//!
//! A [`TabletPeer`] is the per-tablet runtime object tying together the
//! in-memory tablet, its operation log, its transaction tracker, and
//! its replication role. Peers move through a one-way lifecycle:
//!
//! ```text
//! Initializing -> Running -> Quiescing -> Shutdown
//!       \------------\---------> Failed
//! ```
//!
//! The manager holds the authoritative reference; snapshots taken for
//! reporting and shutdown hold additional references, so a peer can
//! outlive its map entry.

use crate::core::error::{SlateError, SlateResult};
use crate::core::memory::MemTracker;
use crate::ops::metrics::MetricEntity;
use crate::storage::log::TabletLog;
use crate::storage::metadata::{Role, TabletMetadata};
use crate::tablet::bootstrap::BootstrapInfo;
use crate::tablet::tablet::Tablet;
use crate::txn::tracker::TransactionTracker;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle state of a tablet peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TabletState {
    /// Registered; bootstrap not yet complete.
    Initializing,
    /// Serving.
    Running,
    /// Draining in-flight work on the way down.
    Quiescing,
    /// Torn down.
    Shutdown,
    /// Bootstrap or start failed; error retained.
    Failed,
}

impl std::fmt::Display for TabletState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Quiescing => "quiescing",
            Self::Shutdown => "shutdown",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Callback used by a peer to flag itself for the next tablet report.
///
/// Holds a non-owning handle back to the manager; once the manager is
/// gone the callback is a no-op.
pub type DirtyListener = Box<dyn Fn(&str) + Send + Sync>;

struct PeerLifecycle {
    state: TabletState,
    error: Option<SlateError>,
}

/// Per-tablet runtime object.
pub struct TabletPeer {
    meta: Arc<TabletMetadata>,
    local_uuid: String,
    lifecycle: Mutex<PeerLifecycle>,
    tablet: RwLock<Option<Arc<Tablet>>>,
    log: RwLock<Option<Arc<TabletLog>>>,
    metric_entity: RwLock<Option<Arc<MetricEntity>>>,
    txn_tracker: TransactionTracker,
    dirty_listener: DirtyListener,
}

impl TabletPeer {
    /// Create a peer in the Initializing state.
    pub fn new(
        meta: Arc<TabletMetadata>,
        local_uuid: impl Into<String>,
        dirty_listener: DirtyListener,
    ) -> Arc<Self> {
        Arc::new(Self {
            meta,
            local_uuid: local_uuid.into(),
            lifecycle: Mutex::new(PeerLifecycle {
                state: TabletState::Initializing,
                error: None,
            }),
            tablet: RwLock::new(None),
            log: RwLock::new(None),
            metric_entity: RwLock::new(None),
            txn_tracker: TransactionTracker::new(),
            dirty_listener,
        })
    }

    /// Tablet identifier.
    pub fn tablet_id(&self) -> &str {
        self.meta.tablet_id()
    }

    /// The peer's metadata handle.
    pub fn meta(&self) -> &Arc<TabletMetadata> {
        &self.meta
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TabletState {
        self.lifecycle.lock().state
    }

    /// The error that moved this peer to Failed, if any.
    pub fn error(&self) -> Option<SlateError> {
        self.lifecycle.lock().error.clone()
    }

    /// This server's role within the tablet's quorum.
    pub fn role(&self) -> Role {
        self.meta.quorum().role_of(&self.local_uuid)
    }

    /// One-line human-readable summary for logs.
    pub fn status_string(&self) -> String {
        let (state, error) = {
            let lifecycle = self.lifecycle.lock();
            (lifecycle.state, lifecycle.error.clone())
        };
        let mut status = format!(
            "tablet {} (table {}): state {}, role {:?}",
            self.tablet_id(),
            self.meta.table_name(),
            state,
            self.role()
        );
        if let Some(error) = error {
            status.push_str(&format!(": {error}"));
        }
        status
    }

    /// The materialized tablet, once initialized.
    pub fn tablet(&self) -> Option<Arc<Tablet>> {
        self.tablet.read().clone()
    }

    /// The tablet's log, once initialized.
    pub fn log(&self) -> Option<Arc<TabletLog>> {
        self.log.read().clone()
    }

    /// The per-tablet metric entity, once initialized.
    pub fn metric_entity(&self) -> Option<Arc<MetricEntity>> {
        self.metric_entity.read().clone()
    }

    /// The peer's transaction tracker.
    pub fn txn_tracker(&self) -> &TransactionTracker {
        &self.txn_tracker
    }

    /// Wire up the bootstrapped tablet and log, and late-bind the
    /// transaction tracker's instrumentation and memory budget.
    pub fn init(
        &self,
        tablet: Arc<Tablet>,
        log: Arc<TabletLog>,
        metric_entity: Arc<MetricEntity>,
        mem_parent: &Arc<MemTracker>,
        txn_memory_limit_mb: i64,
    ) -> SlateResult<()> {
        {
            let lifecycle = self.lifecycle.lock();
            if lifecycle.state != TabletState::Initializing {
                return Err(SlateError::illegal_state(format!(
                    "cannot init tablet peer {} in state {}",
                    self.tablet_id(),
                    lifecycle.state
                )));
            }
        }

        self.txn_tracker.start_instrumentation(&metric_entity);
        self.txn_tracker
            .start_memory_tracking(mem_parent, txn_memory_limit_mb);

        *self.tablet.write() = Some(tablet);
        *self.log.write() = Some(log);
        *self.metric_entity.write() = Some(metric_entity);
        Ok(())
    }

    /// Start serving: Initializing -> Running.
    pub fn start(&self, bootstrap_info: &BootstrapInfo) -> SlateResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != TabletState::Initializing {
            return Err(SlateError::illegal_state(format!(
                "cannot start tablet peer {} in state {}",
                self.tablet_id(),
                lifecycle.state
            )));
        }
        lifecycle.state = TabletState::Running;
        drop(lifecycle);

        tracing::info!(
            tablet_id = self.tablet_id(),
            entries_replayed = bootstrap_info.entries_replayed,
            last_replayed = ?bootstrap_info.last_replayed,
            "tablet peer running"
        );
        Ok(())
    }

    /// Mark the peer failed, retaining the error for reporting.
    pub fn set_failed(&self, error: SlateError) {
        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.state = TabletState::Failed;
            lifecycle.error = Some(error);
        }
        (self.dirty_listener)(self.tablet_id());
    }

    /// Tear the peer down, returning the state it was in beforehand.
    ///
    /// Idempotent: a peer already quiescing or shut down is left alone.
    /// Otherwise the peer quiesces, drains its in-flight transactions,
    /// and lands in Shutdown.
    pub fn shutdown(&self) -> TabletState {
        let prior = {
            let mut lifecycle = self.lifecycle.lock();
            let prior = lifecycle.state;
            match prior {
                TabletState::Quiescing | TabletState::Shutdown => return prior,
                _ => lifecycle.state = TabletState::Quiescing,
            }
            prior
        };

        // Drain with no lifecycle lock held; releases come in on other
        // threads and must observe the tracker, not the peer lock.
        self.txn_tracker.wait_for_all_to_finish_indefinitely();

        self.lifecycle.lock().state = TabletState::Shutdown;
        tracing::info!(tablet_id = self.tablet_id(), "tablet peer shut down");
        prior
    }
}

impl std::fmt::Debug for TabletPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabletPeer")
            .field("tablet_id", &self.tablet_id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
