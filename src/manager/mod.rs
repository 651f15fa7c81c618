//! Tablet manager.
//!
//! The [`TabletManager`] is the process-wide registry of tablets: it
//! discovers tablets on disk at startup, bootstraps them on a worker
//! pool, serves creation and deletion, and generates reports for the
//! control plane.
//!
//! One reader-writer lock guards the registry (tablet map, the
//! creates-in-progress set, the dirty map, and the manager state).
//! Methods that call into a peer never hold that lock: peer shutdown
//! takes peer-internal locks, and holding both invites inversion.

pub mod report;

use crate::core::config::Config;
use crate::core::error::{SlateError, SlateResult};
use crate::core::memory::MemTracker;
use crate::core::pool::WorkerPool;
use crate::manager::report::{ReportedTablet, TabletReport, TabletReportState};
use crate::ops::metrics::MetricEntity;
use crate::storage::fs::FsManager;
use crate::storage::metadata::{Quorum, Role, Schema, TabletMasterBlock, TabletMetadata};
use crate::tablet::bootstrap::bootstrap_tablet;
use crate::tablet::peer::{DirtyListener, TabletPeer, TabletState};
use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Manager lifecycle state. Transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Constructed; init not yet complete.
    Initializing,
    /// Serving.
    Running,
    /// Shutdown in progress.
    Quiescing,
    /// Torn down.
    Shutdown,
}

/// Tuning knobs for the manager, sourced from [`Config`].
#[derive(Debug, Clone)]
pub struct TabletManagerOptions {
    /// Number of threads available to open tablets.
    pub num_tablets_to_open_simultaneously: usize,
    /// Warn when a tablet takes longer than this to start, in millis.
    pub start_warn_threshold_ms: u64,
    /// Per-tablet transaction memory budget in MB; -1 disables.
    pub transaction_memory_limit_mb: i64,
}

impl Default for TabletManagerOptions {
    fn default() -> Self {
        Self {
            num_tablets_to_open_simultaneously: 50,
            start_warn_threshold_ms: 500,
            transaction_memory_limit_mb: 64,
        }
    }
}

impl TabletManagerOptions {
    /// Extract manager options from the server configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            num_tablets_to_open_simultaneously: config.tablets.num_tablets_to_open_simultaneously,
            start_warn_threshold_ms: config.tablets.start_warn_threshold_ms,
            transaction_memory_limit_mb: config.tablets.transaction_memory_limit_mb,
        }
    }
}

/// State guarded by the manager lock.
struct Registry {
    state: ManagerState,
    tablets: HashMap<String, Arc<TabletPeer>>,
    creates_in_progress: HashSet<String>,
    dirty_tablets: HashMap<String, TabletReportState>,
}

struct ManagerInner {
    fs: Arc<FsManager>,
    opts: TabletManagerOptions,
    /// Server-wide parent for every tablet's transaction memory budget.
    mem_root: Arc<MemTracker>,
    registry: RwLock<Registry>,
    next_report_seq: AtomicU32,
}

/// Process-wide registry and lifecycle orchestrator for tablets.
///
/// The pools live here rather than in the shared inner state: bootstrap
/// jobs hold a reference to the inner, and a pool must never be torn
/// down from one of its own worker threads.
pub struct TabletManager {
    inner: Arc<ManagerInner>,
    open_tablet_pool: WorkerPool,
    leader_apply_pool: WorkerPool,
    replica_apply_pool: WorkerPool,
}

impl TabletManager {
    /// Create a manager over an opened data directory.
    pub fn new(fs: Arc<FsManager>, opts: TabletManagerOptions) -> Self {
        let apply_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let open_tablet_pool =
            WorkerPool::new("tablet-bootstrap", opts.num_tablets_to_open_simultaneously);
        let inner = Arc::new(ManagerInner {
            fs,
            opts,
            mem_root: MemTracker::root("tablet-server", None),
            registry: RwLock::new(Registry {
                state: ManagerState::Initializing,
                tablets: HashMap::new(),
                creates_in_progress: HashSet::new(),
                dirty_tablets: HashMap::new(),
            }),
            next_report_seq: AtomicU32::new(0),
        });
        Self {
            inner,
            open_tablet_pool,
            leader_apply_pool: WorkerPool::new("leader-apply", apply_threads),
            replica_apply_pool: WorkerPool::new("replica-apply", apply_threads),
        }
    }

    /// Current manager state.
    pub fn state(&self) -> ManagerState {
        self.inner.registry.read().state
    }

    /// This server's permanent UUID.
    pub fn server_uuid(&self) -> &str {
        self.inner.fs.uuid()
    }

    /// The root of the server's memory accounting tree.
    pub fn mem_root(&self) -> &Arc<MemTracker> {
        &self.inner.mem_root
    }

    /// Discover tablets on disk, register them, and queue their
    /// bootstraps.
    ///
    /// Per-tablet metadata load failures abort init with a wrapped
    /// error; tablets registered before the failure stay registered.
    pub fn init(&self) -> Result<()> {
        assert_eq!(
            self.state(),
            ManagerState::Initializing,
            "tablet manager init must run exactly once"
        );

        let tablet_ids = self
            .inner
            .fs
            .list_master_blocks()
            .context("couldn't list master blocks")?;

        for tablet_id in tablet_ids {
            let meta = self
                .inner
                .open_tablet_meta(&tablet_id)
                .with_context(|| format!("failed to open tablet metadata for tablet {tablet_id}"))?;
            let peer = self.inner.new_peer(&meta);
            self.inner.register_tablet(peer);

            let inner = Arc::clone(&self.inner);
            self.open_tablet_pool
                .submit(move || inner.open_tablet(&meta))?;
        }

        let mut registry = self.inner.registry.write();
        // A shutdown may have raced init; state transitions are one-way.
        if registry.state == ManagerState::Initializing {
            registry.state = ManagerState::Running;
        }
        let num_tablets = registry.tablets.len();
        drop(registry);

        tracing::info!(num_tablets, "tablet manager running");
        Ok(())
    }

    /// Block until every queued bootstrap completes, then surface the
    /// first bootstrap failure, if any.
    pub fn wait_for_all_bootstraps_to_finish(&self) -> SlateResult<()> {
        assert_eq!(
            self.state(),
            ManagerState::Running,
            "bootstrap wait requires a running manager"
        );

        self.open_tablet_pool.wait();

        let registry = self.inner.registry.read();
        for peer in registry.tablets.values() {
            if peer.state() == TabletState::Failed {
                if let Some(error) = peer.error() {
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Create a brand-new tablet: persist its metadata, register a
    /// peer, and queue an open.
    ///
    /// The caller-supplied quorum sequence number is ignored; consensus
    /// assigns the real one later.
    #[allow(clippy::too_many_arguments)]
    pub fn create_new_tablet(
        &self,
        table_id: &str,
        tablet_id: &str,
        start_key: &str,
        end_key: &str,
        table_name: &str,
        schema: Schema,
        mut quorum: Quorum,
    ) -> SlateResult<Arc<TabletPeer>> {
        if quorum.local {
            let valid = quorum.peers.len() == 1
                && quorum.peers[0].uuid == self.inner.fs.uuid()
                && quorum.peers[0].role == Role::Leader;
            if !valid {
                return Err(SlateError::invalid_argument(format!(
                    "local quorum for tablet {tablet_id} must name exactly this server \
                     ({}) in the leader role",
                    self.inner.fs.uuid()
                )));
            }
        }
        quorum.seqno = -1;

        {
            let mut registry = self.inner.registry.write();
            if registry.state != ManagerState::Running {
                return Err(SlateError::illegal_state(format!(
                    "tablet manager is not running (state: {:?})",
                    registry.state
                )));
            }
            if registry.tablets.contains_key(tablet_id) {
                return Err(SlateError::already_present(format!(
                    "tablet already registered: {tablet_id}"
                )));
            }
            if !registry.creates_in_progress.insert(tablet_id.to_string()) {
                return Err(SlateError::already_present(format!(
                    "creation of tablet already in progress: {tablet_id}"
                )));
            }
        }

        // Removes the in-progress entry on every exit path below,
        // including panics out of metadata persistence.
        let _guard = CreateInProgressGuard {
            inner: self.inner.as_ref(),
            tablet_id,
        };

        let master_block = TabletMasterBlock {
            table_id: table_id.to_string(),
            tablet_id: tablet_id.to_string(),
            block_a: self.inner.fs.generate_block_id(),
            block_b: self.inner.fs.generate_block_id(),
        };

        let meta = TabletMetadata::create_new(
            &self.inner.fs,
            master_block.clone(),
            table_name,
            schema,
            quorum,
            start_key,
            end_key,
        )
        .context("couldn't create tablet metadata")?;

        master_block
            .persist(&self.inner.fs)
            .context("couldn't persist master block for new tablet")?;

        let peer = self.inner.new_peer(&meta);
        self.inner.register_tablet(Arc::clone(&peer));

        let inner = Arc::clone(&self.inner);
        self.open_tablet_pool
            .submit(move || inner.open_tablet(&meta))?;

        Ok(peer)
    }

    /// Shut a peer down and drop it from the registry.
    ///
    /// Fails with a retryable error if the peer was already on its way
    /// down. On-disk data is left in place (no reclaimer yet).
    pub fn delete_tablet(&self, peer: &Arc<TabletPeer>) -> SlateResult<()> {
        let tablet_id = peer.tablet_id().to_string();
        tracing::info!(status = %peer.status_string(), "deleting tablet");

        let prior = peer.shutdown();
        if matches!(prior, TabletState::Quiescing | TabletState::Shutdown) {
            return Err(SlateError::service_unavailable(format!(
                "tablet peer not in a deletable state: {prior}"
            )));
        }

        {
            let mut registry = self.inner.registry.write();
            let removed = registry.tablets.remove(&tablet_id);
            assert!(
                removed.is_some(),
                "deleted tablet {tablet_id} missing from tablet map"
            );
        }

        tracing::info!(tablet_id = %tablet_id, "tablet deleted; on-disk data is not reclaimed");
        Ok(())
    }

    /// Look up a peer by tablet id.
    pub fn lookup_tablet(&self, tablet_id: &str) -> Option<Arc<TabletPeer>> {
        self.inner.lookup_tablet(tablet_id)
    }

    /// Look up a peer by tablet id, erroring on a miss.
    pub fn get_tablet_peer(&self, tablet_id: &str) -> SlateResult<Arc<TabletPeer>> {
        self.inner
            .lookup_tablet(tablet_id)
            .ok_or_else(|| SlateError::not_found(format!("tablet {tablet_id}")))
    }

    /// Snapshot every registered peer.
    pub fn get_tablet_peers(&self) -> Vec<Arc<TabletPeer>> {
        self.inner.get_tablet_peers()
    }

    /// Number of registered tablets.
    pub fn num_tablets(&self) -> usize {
        self.inner.registry.read().tablets.len()
    }

    /// Number of tablets awaiting a report.
    pub fn num_dirty_tablets(&self) -> usize {
        self.inner.registry.read().dirty_tablets.len()
    }

    /// Flag a tablet for inclusion in the next report.
    pub fn mark_tablet_dirty(&self, tablet_id: &str) {
        self.inner.mark_tablet_dirty(tablet_id);
    }

    /// Build a report covering only dirty tablets.
    ///
    /// The dirty map is left intact; acknowledgement clears it.
    pub fn generate_incremental_tablet_report(&self) -> TabletReport {
        let registry = self.inner.registry.read();
        let mut report = TabletReport {
            sequence_number: self.inner.next_report_seq.fetch_add(1, Ordering::SeqCst),
            is_incremental: true,
            updated_tablets: Vec::new(),
            removed_tablet_ids: Vec::new(),
        };
        for tablet_id in registry.dirty_tablets.keys() {
            match registry.tablets.get(tablet_id) {
                Some(peer) => report.updated_tablets.push(reported_tablet(peer)),
                None => report.removed_tablet_ids.push(tablet_id.clone()),
            }
        }
        drop(registry);

        report.updated_tablets.sort_by(|a, b| a.tablet_id.cmp(&b.tablet_id));
        report.removed_tablet_ids.sort();
        report
    }

    /// Build a report covering every tablet, and reset the dirty map.
    pub fn generate_full_tablet_report(&self) -> TabletReport {
        let mut registry = self.inner.registry.write();
        let mut report = TabletReport {
            sequence_number: self.inner.next_report_seq.fetch_add(1, Ordering::SeqCst),
            is_incremental: false,
            updated_tablets: Vec::new(),
            removed_tablet_ids: Vec::new(),
        };
        for peer in registry.tablets.values() {
            report.updated_tablets.push(reported_tablet(peer));
        }
        registry.dirty_tablets.clear();
        drop(registry);

        report.updated_tablets.sort_by(|a, b| a.tablet_id.cmp(&b.tablet_id));
        report
    }

    /// Process a control-plane acknowledgement of report `acked_seq`.
    ///
    /// Dirty entries whose change sequence is covered by the report are
    /// dropped; entries that became dirty later stay for the next one.
    pub fn mark_tablet_report_acknowledged(&self, acked_seq: u32) {
        let mut registry = self.inner.registry.write();
        let next_seq = self.inner.next_report_seq.load(Ordering::SeqCst);
        assert!(
            acked_seq < next_seq,
            "acknowledged report {acked_seq} was never generated (next is {next_seq})"
        );
        registry
            .dirty_tablets
            .retain(|_, state| state.change_seq > acked_seq);
    }

    /// One-shot teardown of the manager and every peer it owns.
    ///
    /// Subsequent calls (and calls racing the first) observe no
    /// further effects.
    pub fn shutdown(&self) {
        {
            let mut registry = self.inner.registry.write();
            match registry.state {
                ManagerState::Quiescing => {
                    tracing::debug!("tablet manager shutdown already in progress");
                    return;
                }
                ManagerState::Shutdown => {
                    tracing::debug!("tablet manager already shut down");
                    return;
                }
                ManagerState::Initializing | ManagerState::Running => {
                    tracing::info!("shutting down tablet manager");
                    registry.state = ManagerState::Quiescing;
                }
            }
        }

        // Drain the bootstrap pool first: no tablet is registered or
        // opened past this point.
        self.open_tablet_pool.shutdown();

        // Snapshot the peers and shut them down without the manager
        // lock; peer shutdown takes peer-internal locks.
        let peers_to_shutdown = self.inner.get_tablet_peers();
        for peer in &peers_to_shutdown {
            peer.shutdown();
        }

        self.leader_apply_pool.shutdown();
        self.replica_apply_pool.shutdown();

        {
            let mut registry = self.inner.registry.write();
            assert_eq!(
                registry.tablets.len(),
                peers_to_shutdown.len(),
                "tablet map contents changed during shutdown"
            );
            registry.tablets.clear();
            registry.state = ManagerState::Shutdown;
        }

        tracing::info!("tablet manager shut down");
    }
}

impl ManagerInner {
    /// Open a tablet's master block and load its metadata.
    fn open_tablet_meta(&self, tablet_id: &str) -> Result<Arc<TabletMetadata>> {
        tracing::info!(tablet_id, "loading tablet master block");
        let master_block = TabletMasterBlock::open(&self.fs, tablet_id)?;
        TabletMetadata::load(&self.fs, master_block)
            .with_context(|| format!("failed to load tablet metadata for {tablet_id}"))
    }

    /// Build a peer whose dirty callback holds a non-owning handle
    /// back to this manager.
    fn new_peer(self: &Arc<Self>, meta: &Arc<TabletMetadata>) -> Arc<TabletPeer> {
        let weak = Arc::downgrade(self);
        let listener: DirtyListener = Box::new(move |tablet_id| {
            if let Some(inner) = weak.upgrade() {
                inner.mark_tablet_dirty(tablet_id);
            }
        });
        TabletPeer::new(Arc::clone(meta), self.fs.uuid().to_string(), listener)
    }

    fn register_tablet(&self, peer: Arc<TabletPeer>) {
        let tablet_id = peer.tablet_id().to_string();
        {
            let mut registry = self.registry.write();
            if registry.tablets.insert(tablet_id.clone(), peer).is_some() {
                panic!("unable to register tablet peer {tablet_id}: already registered");
            }
        }
        tracing::info!(tablet_id = %tablet_id, "registered tablet");
    }

    fn lookup_tablet(&self, tablet_id: &str) -> Option<Arc<TabletPeer>> {
        self.registry.read().tablets.get(tablet_id).cloned()
    }

    fn get_tablet_peers(&self) -> Vec<Arc<TabletPeer>> {
        self.registry.read().tablets.values().cloned().collect()
    }

    fn mark_tablet_dirty(&self, tablet_id: &str) {
        let mut registry = self.registry.write();
        if registry.state == ManagerState::Shutdown {
            return;
        }
        self.mark_dirty_locked(&mut registry, tablet_id);
    }

    fn mark_dirty_locked(&self, registry: &mut Registry, tablet_id: &str) {
        let seq = self.next_report_seq.load(Ordering::SeqCst);
        match registry.dirty_tablets.entry(tablet_id.to_string()) {
            Entry::Occupied(mut entry) => {
                debug_assert!(seq >= entry.get().change_seq);
                entry.get_mut().change_seq = seq;
            }
            Entry::Vacant(entry) => {
                entry.insert(TabletReportState { change_seq: seq });
            }
        }
        tracing::trace!(tablet_id, report_seq = seq, "tablet marked dirty");
    }

    /// Bootstrap job: replay the log, initialize and start the peer.
    ///
    /// Failures land in the peer's state, never in the manager's.
    fn open_tablet(self: &Arc<Self>, meta: &Arc<TabletMetadata>) {
        let tablet_id = meta.tablet_id().to_string();
        let peer = self
            .lookup_tablet(&tablet_id)
            .unwrap_or_else(|| panic!("tablet {tablet_id} not registered prior to bootstrap"));

        tracing::info!(tablet_id = %tablet_id, "bootstrapping tablet");
        let start = Instant::now();

        let (tablet, log, bootstrap_info) = match bootstrap_tablet(&self.fs, meta) {
            Ok(parts) => parts,
            Err(error) => {
                tracing::error!(
                    tablet_id = %tablet_id,
                    error = %format!("{error:#}"),
                    "tablet failed to bootstrap"
                );
                peer.set_failed(error.into());
                return;
            }
        };

        let metric_entity = MetricEntity::new(format!("tablet {tablet_id}"));
        if let Err(error) = peer.init(
            tablet,
            log,
            metric_entity,
            &self.mem_root,
            self.opts.transaction_memory_limit_mb,
        ) {
            peer.set_failed(error);
            return;
        }
        if let Err(error) = peer.start(&bootstrap_info) {
            peer.set_failed(error);
            return;
        }

        {
            let mut registry = self.registry.write();
            if registry.state != ManagerState::Shutdown {
                self.mark_dirty_locked(&mut registry, &tablet_id);
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if elapsed_ms > self.opts.start_warn_threshold_ms {
            tracing::warn!(
                tablet_id = %tablet_id,
                elapsed_ms,
                "tablet startup took longer than expected"
            );
        }
    }
}

/// Removes a tablet id from the creates-in-progress set when the
/// creation attempt leaves scope, whatever the outcome.
struct CreateInProgressGuard<'a> {
    inner: &'a ManagerInner,
    tablet_id: &'a str,
}

impl Drop for CreateInProgressGuard<'_> {
    fn drop(&mut self) {
        let mut registry = self.inner.registry.write();
        let removed = registry.creates_in_progress.remove(self.tablet_id);
        debug_assert!(
            removed,
            "create-in-progress entry for {} vanished",
            self.tablet_id
        );
    }
}

fn reported_tablet(peer: &Arc<TabletPeer>) -> ReportedTablet {
    let state = peer.state();
    ReportedTablet {
        tablet_id: peer.tablet_id().to_string(),
        state,
        error: if state == TabletState::Failed {
            peer.error().map(|e| e.to_string())
        } else {
            None
        },
        role: peer.role(),
        schema_version: peer.tablet().map(|t| t.schema_version()),
    }
}
