//! Slate - tablet server core for a distributed columnar store.
//!
//! A slate server hosts a dynamic set of *tablets*: contiguous
//! key-range shards of tables, each with its own operation log and
//! materialized state. The crate covers the tablet lifecycle and the
//! admission of mutation transactions; consensus, RPC dispatch and
//! master-side coordination are collaborators behind narrow seams.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Tablet Manager                           │
//! │   registry │ create/delete │ bootstrap pool │ tablet reports    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Tablet Peers                             │
//! │   lifecycle state machine │ role │ transaction tracker          │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Storage Layer                            │
//! │   master blocks │ alternating metadata blocks │ operation log   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::error`] - Error types
//! - [`core::memory`] - Hierarchical memory accounting
//! - [`core::pool`] - Fixed-size worker pools
//! - [`core::runtime`] - Main runtime orchestration
//!
//! ## Manager
//! - [`manager`] - Tablet registry, lifecycle, and reporting
//!
//! ## Tablet
//! - [`tablet::tablet`] - Materialized in-memory tablet state
//! - [`tablet::peer`] - Tablet peer lifecycle
//! - [`tablet::bootstrap`] - Log replay into a runnable tablet
//!
//! ## Transactions
//! - [`txn::driver`] - In-flight transaction handles
//! - [`txn::tracker`] - Admission control and drain
//!
//! ## Storage
//! - [`storage::fs`] - Data directory layout and server identity
//! - [`storage::metadata`] - Crash-safe tablet metadata
//! - [`storage::log`] - Per-tablet operation log
//!
//! ## Operations
//! - [`ops::metrics`] - Counters and gauges
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - A tablet id lives in at most one of the tablet map and the
//!   creates-in-progress set at any instant.
//! - A tracker's charged memory always equals the summed footprints of
//!   its in-flight transactions.
//! - Dirty entries record the sequence of the report that will carry
//!   them; acknowledgement of that report clears them.
//! - Peer and manager lifecycle transitions are one-way.

// Core infrastructure
pub mod core;

// Tablet manager and control-plane reporting
pub mod manager;

// Per-tablet runtime
pub mod tablet;

// Transaction admission and tracking
pub mod txn;

// Storage layer
pub mod storage;

// Operations and observability
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, memory, pool, runtime};
pub use manager::{ManagerState, TabletManager, TabletManagerOptions};
pub use storage::{fs, log, metadata};
pub use tablet::{bootstrap, peer};
pub use txn::{driver, tracker};
