//! Transaction admission and tracking.
//!
//! - [`driver`] - Handles describing one in-flight transaction
//! - [`tracker`] - Per-tablet admission control and drain

pub mod driver;
pub mod tracker;

pub use driver::{TransactionDriver, TransactionKind};
pub use tracker::TransactionTracker;
