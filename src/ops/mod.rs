//! Operations and observability.
//!
//! - [`metrics`] - Metric entities, counters and gauges

pub mod metrics;
