//! Metric primitives.
//!
//! A [`MetricEntity`] owns the counters and gauges of one scope (the
//! server, or a single tablet). Components instantiate their
//! instruments once and cache the handles, so the hot path is a single
//! atomic operation with no map lookup.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Increment by one.
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by `delta`.
    pub fn increment_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Current value.
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge tracking a current level.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    /// Increment by one.
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by one. Underflow is an accounting bug.
    pub fn decrement(&self) {
        let prev = self.value.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "gauge decremented below zero");
    }

    /// Set to an absolute value.
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Current value.
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A named scope owning counters and gauges.
#[derive(Debug)]
pub struct MetricEntity {
    name: String,
    counters: RwLock<HashMap<String, Arc<Counter>>>,
    gauges: RwLock<HashMap<String, Arc<Gauge>>>,
}

impl MetricEntity {
    /// Create a new entity.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
        })
    }

    /// Entity name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instantiate (or fetch) a counter.
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        if let Some(counter) = self.counters.read().get(name) {
            return Arc::clone(counter);
        }
        let mut counters = self.counters.write();
        Arc::clone(
            counters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Counter::default())),
        )
    }

    /// Instantiate (or fetch) a gauge with an initial value.
    pub fn gauge(&self, name: &str, initial: u64) -> Arc<Gauge> {
        if let Some(gauge) = self.gauges.read().get(name) {
            return Arc::clone(gauge);
        }
        let mut gauges = self.gauges.write();
        Arc::clone(gauges.entry(name.to_string()).or_insert_with(|| {
            let gauge = Gauge::default();
            gauge.set(initial);
            Arc::new(gauge)
        }))
    }

    /// Read a counter by name (0 if never instantiated).
    pub fn counter_value(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map(|c| c.value())
            .unwrap_or(0)
    }

    /// Read a gauge by name (0 if never instantiated).
    pub fn gauge_value(&self, name: &str) -> u64 {
        self.gauges
            .read()
            .get(name)
            .map(|g| g.value())
            .unwrap_or(0)
    }
}
