//! Hierarchical memory accounting.
//!
//! A [`MemTracker`] is one node in a tree of byte budgets. Consumption
//! charged to a node propagates to every ancestor, so a child can never
//! hold bytes its parents have not accounted for. Reservations are
//! all-or-nothing: if any node in the chain would exceed its limit, the
//! partial charges are rolled back and the reservation fails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One node in the memory accounting tree.
#[derive(Debug)]
pub struct MemTracker {
    /// Human-readable identifier, used in logs.
    id: String,

    /// Byte limit; `None` means unlimited.
    limit: Option<u64>,

    /// Bytes currently charged to this node and its descendants.
    consumption: AtomicU64,

    /// Parent node; `None` for the root.
    parent: Option<Arc<MemTracker>>,
}

impl MemTracker {
    /// Create a root tracker with an optional limit.
    pub fn root(id: impl Into<String>, limit: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            limit,
            consumption: AtomicU64::new(0),
            parent: None,
        })
    }

    /// Create a child tracker under `parent` with an optional limit.
    pub fn child(parent: &Arc<MemTracker>, id: impl Into<String>, limit: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            limit,
            consumption: AtomicU64::new(0),
            parent: Some(Arc::clone(parent)),
        })
    }

    /// Tracker identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Byte limit, if any.
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Bytes currently charged to this node.
    pub fn consumption(&self) -> u64 {
        self.consumption.load(Ordering::Acquire)
    }

    /// Try to reserve `bytes` against this node and every ancestor.
    ///
    /// Returns `false` without any net effect if the reservation would
    /// push any node in the chain over its limit.
    pub fn try_consume(self: &Arc<Self>, bytes: u64) -> bool {
        if bytes == 0 {
            return true;
        }

        let mut charged: Vec<&MemTracker> = Vec::new();
        let mut node: Option<&Arc<MemTracker>> = Some(self);
        while let Some(tracker) = node {
            let new_total = tracker.consumption.fetch_add(bytes, Ordering::AcqRel) + bytes;
            if tracker.limit.is_some_and(|limit| new_total > limit) {
                tracker.consumption.fetch_sub(bytes, Ordering::AcqRel);
                for undone in charged {
                    undone.consumption.fetch_sub(bytes, Ordering::AcqRel);
                }
                return false;
            }
            charged.push(tracker);
            node = tracker.parent.as_ref();
        }
        true
    }

    /// Check whether `bytes` would fit under this node's own limit,
    /// ignoring every ancestor.
    pub fn can_consume_no_ancestors(&self, bytes: u64) -> bool {
        match self.limit {
            Some(limit) => self.consumption() + bytes <= limit,
            None => true,
        }
    }

    /// Release `bytes` from this node and every ancestor.
    pub fn release(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let mut node: Option<&MemTracker> = Some(self);
        while let Some(tracker) = node {
            let prev = tracker.consumption.fetch_sub(bytes, Ordering::AcqRel);
            debug_assert!(
                prev >= bytes,
                "memory tracker {} released {} bytes with only {} consumed",
                tracker.id,
                bytes,
                prev
            );
            node = tracker.parent.as_deref();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_propagates_to_ancestors() {
        let root = MemTracker::root("root", None);
        let child = MemTracker::child(&root, "child", Some(1024));

        assert!(child.try_consume(512));
        assert_eq!(child.consumption(), 512);
        assert_eq!(root.consumption(), 512);

        child.release(512);
        assert_eq!(child.consumption(), 0);
        assert_eq!(root.consumption(), 0);
    }

    #[test]
    fn test_own_limit_rejects_and_rolls_back() {
        let root = MemTracker::root("root", None);
        let child = MemTracker::child(&root, "child", Some(1000));

        assert!(child.try_consume(800));
        assert!(!child.try_consume(300));
        assert_eq!(child.consumption(), 800);
        assert_eq!(root.consumption(), 800);
    }

    #[test]
    fn test_ancestor_limit_rejects_and_rolls_back() {
        let root = MemTracker::root("root", Some(1000));
        let a = MemTracker::child(&root, "a", None);
        let b = MemTracker::child(&root, "b", None);

        assert!(a.try_consume(700));
        // b has no limit of its own, but the root is the binding constraint.
        assert!(!b.try_consume(400));
        assert_eq!(b.consumption(), 0);
        assert_eq!(root.consumption(), 700);
        assert!(b.can_consume_no_ancestors(400));
    }

    #[test]
    fn test_unlimited_tracker_always_admits() {
        let root = MemTracker::root("root", None);
        assert!(root.try_consume(u64::MAX / 4));
        assert!(root.can_consume_no_ancestors(u64::MAX / 4));
        root.release(u64::MAX / 4);
        assert_eq!(root.consumption(), 0);
    }

    #[test]
    fn test_zero_bytes_is_noop() {
        let root = MemTracker::root("root", Some(0));
        assert!(root.try_consume(0));
        root.release(0);
        assert_eq!(root.consumption(), 0);
    }
}
