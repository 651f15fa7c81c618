//! Transaction driver handles.
//!
//! A [`TransactionDriver`] is the tracker-facing view of one in-flight
//! mutation: its kind, the serialized size of the request that started
//! it, and (when known) the tablet it runs against. The tracker keys
//! its registry by handle identity, so a driver admitted twice is a
//! programming error.

use std::sync::Arc;

/// Kind of an in-flight transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Row mutation.
    Write,
    /// Schema change.
    AlterSchema,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write => f.write_str("write"),
            Self::AlterSchema => f.write_str("alter-schema"),
        }
    }
}

/// Handle to one in-flight transaction.
#[derive(Debug)]
pub struct TransactionDriver {
    kind: TransactionKind,
    request_size: u64,
    tablet_id: Option<String>,
}

impl TransactionDriver {
    /// Create a driver for a request of `request_size` serialized bytes.
    pub fn new(kind: TransactionKind, request_size: u64) -> Arc<Self> {
        Arc::new(Self {
            kind,
            request_size,
            tablet_id: None,
        })
    }

    /// Create a driver bound to a tablet (used for logging).
    pub fn for_tablet(
        kind: TransactionKind,
        request_size: u64,
        tablet_id: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            request_size,
            tablet_id: Some(tablet_id.into()),
        })
    }

    /// Transaction kind.
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Serialized size of the originating request, in bytes.
    pub fn request_size(&self) -> u64 {
        self.request_size
    }

    /// Owning tablet, when known.
    pub fn tablet_id(&self) -> Option<&str> {
        self.tablet_id.as_deref()
    }

    /// One-line description for drain logging.
    pub fn description(&self) -> String {
        format!(
            "{} transaction of {} bytes on tablet {}",
            self.kind,
            self.request_size,
            self.tablet_id.as_deref().unwrap_or("(unknown)")
        )
    }
}

/// Identity key of a driver handle.
pub(crate) fn driver_key(driver: &Arc<TransactionDriver>) -> usize {
    Arc::as_ptr(driver) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_keys_differ_per_handle() {
        let a = TransactionDriver::new(TransactionKind::Write, 128);
        let b = TransactionDriver::new(TransactionKind::Write, 128);
        assert_ne!(driver_key(&a), driver_key(&b));
        assert_eq!(driver_key(&a), driver_key(&Arc::clone(&a)));
    }

    #[test]
    fn test_description_names_tablet() {
        let d = TransactionDriver::for_tablet(TransactionKind::AlterSchema, 64, "t9");
        assert!(d.description().contains("alter-schema"));
        assert!(d.description().contains("t9"));
    }
}
