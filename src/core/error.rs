//! Error types for the tablet server core.
//!
//! Slate splits errors the same way its modules split responsibilities:
//! [`SlateError`] carries the stable, client-visible taxonomy (admission
//! rejections, lookup misses, lifecycle violations), while storage and
//! orchestration plumbing uses `anyhow` with context and flows into the
//! taxonomy through the `Upstream` variant.

use thiserror::Error;

/// Client-visible error conditions produced by the tablet server core.
#[derive(Debug, Clone, Error)]
pub enum SlateError {
    /// An entity (tablet, in-progress creation) already exists.
    #[error("already present: {entity}")]
    AlreadyPresent { entity: String },

    /// Lookup by an unknown identifier.
    #[error("not found: {entity}")]
    NotFound { entity: String },

    /// The operation was rejected but may succeed if retried later
    /// (memory pressure, peer not in a serving state).
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String },

    /// A deadline elapsed before the operation completed.
    #[error("timed out: {message}")]
    TimedOut { message: String },

    /// The component is not in a state that permits the operation.
    #[error("illegal state: {message}")]
    IllegalState { message: String },

    /// The caller supplied an argument that can never be valid.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// An error propagated from a collaborator (metadata persistence,
    /// log replay, peer initialization). The message preserves the
    /// full context chain.
    #[error("{message}")]
    Upstream { message: String },
}

impl SlateError {
    /// Create an AlreadyPresent error.
    pub fn already_present(entity: impl Into<String>) -> Self {
        Self::AlreadyPresent {
            entity: entity.into(),
        }
    }

    /// Create a NotFound error.
    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }

    /// Create a ServiceUnavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    /// Create a TimedOut error.
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::TimedOut {
            message: message.into(),
        }
    }

    /// Create an IllegalState error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Check if this error indicates the operation should be retried.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable { .. } | Self::TimedOut { .. }
        )
    }
}

impl From<anyhow::Error> for SlateError {
    fn from(err: anyhow::Error) -> Self {
        // `{:#}` flattens the context chain into a single line.
        Self::Upstream {
            message: format!("{err:#}"),
        }
    }
}

/// Result type using SlateError.
pub type SlateResult<T> = Result<T, SlateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(SlateError::service_unavailable("memory pressure").is_retriable());
        assert!(SlateError::timed_out("drain deadline").is_retriable());
        assert!(!SlateError::already_present("tablet abc").is_retriable());
        assert!(!SlateError::not_found("tablet abc").is_retriable());
    }

    #[test]
    fn test_upstream_preserves_context_chain() {
        let err = anyhow::anyhow!("disk unplugged");
        let err = err.context("failed to load tablet metadata");
        let slate: SlateError = err.into();
        let msg = slate.to_string();
        assert!(msg.contains("failed to load tablet metadata"));
        assert!(msg.contains("disk unplugged"));
    }
}
