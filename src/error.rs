//! Error types for the layer-stack core
//!
//! Provides structured error types for the resolver, the layer strategies,
//! the number pools and the storage-pool registry, together with the
//! classification helpers callers use to decide on retries.

use thiserror::Error;

/// Unified error type for the layer-stack core
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Access Control
    // =========================================================================
    #[error("Access denied: '{subject}' may not {access} {object}")]
    AccessDenied {
        subject: String,
        object: String,
        access: String,
    },

    // =========================================================================
    // Number Pool
    // =========================================================================
    #[error("Number pool '{pool}' exhausted")]
    PoolExhausted { pool: String },

    #[error("Value {value} out of range [{min}, {max}] for number pool '{pool}'")]
    ValueOutOfRange {
        pool: String,
        value: u32,
        min: u32,
        max: u32,
    },

    // =========================================================================
    // Uniqueness / Lookup
    // =========================================================================
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: String, name: String },

    #[error("No storage pool resolvable for volume {volume} of resource {resource}")]
    PoolNotFound { resource: String, volume: u32 },

    // =========================================================================
    // Persistence
    // =========================================================================
    #[error("Persistence failure on {entity}: {reason}")]
    Persistence { entity: String, reason: String },

    // =========================================================================
    // Invariant Violations
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an invariant violation
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Check if this error may succeed on a later attempt.
    ///
    /// Pool exhaustion clears when capacity is added or ids are released;
    /// persistence failures are transient from the core's point of view and
    /// the caller's transaction manager owns the retry policy. Everything
    /// else is either a denied capability or a defect.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::PoolExhausted { .. } | Error::Persistence { .. }
        )
    }

    /// Check if this error is a programming/invariant violation.
    ///
    /// Internal errors are never retried and indicate a defect to fix, not a
    /// runtime condition to recover from.
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal(_))
    }
}

/// Result type alias for the layer-stack core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let exhausted = Error::PoolExhausted {
            pool: "layer-ids".into(),
        };
        assert!(exhausted.is_retryable());
        assert!(!exhausted.is_internal());

        let persistence = Error::Persistence {
            entity: "layer-node".into(),
            reason: "io".into(),
        };
        assert!(persistence.is_retryable());

        let denied = Error::AccessDenied {
            subject: "api".into(),
            object: "resource/r1".into(),
            access: "change".into(),
        };
        assert!(!denied.is_retryable());
    }

    #[test]
    fn test_internal_classification() {
        let internal = Error::internal("unexpected provider kind");
        assert!(internal.is_internal());
        assert!(!internal.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = Error::ValueOutOfRange {
            pool: "minors".into(),
            value: 9,
            min: 1000,
            max: 49151,
        };
        assert_eq!(
            err.to_string(),
            "Value 9 out of range [1000, 49151] for number pool 'minors'"
        );
    }
}
