//! Error types for panelwatch.
//!
//! Uses `thiserror` for library-style error definitions.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while ingesting panel datagrams.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Socket bind or read failure
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Datagram does not match the panel wire format
    #[error("malformed datagram: {0}")]
    Format(#[from] FormatError),

    /// Invalid pipeline configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Event store failure
    #[error("event store error: {0}")]
    Store(#[from] StoreError),
}

/// Reasons a datagram cannot be turned into a parsed event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Extended record split into fewer parts than required
    #[error("expected at least {expected} record parts, got {actual}")]
    TooFewParts { expected: usize, actual: usize },

    /// Event body has fewer delimited fields than the panel layout needs
    #[error("expected at least {expected} event fields, got {actual}")]
    TooFewFields { expected: usize, actual: usize },
}

/// Failures reported by an event store.
///
/// A duplicate fingerprint is not a failure; see `InsertOutcome`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Lock contention or a dropped connection
    #[error("transient store failure: {0}")]
    Transient(String),

    /// Schema violation, disk full, corrupted transaction
    #[error("permanent store failure: {0}")]
    Permanent(String),

    /// The write did not finish within the configured bound
    #[error("store write timed out after {0:?}")]
    Timeout(Duration),

    /// The writer gave up on the attempt before it committed; rolled back
    #[error("store write abandoned before commit")]
    Abandoned,
}

impl StoreError {
    /// Whether the writer may retry the insert.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::Transient("database is locked".into()).is_retryable());
        assert!(StoreError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(!StoreError::Permanent("disk full".into()).is_retryable());
        assert!(!StoreError::Abandoned.is_retryable());
    }

    #[test]
    fn test_format_error_message() {
        let err = FormatError::TooFewFields {
            expected: 12,
            actual: 8,
        };
        assert_eq!(err.to_string(), "expected at least 12 event fields, got 8");
    }
}
