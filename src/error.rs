//! Error types for visit detection and progress commits.
//!
//! Geolocation, catalog and store failures are all recoverable: the poller
//! logs them, reports them to the host and tries again on the next tick.

use thiserror::Error;

/// Failures from the geolocation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    /// The user has not granted location access.
    #[error("location permission denied")]
    PermissionDenied,

    /// No fix was available, or the bounded wait elapsed.
    #[error("position unavailable: {0}")]
    PositionUnavailable(String),
}

/// Failures from a single round-trip to the remote document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Network or backend failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The document changed since it was read.
    #[error("document version conflict")]
    Conflict,

    /// The stored document could not be encoded or decoded.
    #[error("ledger document codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Failures surfaced by [`crate::ProgressLedger`] operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The store could not be reached. Nothing was written.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Every attempt lost a race against another writer.
    #[error("concurrent update failure after {attempts} attempts")]
    ConcurrentUpdateFailure { attempts: u32 },
}

/// Store failures that reach a ledger caller without going through a retry
/// loop. A conflict converted here is a single conditional write that lost,
/// so it reports one attempt; [`crate::run_transaction`] counts its own
/// attempts and never routes a conflict through this conversion.
impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => LedgerError::StoreUnavailable(msg),
            StoreError::Codec(e) => LedgerError::StoreUnavailable(format!("corrupt ledger document: {}", e)),
            StoreError::Conflict => LedgerError::ConcurrentUpdateFailure { attempts: 1 },
        }
    }
}

/// Failures from the landmark catalog collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("landmark catalog unavailable: {0}")]
    Unavailable(String),
}

/// Why a poller tick ended without a commit.
#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Position(#[from] PositionError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The tick panicked and was caught at the poller boundary.
    #[error("tick panicked: {0}")]
    Panicked(String),
}

/// Invalid engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unretried_conflict_counts_one_attempt() {
        let err = LedgerError::from(StoreError::Conflict);
        assert!(matches!(err, LedgerError::ConcurrentUpdateFailure { attempts: 1 }));
        assert_eq!(err.to_string(), "concurrent update failure after 1 attempts");
    }

    #[test]
    fn test_corrupt_document_is_an_outage() {
        let bad = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = LedgerError::from(StoreError::Codec(bad));
        assert!(matches!(err, LedgerError::StoreUnavailable(msg) if msg.starts_with("corrupt ledger document")));
    }
}
