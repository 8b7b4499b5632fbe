//! Error types for the KV adapter.

use thiserror::Error;

/// Result type alias for KV operations.
pub type KvResult<T> = Result<T, KvError>;

/// Errors surfaced by any [`crate::KvStore`] backend.
///
/// Callers are expected to branch on `NotFound`: the store layer
/// treats it as "empty result" on reads and as a soft warning on
/// deletes, never as a hard failure.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("key not found")]
    NotFound,

    #[error("node is a directory")]
    NodeIsDirectory,

    #[error("compare failed")]
    CompareFailed,

    #[error("operation timed out")]
    Timeout,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl KvError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, KvError::NotFound)
    }

    /// Timeout or unavailability, retried by the normal cadence of
    /// arriving heartbeats rather than by the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, KvError::Timeout | KvError::Unavailable(_))
    }
}
