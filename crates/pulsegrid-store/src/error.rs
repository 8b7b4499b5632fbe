//! Error types for the health store.

use thiserror::Error;

use pulse_core::CodecError;
use pulsegrid_kv::KvError;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by [`crate::HealthStore`] operations.
///
/// `KvError::NotFound` never escapes reads or deletes; the store
/// treats it as an empty result or a soft warning.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
