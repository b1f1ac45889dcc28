//! Storage error types

use crate::backend::BackendError;
use crate::record::RecordError;
use crate::transport::TransportError;
use thiserror::Error;

/// Result type for storage capability calls
pub type StorageResult<T> = Result<T, StorageError>;

/// Error returned by every storage capability
///
/// Transport and backend errors are wrapped transparently so callers see
/// the acknowledgment error exactly as the collaborator produced it.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StorageError {
    /// Whether the error originates from the durable backend
    #[must_use]
    pub const fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}
