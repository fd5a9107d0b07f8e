//! Error types shared across the recorder.
//!
//! Only storage and configuration can fail. Capture itself never produces an
//! error that reaches the request path; not-found is modelled as `Option`.

use thiserror::Error;

/// Errors raised by a [`RecordStorage`](crate::storage::RecordStorage) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem or network failure in a durable backend.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted record could not be encoded or decoded.
    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend cannot serve requests right now.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
