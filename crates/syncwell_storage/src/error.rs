//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backend reported a failure.
    #[error("store backend error: {0}")]
    Backend(String),

    /// The operation is not supported by this store.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// The store is closed.
    #[error("store is closed")]
    Closed,
}
