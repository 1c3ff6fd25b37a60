//! Error types for the record protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while interpreting a record message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload is not valid JSON.
    #[error("invalid message data: {0}")]
    InvalidData(#[from] serde_json::Error),

    /// The message carries no payload although its action needs one.
    #[error("message for {name} carries no data")]
    MissingData {
        /// Record name.
        name: String,
    },

    /// A full update must carry a JSON object or array.
    #[error("update for {name} must carry an object or an array")]
    NotADocument {
        /// Record name.
        name: String,
    },

    /// A partial write arrived without a path.
    #[error("{action} for {name} requires a path")]
    MissingPath {
        /// Record name.
        name: String,
        /// The offending action.
        action: crate::Action,
    },

    /// The path could not be parsed.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The raw path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}
