//! Error types for the record engine.

use std::fmt;
use syncwell_protocol::Action;
use syncwell_storage::StoreError;
use thiserror::Error;

/// Result type for record retrieval.
pub type RequestResult<T> = Result<T, RequestError>;

/// A persistence tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// The fast cache.
    Cache,
    /// The durable storage.
    Storage,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Cache => f.write_str("cache"),
            Tier::Storage => f.write_str("storage"),
        }
    }
}

/// Errors raised while retrieving a record.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// The cache did not answer in time.
    #[error("cache retrieval of {name} timed out")]
    CacheTimeout {
        /// Record name.
        name: String,
    },

    /// The storage did not answer in time.
    #[error("storage retrieval of {name} timed out")]
    StorageTimeout {
        /// Record name.
        name: String,
    },

    /// A tier reported an error.
    #[error("error while loading {name} from {tier}: {source}")]
    Load {
        /// Record name.
        name: String,
        /// The failing tier.
        tier: Tier,
        /// The tier's error.
        source: StoreError,
    },
}

impl RequestError {
    /// Returns the action reported to the client.
    pub fn action(&self) -> Action {
        match self {
            RequestError::CacheTimeout { .. } => Action::CacheRetrievalTimeout,
            RequestError::StorageTimeout { .. } => Action::StorageRetrievalTimeout,
            RequestError::Load { .. } => Action::RecordLoadError,
        }
    }
}

/// Errors raised while deleting a record.
#[derive(Debug, Clone, Error)]
pub enum DeletionError {
    /// A tier did not answer in time.
    #[error("{tier} timeout while deleting {name}")]
    Timeout {
        /// The tier that timed out.
        tier: Tier,
        /// Record name.
        name: String,
    },

    /// A tier reported an error.
    #[error("{tier} error while deleting {name}: {source}")]
    Backend {
        /// The failing tier.
        tier: Tier,
        /// Record name.
        name: String,
        /// The tier's error.
        source: StoreError,
    },

    /// A tier task ended without reporting.
    #[error("deletion of {name} was interrupted")]
    Interrupted {
        /// Record name.
        name: String,
    },
}

/// Errors that end a record transition.
#[derive(Debug, Clone, Error)]
pub enum TransitionError {
    /// A plain update addressed a record that does not exist.
    #[error("received update for non-existent record {name}")]
    NonExistentRecord {
        /// Record name.
        name: String,
    },

    /// The baseline could not be loaded.
    #[error("record retrieval failed: {0}")]
    Load(#[from] RequestError),

    /// A cache write failed.
    #[error("cache write failed: {0}")]
    CacheWrite(StoreError),

    /// A storage write failed.
    #[error("storage write failed: {0}")]
    StorageWrite(StoreError),
}

/// A permission check could not be evaluated.
#[derive(Debug, Clone, Error)]
#[error("permission check failed: {0}")]
pub struct PermissionError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_error_actions() {
        let timeout = RequestError::CacheTimeout { name: "a".into() };
        assert_eq!(timeout.action(), Action::CacheRetrievalTimeout);

        let load = RequestError::Load {
            name: "a".into(),
            tier: Tier::Storage,
            source: StoreError::Backend("down".into()),
        };
        assert_eq!(load.action(), Action::RecordLoadError);
        assert_eq!(
            load.to_string(),
            "error while loading a from storage: store backend error: down"
        );
    }

    #[test]
    fn error_display() {
        let err = DeletionError::Timeout {
            tier: Tier::Cache,
            name: "car/1".into(),
        };
        assert_eq!(err.to_string(), "cache timeout while deleting car/1");

        let err = TransitionError::NonExistentRecord {
            name: "car/1".into(),
        };
        assert!(err.to_string().contains("non-existent record car/1"));
    }
}
