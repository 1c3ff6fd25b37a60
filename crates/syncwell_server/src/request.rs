//! Record retrieval: cache first, storage fallback.

use crate::config::RecordConfig;
use crate::error::{RequestError, RequestResult, Tier};
use crate::services::RecordServices;
use serde_json::Value;
use syncwell_protocol::{Version, NO_VERSION};
use tokio::time::timeout;
use tracing::{error, warn};

/// The state of a record as retrieved from the tiers.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSnapshot {
    /// Record name.
    pub name: String,
    /// Record version, [`NO_VERSION`] when the record does not exist.
    pub version: Version,
    /// Record document, `None` when the record does not exist.
    pub data: Option<Value>,
}

impl RecordSnapshot {
    /// A snapshot of a record that does not exist.
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: NO_VERSION,
            data: None,
        }
    }

    /// Returns true if the record exists.
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }
}

/// A single retrieval of a record.
///
/// The cache is asked first. On a miss, storage is asked unless the name is
/// excluded from storage, and a storage hit is promoted to the cache in the
/// background. Each tier is bounded by its own timeout; a tier answering
/// after its timeout is ignored.
///
/// A record that exists in neither tier is not an error: the snapshot has
/// version [`NO_VERSION`] and no data.
pub struct RecordRequest<'a> {
    name: &'a str,
    config: &'a RecordConfig,
    services: &'a RecordServices,
    promote_to_cache: bool,
}

impl<'a> RecordRequest<'a> {
    /// Creates a request for `name`.
    pub fn new(name: &'a str, config: &'a RecordConfig, services: &'a RecordServices) -> Self {
        Self {
            name,
            config,
            services,
            promote_to_cache: true,
        }
    }

    /// Disables promotion of storage hits to the cache.
    ///
    /// Record transitions load without promotion, since a promotion landing
    /// after the transition's own cache write would overwrite it.
    pub fn without_promotion(mut self) -> Self {
        self.promote_to_cache = false;
        self
    }

    /// Retrieves the record.
    ///
    /// # Errors
    ///
    /// Returns the first timeout or tier error. Errors are logged before
    /// they are returned.
    pub async fn fetch(self) -> RequestResult<RecordSnapshot> {
        let result = self.lookup().await;
        if let Err(err) = &result {
            error!(event = %err.action(), record = %self.name, "{err}");
        }
        result
    }

    async fn lookup(&self) -> RequestResult<RecordSnapshot> {
        let name = self.name;

        let cached = timeout(
            self.config.cache_retrieval_timeout,
            self.services.cache.get(name),
        )
        .await
        .map_err(|_| RequestError::CacheTimeout {
            name: name.to_string(),
        })?
        .map_err(|source| RequestError::Load {
            name: name.to_string(),
            tier: Tier::Cache,
            source,
        })?;

        if let Some(record) = cached {
            return Ok(RecordSnapshot {
                name: name.to_string(),
                version: record.version,
                data: Some(record.data),
            });
        }

        if self.config.is_storage_excluded(name) {
            return Ok(RecordSnapshot::missing(name));
        }

        let stored = timeout(
            self.config.storage_retrieval_timeout,
            self.services.storage.get(name),
        )
        .await
        .map_err(|_| RequestError::StorageTimeout {
            name: name.to_string(),
        })?
        .map_err(|source| RequestError::Load {
            name: name.to_string(),
            tier: Tier::Storage,
            source,
        })?;

        let Some(record) = stored else {
            return Ok(RecordSnapshot::missing(name));
        };

        if self.promote_to_cache {
            let cache = self.services.cache.clone();
            let name = name.to_string();
            let version = record.version;
            let data = record.data.clone();
            tokio::spawn(async move {
                if let Err(err) = cache.set(&name, version, data).await {
                    warn!(record = %name, "cache promotion failed: {err}");
                }
            });
        }

        Ok(RecordSnapshot {
            name: name.to_string(),
            version: record.version,
            data: Some(record.data),
        })
    }
}
