//! Record engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for record handling.
///
/// Serialized with camelCase keys and timeouts as integer milliseconds, so
/// it can be embedded in a host's configuration file:
///
/// ```json
/// { "cacheRetrievalTimeout": 500, "storageExclusionPrefixes": ["tmp/"] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordConfig {
    /// How long a cache read or delete may take.
    #[serde(with = "millis")]
    pub cache_retrieval_timeout: Duration,
    /// How long a storage read or delete may take.
    #[serde(with = "millis")]
    pub storage_retrieval_timeout: Duration,
    /// Records whose names start with one of these prefixes never touch
    /// storage.
    pub storage_exclusion_prefixes: Vec<String>,
    /// Records whose names start with one of these prefixes are written
    /// directly to cache and storage, bypassing version ordering.
    pub storage_hot_path_prefixes: Vec<String>,
}

impl RecordConfig {
    /// Creates a configuration with default timeouts and no prefixes.
    pub fn new() -> Self {
        Self {
            cache_retrieval_timeout: Duration::from_millis(1000),
            storage_retrieval_timeout: Duration::from_millis(2000),
            storage_exclusion_prefixes: Vec::new(),
            storage_hot_path_prefixes: Vec::new(),
        }
    }

    /// Parses a configuration from JSON. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or has mistyped values.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Sets the cache timeout.
    pub fn with_cache_retrieval_timeout(mut self, timeout: Duration) -> Self {
        self.cache_retrieval_timeout = timeout;
        self
    }

    /// Sets the storage timeout.
    pub fn with_storage_retrieval_timeout(mut self, timeout: Duration) -> Self {
        self.storage_retrieval_timeout = timeout;
        self
    }

    /// Adds a storage exclusion prefix.
    pub fn with_storage_exclusion_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_exclusion_prefixes.push(prefix.into());
        self
    }

    /// Adds a hot path prefix.
    pub fn with_storage_hot_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_hot_path_prefixes.push(prefix.into());
        self
    }

    /// Returns true if `name` must never be read from or written to storage.
    pub fn is_storage_excluded(&self, name: &str) -> bool {
        matches_prefix(&self.storage_exclusion_prefixes, name)
    }

    /// Returns true if writes to `name` bypass record transitions.
    pub fn is_hot_path(&self, name: &str) -> bool {
        matches_prefix(&self.storage_hot_path_prefixes, name)
    }
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_prefix(prefixes: &[String], name: &str) -> bool {
    prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RecordConfig::default();
        assert_eq!(config.cache_retrieval_timeout, Duration::from_millis(1000));
        assert_eq!(config.storage_retrieval_timeout, Duration::from_millis(2000));
        assert!(!config.is_storage_excluded("anything"));
        assert!(!config.is_hot_path("anything"));
    }

    #[test]
    fn config_builder() {
        let config = RecordConfig::new()
            .with_cache_retrieval_timeout(Duration::from_millis(50))
            .with_storage_exclusion_prefix("tmp/")
            .with_storage_hot_path_prefix("metrics/");

        assert_eq!(config.cache_retrieval_timeout, Duration::from_millis(50));
        assert!(config.is_storage_excluded("tmp/session"));
        assert!(!config.is_storage_excluded("users/tmp/"));
        assert!(config.is_hot_path("metrics/cpu"));
    }

    #[test]
    fn config_from_json() {
        let config = RecordConfig::from_json(
            r#"{ "cacheRetrievalTimeout": 250, "storageHotPathPrefixes": ["hot/"] }"#,
        )
        .unwrap();
        assert_eq!(config.cache_retrieval_timeout, Duration::from_millis(250));
        assert_eq!(config.storage_retrieval_timeout, Duration::from_millis(2000));
        assert!(config.is_hot_path("hot/x"));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["cacheRetrievalTimeout"], 250);
    }

    #[test]
    fn config_rejects_bad_timeout() {
        assert!(RecordConfig::from_json(r#"{ "cacheRetrievalTimeout": "soon" }"#).is_err());
    }
}
