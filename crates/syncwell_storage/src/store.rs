//! Record store trait definition.

use crate::error::StoreResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use syncwell_protocol::Version;

/// A record as held by a store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Record version.
    pub version: Version,
    /// Record document.
    pub data: Value,
}

/// Result of [`RecordStore::head_bulk`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadBulk {
    /// Versions of the records that were found.
    pub versions: BTreeMap<String, Version>,
    /// Names the store has no answer for.
    pub missing: Vec<String>,
}

/// A persistence tier (cache or storage) keyed by record name.
///
/// # Invariants
///
/// - `get` returns `Ok(None)` for a record that does not exist; that is
///   not an error
/// - `set` overwrites unconditionally
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing and single-process use
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Reads a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn get(&self, name: &str) -> StoreResult<Option<StoredRecord>>;

    /// Writes a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn set(&self, name: &str, version: Version, data: Value) -> StoreResult<()>;

    /// Deletes a record. Deleting a missing record succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn delete(&self, name: &str) -> StoreResult<()>;

    /// Deletes several records.
    ///
    /// The default implementation deletes them one by one and stops at the
    /// first error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn delete_bulk(&self, names: &[String]) -> StoreResult<()> {
        for name in names {
            self.delete(name).await?;
        }
        Ok(())
    }

    /// Reads only the versions of several records.
    ///
    /// The default implementation reads each record with [`get`](Self::get).
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn head_bulk(&self, names: &[String]) -> StoreResult<HeadBulk> {
        let mut result = HeadBulk::default();
        for name in names {
            match self.get(name).await? {
                Some(record) => {
                    result.versions.insert(name.clone(), record.version);
                }
                None => result.missing.push(name.clone()),
            }
        }
        Ok(result)
    }
}
