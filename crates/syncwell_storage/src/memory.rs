//! In-memory record store.

use crate::error::{StoreError, StoreResult};
use crate::store::{RecordStore, StoredRecord};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use syncwell_protocol::Version;

/// Store operations, used to address injected faults and call counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// [`RecordStore::get`].
    Get,
    /// [`RecordStore::set`].
    Set,
    /// [`RecordStore::delete`].
    Delete,
    /// [`RecordStore::delete_bulk`].
    DeleteBulk,
    /// [`RecordStore::head_bulk`].
    HeadBulk,
}

/// A fault injected into the next call of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The call fails with [`StoreError::Backend`].
    Fail(String),
    /// The call never completes.
    Hang,
    /// The call completes normally after the given delay.
    Delay(Duration),
}

/// An in-memory record store.
///
/// This store keeps all records in a map and is suitable for:
/// - Unit and integration tests, standing in for either tier
/// - Single-process deployments that don't need persistence
///
/// Faults are queued per [`StoreOp`] and consumed one per call, so a test can
/// script "the second cache write fails" precisely. A fixed latency can be
/// added to every call to force interleavings.
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across tasks.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, StoredRecord>>,
    faults: Mutex<HashMap<StoreOp, VecDeque<Fault>>>,
    calls: Mutex<HashMap<StoreOp, usize>>,
    latency: Mutex<Option<Duration>>,
    closed: RwLock<bool>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a record without counting a call.
    pub fn insert(&self, name: impl Into<String>, version: Version, data: Value) {
        self.records
            .write()
            .insert(name.into(), StoredRecord { version, data });
    }

    /// Returns the stored record without counting a call.
    #[must_use]
    pub fn snapshot(&self, name: &str) -> Option<StoredRecord> {
        self.records.read().get(name).cloned()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Makes the next call of `op` fail with `reason`.
    pub fn fail_next(&self, op: StoreOp, reason: impl Into<String>) {
        self.push_fault(op, Fault::Fail(reason.into()));
    }

    /// Makes the next call of `op` never complete.
    pub fn hang_next(&self, op: StoreOp) {
        self.push_fault(op, Fault::Hang);
    }

    /// Delays the next call of `op`.
    pub fn delay_next(&self, op: StoreOp, delay: Duration) {
        self.push_fault(op, Fault::Delay(delay));
    }

    /// Adds a fixed latency to every call. `None` removes it.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Returns how many times `op` has been called.
    #[must_use]
    pub fn call_count(&self, op: StoreOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Closes the store. Every later call fails with [`StoreError::Closed`].
    pub fn close(&self) {
        *self.closed.write() = true;
    }

    fn push_fault(&self, op: StoreOp, fault: Fault) {
        self.faults.lock().entry(op).or_default().push_back(fault);
    }

    /// Counts the call and plays latency and any queued fault for it.
    async fn enter(&self, op: StoreOp) -> StoreResult<()> {
        *self.calls.lock().entry(op).or_insert(0) += 1;

        if *self.closed.read() {
            return Err(StoreError::Closed);
        }

        let fault = self
            .faults
            .lock()
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        let latency = *self.latency.lock();

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match fault {
            None => Ok(()),
            Some(Fault::Fail(reason)) => Err(StoreError::Backend(reason)),
            Some(Fault::Hang) => std::future::pending().await,
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn get(&self, name: &str) -> StoreResult<Option<StoredRecord>> {
        self.enter(StoreOp::Get).await?;
        Ok(self.records.read().get(name).cloned())
    }

    async fn set(&self, name: &str, version: Version, data: Value) -> StoreResult<()> {
        self.enter(StoreOp::Set).await?;
        self.records
            .write()
            .insert(name.to_string(), StoredRecord { version, data });
        Ok(())
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        self.enter(StoreOp::Delete).await?;
        self.records.write().remove(name);
        Ok(())
    }

    async fn delete_bulk(&self, names: &[String]) -> StoreResult<()> {
        self.enter(StoreOp::DeleteBulk).await?;
        let mut records = self.records.write();
        for name in names {
            records.remove(name);
        }
        Ok(())
    }

    async fn head_bulk(&self, names: &[String]) -> StoreResult<crate::HeadBulk> {
        self.enter(StoreOp::HeadBulk).await?;
        let records = self.records.read();
        let mut result = crate::HeadBulk::default();
        for name in names {
            match records.get(name) {
                Some(record) => {
                    result.versions.insert(name.clone(), record.version);
                }
                None => result.missing.push(name.clone()),
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_set_then_get() {
        let store = InMemoryStore::new();
        assert!(store.get("a").await.unwrap().is_none());

        store.set("a", 1, json!({ "x": 1 })).await.unwrap();
        let record = store.get("a").await.unwrap().unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.data, json!({ "x": 1 }));
        assert_eq!(store.call_count(StoreOp::Get), 2);
        assert_eq!(store.call_count(StoreOp::Set), 1);
    }

    #[tokio::test]
    async fn memory_delete_and_delete_bulk() {
        let store = InMemoryStore::new();
        store.insert("a", 0, json!({}));
        store.insert("b", 0, json!({}));
        store.insert("c", 0, json!({}));

        store.delete("a").await.unwrap();
        store.delete("missing").await.unwrap();
        store
            .delete_bulk(&["b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn memory_head_bulk_reports_missing() {
        let store = InMemoryStore::new();
        store.insert("a", 4, json!({}));

        let head = store
            .head_bulk(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(head.versions.get("a"), Some(&4));
        assert_eq!(head.missing, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn injected_failure_is_consumed_once() {
        let store = InMemoryStore::new();
        store.fail_next(StoreOp::Set, "disk full");

        let err = store.set("a", 1, json!({})).await.unwrap_err();
        assert_eq!(err, StoreError::Backend("disk full".into()));
        assert!(store.snapshot("a").is_none());

        store.set("a", 1, json!({})).await.unwrap();
        assert_eq!(store.snapshot("a").unwrap().version, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn injected_hang_never_completes() {
        let store = InMemoryStore::new();
        store.hang_next(StoreOp::Get);

        let result = tokio::time::timeout(Duration::from_secs(60), store.get("a")).await;
        assert!(result.is_err());
        assert_eq!(store.call_count(StoreOp::Get), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn injected_delay_completes_late() {
        let store = InMemoryStore::new();
        store.delay_next(StoreOp::Get, Duration::from_millis(500));

        let early = tokio::time::timeout(Duration::from_millis(100), store.get("a")).await;
        assert!(early.is_err());

        store.delay_next(StoreOp::Get, Duration::from_millis(500));
        let late = tokio::time::timeout(Duration::from_secs(1), store.get("a")).await;
        assert!(late.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn closed_store_rejects_calls() {
        let store = InMemoryStore::new();
        store.close();
        assert_eq!(store.get("a").await.unwrap_err(), StoreError::Closed);
    }
}
