//! # Syncwell Storage
//!
//! The record store contract used by the Syncwell server for both of its
//! persistence tiers: a fast cache and a durable storage.
//!
//! Stores hold a version and a JSON document per record name. They do not
//! enforce version ordering; that is the job of the server's record
//! transitions.
//!
//! ## Design Principles
//!
//! - Every call completes exactly once with a value or a [`StoreError`]
//! - Stores must be `Send + Sync`; the server shares them across tasks
//! - Timeouts are applied by the caller, never by the store
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For tests and single-process deployments. Supports
//!   fault injection (failures, hangs, latency) per operation.
//!
//! ## Example
//!
//! ```rust
//! use syncwell_storage::{InMemoryStore, RecordStore};
//! use serde_json::json;
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! runtime.block_on(async {
//!     let store = InMemoryStore::new();
//!     store.set("car/1", 3, json!({ "speed": 12 })).await.unwrap();
//!     let record = store.get("car/1").await.unwrap().unwrap();
//!     assert_eq!(record.version, 3);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod error;
mod memory;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::{Fault, InMemoryStore, StoreOp};
pub use store::{HeadBulk, RecordStore, StoredRecord};
