//! # Syncwell Server
//!
//! Realtime record synchronization with optimistic concurrency.
//!
//! This crate provides:
//! - Record transitions: per-record serialization of versioned writes
//! - Read-through retrieval over a cache tier and a storage tier
//! - Two-tier deletion
//! - Subscriptions and change broadcast, relayed to cluster peers
//! - Write acknowledgements
//! - A per-record barrier for work that must not overlap
//!
//! # Architecture
//!
//! The [`RecordHandler`] receives every record message. Reads are answered
//! from the cache, falling back to storage. Writes to a record are queued on
//! that record's transition, which loads the record once, applies the writes
//! one version at a time, and persists each new version before broadcasting
//! it to subscribers.
//!
//! Records matching a hot path prefix skip transitions entirely and are
//! written straight to both tiers.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use syncwell_server::{HandlerContext, RecordConfig, RecordHandler, RecordServices};
//! use syncwell_storage::InMemoryStore;
//!
//! let services = RecordServices::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(InMemoryStore::new()),
//! );
//! let context = HandlerContext::new(RecordConfig::default(), services);
//! let handler = RecordHandler::new(Arc::new(context));
//!
//! // For every message received on a connection:
//! handler.handle(Some(connection), message);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod deletion;
mod error;
mod handler;
mod request;
mod services;
mod stability;
mod stats;
mod subscription;
mod transition;

pub use config::RecordConfig;
pub use deletion::RecordDeletion;
pub use error::{
    DeletionError, PermissionError, RequestError, RequestResult, Tier, TransitionError,
};
pub use handler::{HandlerContext, RecordHandler};
pub use request::{RecordRequest, RecordSnapshot};
pub use services::{
    ClusterNode, Connection, ConnectionRef, OpenPermissions, PermissionService, RecordServices,
    SingleNode,
};
pub use stability::{RecordStability, StableCallback};
pub use stats::{HandlerStats, StatsSnapshot};
pub use subscription::{LocalSubscriptionRegistry, SubscriptionRegistry};
