//! # Syncwell Testkit
//!
//! Test utilities for Syncwell.
//!
//! This crate provides:
//! - A record handler wired to in-memory tiers ([`TestServer`])
//! - A recording client connection ([`TestConnection`])
//! - A recording cluster transport and scriptable permissions
//! - Property-based test generators using proptest
//! - Concurrent writer stress runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use syncwell_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn read_a_record() {
//!     let server = TestServer::new();
//!     server.seed("car/1", 3, json!({ "speed": 10 }));
//!
//!     let client = server.connect();
//!     server.send(&client, RecordMessage::new(Action::Read, "car/1"));
//!     let response = client.wait_for_action(Action::ReadResponse).await;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
pub mod fixtures;
pub mod generators;
pub mod services;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::connection::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::services::*;
    pub use crate::stress::*;
    pub use syncwell_protocol::{Action, RecordMessage, NO_VERSION};
    pub use syncwell_storage::{Fault, InMemoryStore, StoreOp};
}

pub use connection::*;
pub use fixtures::*;
pub use generators::*;
pub use services::*;
pub use stress::*;
