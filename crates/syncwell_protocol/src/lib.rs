//! # Syncwell Protocol
//!
//! Record message types for Syncwell.
//!
//! This crate provides:
//! - [`Action`], the vocabulary of record requests, responses and errors
//! - [`RecordMessage`], the single message shape exchanged with connections,
//!   subscribers and cluster peers
//! - [`JsonPath`] for applying partial updates (patch / erase) to a document
//!
//! This is a pure protocol crate with no I/O operations. The wire encoding is
//! left to the transport; messages derive serde traits so any serde format
//! can carry them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod error;
mod json_path;
mod message;

pub use action::Action;
pub use error::{ProtocolError, ProtocolResult};
pub use json_path::{JsonPath, Segment, MAX_ARRAY_INDEX};
pub use message::{RecordMessage, Version, NO_VERSION};
