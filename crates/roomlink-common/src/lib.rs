//! # roomlink-common
//!
//! Shared primitives for the roomlink crates: the room protocol message model and its
//! wire codec, the public connection state and failure reasons, configuration loading,
//! and the tracing bootstrap. No connection logic lives here.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod telemetry;

pub use connection::{ConnectionState, FailureReason};
pub use error::{CodecError, CodecResult};
