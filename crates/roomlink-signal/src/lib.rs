//! # roomlink-signal
//!
//! The control-plane connection to the room server.
//!
//! A [`SignalClient`] owns one socket for one connection attempt. It:
//! - opens the socket through a [`SignalConnector`] (the WebSocket one lives in [`ws`]),
//! - decodes inbound frames into [`SignalResponse`](roomlink_common::protocol::SignalResponse)s,
//! - runs the ping-interval / ping-timeout keep-alive once the server's join arrives,
//! - reports state changes and responses to a [`SignalListener`].
//!
//! Pongs are consumed here and never reach the listener.

pub mod client;
pub mod endpoint;
pub mod error;
pub mod socket;
pub mod ws;

pub use client::{SignalClient, SignalFailure, SignalListener, SignalState};
pub use error::{SignalError, SignalResult};
pub use socket::{SignalConnector, SignalSocket, SocketEvent};
pub use ws::WsConnector;
