//! # roomlink-engine
//!
//! The connection engine that keeps a device in a media room: a single-worker
//! state machine over an event queue, reconnecting with exponential backoff,
//! plus the media publish loop, inbound RPC and the [`Room`] facade.
//!
//! States: `Disconnected → Connecting → Connected`, with `Backoff` between
//! retries. A bad token or other client-side failure ends in `Disconnected`;
//! transport and RTC failures go through `Backoff` until `max_retries`.

pub mod backoff;
pub mod engine;
pub mod error;
mod event;
pub mod media;
pub mod queue;
pub mod room;
pub mod rpc;

pub use engine::{
    DataPublisher, Engine, EngineDeps, EngineNotification, EngineOptions, EngineState, EngineStatus,
};
pub use error::{EngineError, EngineResult, RpcError, RpcResult};
pub use media::{CaptureSink, Renderer};
pub use room::{DataPublishOptions, Room, RoomEvent};
pub use rpc::{RpcHandler, RpcInvocation, RpcManager, RpcReply};
