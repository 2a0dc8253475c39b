//! Seam between a peer and the RTC stack that does ICE, DTLS, SCTP and RTP.
//!
//! Stack implementations push [`RtcEvent`]s into the channel handed to
//! [`RtcConnector::create`] and never call back into the peer directly.

use std::sync::Arc;

use roomlink_common::protocol::IceServer;
use tokio::sync::mpsc;

use crate::error::PeerResult;
use crate::media::{AudioFrame, AudioStreamInfo, MediaOptions, VideoFrame, VideoStreamInfo};
use crate::peer::PeerRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceRole {
    Controlling,
    Controlled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceTransportPolicy {
    All,
    /// TURN relays only.
    Relay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaDirection {
    SendOnly,
    RecvOnly,
}

/// Everything the stack needs to build one connection.
#[derive(Debug, Clone)]
pub struct RtcConfig {
    pub role: PeerRole,
    pub ice_servers: Vec<IceServer>,
    pub ice_role: IceRole,
    pub ice_transport_policy: IceTransportPolicy,
    pub direction: MediaDirection,
    pub media: MediaOptions,
}

/// Data channel parameters. `max_retransmits: Some(0)` makes a lossy channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChannelConfig {
    pub label: String,
    pub ordered: bool,
    pub max_retransmits: Option<u16>,
}

/// Transport-level connection state reported by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcState {
    New,
    /// ICE candidate pairing has started.
    Pairing,
    /// ICE and DTLS are up; data channels may be created.
    Connected,
    Failed,
    Disconnected,
}

/// Everything the stack reports upward.
#[derive(Debug, Clone, PartialEq)]
pub enum RtcEvent {
    StateChanged(RtcState),
    /// Locally generated SDP (offer for the publisher, answer for the subscriber).
    LocalSdp(String),
    ChannelOpened { label: String, stream_id: u16 },
    ChannelClosed { label: String, stream_id: u16 },
    Data { stream_id: u16, payload: Vec<u8> },
    AudioInfo(AudioStreamInfo),
    AudioFrame(AudioFrame),
    VideoInfo(VideoStreamInfo),
    VideoFrame(VideoFrame),
}

/// A live connection inside the stack. Methods are non-blocking.
pub trait RtcConnection: Send + Sync {
    /// Start ICE gathering / negotiation.
    fn connect(&self) -> PeerResult<()>;

    fn disconnect(&self);

    fn set_remote_sdp(&self, sdp: &str) -> PeerResult<()>;

    fn add_remote_candidate(&self, candidate: &str) -> PeerResult<()>;

    fn create_data_channel(&self, config: DataChannelConfig) -> PeerResult<()>;

    fn send_data(&self, stream_id: u16, payload: &[u8]) -> PeerResult<()>;

    fn send_audio(&self, frame: &AudioFrame) -> PeerResult<()>;

    fn send_video(&self, frame: &VideoFrame) -> PeerResult<()>;
}

/// Builds connections. Must be called from within a Tokio runtime.
pub trait RtcConnector: Send + Sync + 'static {
    fn create(
        &self,
        config: RtcConfig,
        events: mpsc::UnboundedSender<RtcEvent>,
    ) -> PeerResult<Arc<dyn RtcConnection>>;
}
