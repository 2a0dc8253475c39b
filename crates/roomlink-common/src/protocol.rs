//! Room protocol message model.
//!
//! Two families of messages travel between a client and the room server:
//!
//! - **Signal messages** ride the WebSocket control channel. The client sends
//!   [`SignalRequest`]s (offer/answer, trickle ICE, track announcements, leave, ping)
//!   and receives [`SignalResponse`]s (join, answer/offer, trickle, participant and
//!   room updates, leave, pong).
//! - **Data packets** ride the publisher/subscriber data channels: user payloads and
//!   the RPC request/ack/response triple.
//!
//! The types here carry no behaviour beyond small accessors; encoding lives in
//! [`crate::codec`].

use serde::{Deserialize, Serialize};

// === Signal requests (client → server) ===

/// Messages the client sends over the signal channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SignalRequest {
    /// Publisher SDP offer.
    Offer(SessionDescription),
    /// Subscriber SDP answer.
    Answer(SessionDescription),
    /// Local ICE candidate for one of the two peers.
    Trickle(TrickleRequest),
    /// Announce a local track before the publisher offer goes out.
    AddTrack(AddTrackRequest),
    /// Subscribe to (or drop) remote tracks.
    Subscription(UpdateSubscription),
    Leave(LeaveRequest),
    Ping(Ping),
}

/// SDP offer or answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Answer, sdp: sdp.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Which of the two peer connections a trickled candidate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalTarget {
    Publisher,
    Subscriber,
}

/// Trickle ICE message. Used in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrickleRequest {
    /// JSON-encoded `RTCIceCandidateInit` (`{"candidate": "...", "sdpMid": ...}`).
    pub candidate_init: String,
    pub target: SignalTarget,
    #[serde(default, rename = "final")]
    pub is_final: bool,
}

#[derive(Deserialize)]
struct CandidateInit {
    candidate: String,
}

impl TrickleRequest {
    /// Extract the raw candidate line from `candidate_init`.
    pub fn candidate(&self) -> Result<String, serde_json::Error> {
        let init: CandidateInit = serde_json::from_str(&self.candidate_init)?;
        Ok(init.candidate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    #[default]
    Unknown,
    Camera,
    Microphone,
    ScreenShare,
    ScreenShareAudio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    Low,
    Medium,
    High,
}

/// One simulcast layer of a published video track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoLayer {
    pub quality: VideoQuality,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupCodecPolicy {
    PreferRegression,
    Simulcast,
    Regression,
}

/// Track announcement sent before the publisher's first offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTrackRequest {
    /// Client-side track id, echoed back by the server.
    pub cid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TrackKind,
    pub source: TrackSource,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub stereo: bool,
    #[serde(default)]
    pub layers: Vec<VideoLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_codec_policy: Option<BackupCodecPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSubscription {
    pub track_sids: Vec<String>,
    pub subscribe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveAction {
    #[default]
    Disconnect,
    Resume,
    Reconnect,
}

/// Leave notice. Sent by the client on close, received when the server ends the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    #[serde(default)]
    pub can_reconnect: bool,
    #[serde(default)]
    pub reason: DisconnectReason,
    #[serde(default)]
    pub action: LeaveAction,
}

impl LeaveRequest {
    /// The leave a client sends when the user closes the connection.
    pub fn client_initiated() -> Self {
        Self {
            can_reconnect: false,
            reason: DisconnectReason::ClientInitiated,
            action: LeaveAction::Disconnect,
        }
    }
}

/// Keep-alive ping; `timestamp` is unix milliseconds, `rtt` the last measured round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub timestamp: i64,
    pub rtt: i64,
}

/// Protocol-level reason the server (or client) ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    #[default]
    UnknownReason,
    ClientInitiated,
    DuplicateIdentity,
    ServerShutdown,
    ParticipantRemoved,
    RoomDeleted,
    StateMismatch,
    JoinFailure,
    Migration,
    SignalClose,
    RoomClosed,
    UserUnavailable,
    UserRejected,
    SipTrunkFailure,
    ConnectionTimeout,
    MediaFailure,
}

// === Signal responses (server → client) ===

/// Messages the server sends over the signal channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SignalResponse {
    Join(Box<JoinResponse>),
    /// Answer to the publisher's offer.
    Answer(SessionDescription),
    /// Offer for the subscriber peer.
    Offer(SessionDescription),
    Trickle(TrickleRequest),
    Update(ParticipantUpdate),
    RoomUpdate(RoomUpdate),
    Leave(LeaveRequest),
    Pong(Pong),
}

impl SignalResponse {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Answer(_) => "answer",
            Self::Offer(_) => "offer",
            Self::Trickle(_) => "trickle",
            Self::Update(_) => "update",
            Self::RoomUpdate(_) => "room_update",
            Self::Leave(_) => "leave",
            Self::Pong(_) => "pong",
        }
    }
}

/// First response after the signal socket opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinResponse {
    #[serde(default)]
    pub room: Option<RoomInfo>,
    pub participant: ParticipantInfo,
    #[serde(default)]
    pub other_participants: Vec<ParticipantInfo>,
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
    /// When set, the subscriber peer's connection marks the session connected.
    #[serde(default)]
    pub subscriber_primary: bool,
    #[serde(default)]
    pub client_configuration: Option<ClientConfiguration>,
    /// Seconds between client pings.
    #[serde(default)]
    pub ping_interval: u32,
    /// Seconds without a pong before the server is considered gone.
    #[serde(default)]
    pub ping_timeout: u32,
    #[serde(default)]
    pub server_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientConfiguration {
    #[serde(default)]
    pub force_relay: bool,
}

/// ICE server configuration (STUN/TURN).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoomInfo {
    pub sid: String,
    pub name: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub num_participants: u32,
    #[serde(default)]
    pub num_publishers: u32,
    #[serde(default)]
    pub active_recording: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantState {
    #[default]
    Joining,
    Joined,
    Active,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub sid: String,
    pub identity: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub state: ParticipantState,
    #[serde(default)]
    pub tracks: Vec<TrackInfo>,
}

/// A track published by a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub sid: String,
    #[serde(rename = "type")]
    pub kind: TrackKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub source: TrackSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantUpdate {
    pub participants: Vec<ParticipantInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomUpdate {
    #[serde(default)]
    pub room: Option<RoomInfo>,
}

/// Reply to [`Ping`]; `last_ping_timestamp` echoes the ping's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub last_ping_timestamp: i64,
    pub timestamp: i64,
}

// === Data packets (data channels) ===

/// A packet carried on the reliable or lossy data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPacket {
    /// Identity of the sender. Filled in by the server for inbound packets.
    #[serde(default)]
    pub participant_identity: String,
    /// Recipients; empty means everyone in the room.
    #[serde(default)]
    pub destination_identities: Vec<String>,
    pub value: DataPacketValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DataPacketValue {
    User(UserPacket),
    RpcRequest(RpcRequest),
    RpcAck(RpcAck),
    RpcResponse(RpcResponse),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPacket {
    #[serde(default)]
    pub topic: Option<String>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub response_timeout_ms: u32,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcAck {
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub request_id: String,
    pub value: RpcResponseValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcResponseValue {
    Payload(String),
    Error(RpcErrorInfo),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorInfo {
    pub code: u32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<String>,
}
