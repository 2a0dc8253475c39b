//! Publisher and subscriber peers.
//!
//! A [`Peer`] is typed by its role. Operations common to both roles live on
//! `Peer<R>`; media sending exists only on `Peer<Publisher>`:
//!
//! ```compile_fail
//! use roomlink_peer::{Peer, Subscriber};
//! use roomlink_peer::media::AudioFrame;
//!
//! fn send(peer: &Peer<Subscriber>, frame: &AudioFrame) {
//!     peer.send_audio_frame(frame);
//! }
//! ```
//!
//! Each peer runs a small driver task that turns [`RtcEvent`]s into peer state,
//! tracks which data channels are open, decodes inbound data packets and
//! forwards everything to the [`PeerListener`].

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use roomlink_common::codec;
use roomlink_common::protocol::{DataPacket, IceServer};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{PeerError, PeerResult};
use crate::media::{AudioFrame, AudioStreamInfo, MediaOptions, VideoFrame, VideoStreamInfo};
use crate::rtc::{
    DataChannelConfig, IceRole, IceTransportPolicy, MediaDirection, RtcConfig, RtcConnection,
    RtcConnector, RtcEvent, RtcState,
};

pub const RELIABLE_CHANNEL_LABEL: &str = "_reliable";
pub const LOSSY_CHANNEL_LABEL: &str = "_lossy";

const STREAM_ID_INVALID: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerRole {
    Publisher,
    Subscriber,
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Publisher => "publisher",
            Self::Subscriber => "subscriber",
        })
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Type-level peer role.
pub trait Role: sealed::Sealed + Send + Sync + 'static {
    const ROLE: PeerRole;
}

/// Sends local media and data. ICE-controlling.
#[derive(Debug)]
pub struct Publisher;

/// Receives remote media and data. ICE-controlled.
#[derive(Debug)]
pub struct Subscriber;

impl sealed::Sealed for Publisher {}
impl sealed::Sealed for Subscriber {}

impl Role for Publisher {
    const ROLE: PeerRole = PeerRole::Publisher;
}

impl Role for Subscriber {
    const ROLE: PeerRole = PeerRole::Subscriber;
}

/// Externally visible peer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Disconnected,
    Connecting,
    /// Transport up and both data channels open.
    Connected,
    Failed,
}

/// Receives what a peer surfaces. Media callbacks default to no-ops.
pub trait PeerListener: Send + Sync + 'static {
    fn on_state_changed(&self, state: PeerState, role: PeerRole);

    fn on_sdp(&self, sdp: String, role: PeerRole);

    fn on_data_packet(&self, packet: DataPacket, role: PeerRole);

    fn on_audio_info(&self, _info: AudioStreamInfo) {}

    fn on_audio_frame(&self, _frame: AudioFrame) {}

    fn on_video_info(&self, _info: VideoStreamInfo) {}

    fn on_video_frame(&self, _frame: VideoFrame) {}
}

/// Per-connection settings taken from the join response and the room options.
#[derive(Debug, Clone, Default)]
pub struct PeerOptions {
    pub ice_servers: Vec<IceServer>,
    pub force_relay: bool,
    pub media: MediaOptions,
}

struct Channels {
    reliable: AtomicU16,
    lossy: AtomicU16,
}

impl Channels {
    fn new() -> Self {
        Self {
            reliable: AtomicU16::new(STREAM_ID_INVALID),
            lossy: AtomicU16::new(STREAM_ID_INVALID),
        }
    }

    fn slot(&self, label: &str) -> Option<&AtomicU16> {
        match label {
            RELIABLE_CHANNEL_LABEL => Some(&self.reliable),
            LOSSY_CHANNEL_LABEL => Some(&self.lossy),
            _ => None,
        }
    }

    fn stream_id(&self, reliable: bool) -> Option<u16> {
        let slot = if reliable { &self.reliable } else { &self.lossy };
        match slot.load(Ordering::Acquire) {
            STREAM_ID_INVALID => None,
            id => Some(id),
        }
    }

    fn both_open(&self) -> bool {
        self.stream_id(true).is_some() && self.stream_id(false).is_some()
    }
}

struct Shared {
    role: PeerRole,
    connection: Arc<dyn RtcConnection>,
    channels: Channels,
}

impl Shared {
    fn send_data_packet(&self, packet: &DataPacket, reliable: bool) -> PeerResult<()> {
        let stream_id = self
            .channels
            .stream_id(reliable)
            .ok_or(PeerError::InvalidState("required data channel is not open"))?;
        let frame = codec::encode(packet)?;
        self.connection.send_data(stream_id, &frame).inspect_err(|e| {
            error!(role = %self.role, error = %e, "Data channel send failed");
        })
    }
}

/// One peer connection of role `R`. Dropping it disconnects the transport.
pub struct Peer<R: Role> {
    shared: Arc<Shared>,
    state: watch::Receiver<PeerState>,
    driver: JoinHandle<()>,
    _role: PhantomData<fn() -> R>,
}

impl<R: Role> Peer<R> {
    /// Build the connection in the RTC stack and start the driver. Does not connect.
    pub fn create(
        connector: &dyn RtcConnector,
        options: PeerOptions,
        listener: Arc<dyn PeerListener>,
    ) -> PeerResult<Self> {
        if options.ice_servers.is_empty() {
            return Err(PeerError::InvalidArgument("at least one ICE server is required".into()));
        }
        let role = R::ROLE;
        let config = RtcConfig {
            role,
            ice_servers: options.ice_servers,
            ice_role: match role {
                PeerRole::Publisher => IceRole::Controlling,
                PeerRole::Subscriber => IceRole::Controlled,
            },
            ice_transport_policy: if options.force_relay {
                IceTransportPolicy::Relay
            } else {
                IceTransportPolicy::All
            },
            direction: match role {
                PeerRole::Publisher => MediaDirection::SendOnly,
                PeerRole::Subscriber => MediaDirection::RecvOnly,
            },
            media: options.media,
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = connector.create(config, events_tx)?;
        let shared = Arc::new(Shared {
            role,
            connection,
            channels: Channels::new(),
        });
        let (state_tx, state_rx) = watch::channel(PeerState::Disconnected);
        let driver = tokio::spawn(drive(Arc::clone(&shared), state_tx, listener, events_rx));
        debug!(role = %role, "Peer created");

        Ok(Self {
            shared,
            state: state_rx,
            driver,
            _role: PhantomData,
        })
    }

    pub fn role(&self) -> PeerRole {
        R::ROLE
    }

    pub fn state(&self) -> PeerState {
        *self.state.borrow()
    }

    pub fn connect(&self) -> PeerResult<()> {
        self.shared.connection.connect()
    }

    pub fn disconnect(&self) {
        self.shared.connection.disconnect();
    }

    /// Apply a remote offer (subscriber) or answer (publisher).
    pub fn handle_sdp(&self, sdp: &str) -> PeerResult<()> {
        self.shared.connection.set_remote_sdp(sdp).inspect_err(|e| {
            error!(role = %self.role(), error = %e, "Failed to apply remote SDP");
        })
    }

    pub fn handle_ice_candidate(&self, candidate: &str) -> PeerResult<()> {
        self.shared.connection.add_remote_candidate(candidate).inspect_err(|e| {
            error!(role = %self.role(), error = %e, "Failed to add ICE candidate");
        })
    }

    /// Send on the reliable or the lossy data channel. Fails with `InvalidState`
    /// when that channel is not open; never retries.
    pub fn send_data_packet(&self, packet: &DataPacket, reliable: bool) -> PeerResult<()> {
        self.shared.send_data_packet(packet, reliable)
    }

    /// Cloneable handle for sending data packets from other tasks.
    pub fn data_sender(&self) -> DataSender {
        DataSender { shared: Arc::clone(&self.shared) }
    }
}

impl Peer<Publisher> {
    pub fn send_audio_frame(&self, frame: &AudioFrame) -> PeerResult<()> {
        self.shared.connection.send_audio(frame)
    }

    pub fn send_video_frame(&self, frame: &VideoFrame) -> PeerResult<()> {
        self.shared.connection.send_video(frame)
    }

    /// Cloneable handle for the media publish loop.
    pub fn media_sender(&self) -> MediaSender {
        MediaSender { shared: Arc::clone(&self.shared) }
    }
}

impl<R: Role> Drop for Peer<R> {
    fn drop(&mut self) {
        self.driver.abort();
        self.shared.connection.disconnect();
        debug!(role = %R::ROLE, "Peer destroyed");
    }
}

/// Sends data packets through a peer's data channels.
#[derive(Clone)]
pub struct DataSender {
    shared: Arc<Shared>,
}

impl DataSender {
    pub fn send(&self, packet: &DataPacket, reliable: bool) -> PeerResult<()> {
        self.shared.send_data_packet(packet, reliable)
    }
}

/// Sends media frames through the publisher. Only obtainable from a `Peer<Publisher>`.
#[derive(Clone)]
pub struct MediaSender {
    shared: Arc<Shared>,
}

impl MediaSender {
    pub fn send_audio(&self, frame: &AudioFrame) -> PeerResult<()> {
        self.shared.connection.send_audio(frame)
    }

    pub fn send_video(&self, frame: &VideoFrame) -> PeerResult<()> {
        self.shared.connection.send_video(frame)
    }
}

async fn drive(
    shared: Arc<Shared>,
    state_tx: watch::Sender<PeerState>,
    listener: Arc<dyn PeerListener>,
    mut events: mpsc::UnboundedReceiver<RtcEvent>,
) {
    let role = shared.role;
    let set_state = |state: PeerState| {
        let previous = state_tx.send_replace(state);
        if previous != state {
            info!(role = %role, from = ?previous, to = ?state, "Peer state changed");
            listener.on_state_changed(state, role);
        }
    };

    while let Some(event) = events.recv().await {
        match event {
            RtcEvent::StateChanged(rtc_state) => {
                debug!(role = %role, state = ?rtc_state, "RTC state changed");
                match rtc_state {
                    RtcState::Pairing => set_state(PeerState::Connecting),
                    RtcState::Failed => set_state(PeerState::Failed),
                    RtcState::Disconnected => set_state(PeerState::Disconnected),
                    RtcState::Connected if role == PeerRole::Publisher => {
                        create_data_channels(&shared);
                    }
                    RtcState::Connected | RtcState::New => {}
                }
            }
            RtcEvent::ChannelOpened { label, stream_id } => {
                info!(role = %role, label = %label, stream_id, "Data channel open");
                if let Some(slot) = shared.channels.slot(&label) {
                    slot.store(stream_id, Ordering::Release);
                }
                if shared.channels.both_open() {
                    set_state(PeerState::Connected);
                }
            }
            RtcEvent::ChannelClosed { label, stream_id } => {
                info!(role = %role, label = %label, stream_id, "Data channel closed");
                if let Some(slot) = shared.channels.slot(&label) {
                    slot.store(STREAM_ID_INVALID, Ordering::Release);
                }
            }
            RtcEvent::Data { stream_id, payload } => match codec::decode::<DataPacket>(&payload) {
                Ok(packet) => listener.on_data_packet(packet, role),
                Err(e) => {
                    warn!(role = %role, stream_id, error = %e, "Dropping undecodable data packet");
                }
            },
            RtcEvent::LocalSdp(sdp) => {
                debug!(role = %role, len = sdp.len(), "Local SDP generated");
                listener.on_sdp(sdp, role);
            }
            RtcEvent::AudioInfo(info) => listener.on_audio_info(info),
            RtcEvent::AudioFrame(frame) => listener.on_audio_frame(frame),
            RtcEvent::VideoInfo(info) => listener.on_video_info(info),
            RtcEvent::VideoFrame(frame) => listener.on_video_frame(frame),
        }
    }
}

fn create_data_channels(shared: &Shared) {
    let reliable = DataChannelConfig {
        label: RELIABLE_CHANNEL_LABEL.into(),
        ordered: true,
        max_retransmits: None,
    };
    if let Err(e) = shared.connection.create_data_channel(reliable) {
        error!(role = %shared.role, error = %e, "Failed to create reliable data channel");
    }

    let lossy = DataChannelConfig {
        label: LOSSY_CHANNEL_LABEL.into(),
        ordered: false,
        max_retransmits: Some(0),
    };
    if let Err(e) = shared.connection.create_data_channel(lossy) {
        error!(role = %shared.role, error = %e, "Failed to create lossy data channel");
    }
}
