//! # roomlink-peer
//!
//! One WebRTC-style peer connection per role. A room session always uses two:
//! the [`Publisher`] sends local media and data, the [`Subscriber`] receives.
//!
//! ICE, DTLS and SDP work is delegated to an [`RtcConnector`] implementation; this
//! crate adds what the room protocol needs on top:
//! - publisher is ICE-controlling, subscriber ICE-controlled,
//! - the publisher opens a reliable (ordered) and a lossy (unordered, no
//!   retransmits) data channel once the transport connects,
//! - a peer only reports [`PeerState::Connected`] once both channels are open,
//! - media frames can only be sent through a `Peer<Publisher>`.

pub mod error;
pub mod media;
pub mod peer;
pub mod rtc;

pub use error::{PeerError, PeerResult};
pub use peer::{
    DataSender, MediaSender, Peer, PeerListener, PeerOptions, PeerRole, PeerState, Publisher, Role,
    Subscriber,
};
pub use rtc::{DataChannelConfig, RtcConfig, RtcConnection, RtcConnector, RtcEvent, RtcState};
