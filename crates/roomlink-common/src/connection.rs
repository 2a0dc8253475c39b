//! Public connection state and failure reasons.

use std::fmt;

use serde::Serialize;

use crate::protocol::DisconnectReason;

/// Coarse connection state reported to applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// A retry cycle is under way after a retryable failure.
    Reconnecting,
    /// Disconnected with a recorded [`FailureReason`].
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known cause of a disconnect or failure. Only the most recent one is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    #[default]
    None,
    /// The signal server could not be reached.
    Unreachable,
    /// Server rejected the token as malformed (HTTP 400).
    BadToken,
    /// Server rejected the token (HTTP 401).
    Unauthorized,
    /// A peer connection failed or dropped.
    Rtc,
    MaxRetries,
    /// The signal server stopped answering pings.
    PingTimeout,
    DuplicateIdentity,
    ServerShutdown,
    ParticipantRemoved,
    RoomDeleted,
    StateMismatch,
    JoinIncomplete,
    Migration,
    SignalClose,
    RoomClosed,
    SipUserUnavailable,
    SipUserRejected,
    SipTrunkFailure,
    ConnectionTimeout,
    MediaFailure,
    Other,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Unreachable => "Unreachable",
            Self::BadToken => "Bad Token",
            Self::Unauthorized => "Unauthorized",
            Self::Rtc => "RTC",
            Self::MaxRetries => "Max Retries",
            Self::PingTimeout => "Ping Timeout",
            Self::DuplicateIdentity => "Duplicate Identity",
            Self::ServerShutdown => "Server Shutdown",
            Self::ParticipantRemoved => "Participant Removed",
            Self::RoomDeleted => "Room Deleted",
            Self::StateMismatch => "State Mismatch",
            Self::JoinIncomplete => "Join Incomplete",
            Self::Migration => "Migration",
            Self::SignalClose => "Signal Close",
            Self::RoomClosed => "Room Closed",
            Self::SipUserUnavailable => "SIP User Unavailable",
            Self::SipUserRejected => "SIP User Rejected",
            Self::SipTrunkFailure => "SIP Trunk Failure",
            Self::ConnectionTimeout => "Connection Timeout",
            Self::MediaFailure => "Media Failure",
            Self::Other => "Other",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<DisconnectReason> for FailureReason {
    fn from(reason: DisconnectReason) -> Self {
        match reason {
            DisconnectReason::ClientInitiated => Self::None,
            DisconnectReason::DuplicateIdentity => Self::DuplicateIdentity,
            DisconnectReason::ServerShutdown => Self::ServerShutdown,
            DisconnectReason::ParticipantRemoved => Self::ParticipantRemoved,
            DisconnectReason::RoomDeleted => Self::RoomDeleted,
            DisconnectReason::StateMismatch => Self::StateMismatch,
            DisconnectReason::JoinFailure => Self::JoinIncomplete,
            DisconnectReason::Migration => Self::Migration,
            DisconnectReason::SignalClose => Self::SignalClose,
            DisconnectReason::RoomClosed => Self::RoomClosed,
            DisconnectReason::UserUnavailable => Self::SipUserUnavailable,
            DisconnectReason::UserRejected => Self::SipUserRejected,
            DisconnectReason::SipTrunkFailure => Self::SipTrunkFailure,
            DisconnectReason::ConnectionTimeout => Self::ConnectionTimeout,
            DisconnectReason::MediaFailure => Self::MediaFailure,
            DisconnectReason::UnknownReason => Self::Other,
        }
    }
}
