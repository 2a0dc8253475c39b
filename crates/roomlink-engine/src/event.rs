//! Everything the engine worker reacts to.
//!
//! Collaborator events carry the `epoch` of the connection attempt that
//! produced them, so the worker can drop what a torn-down attempt left behind.

use roomlink_common::protocol::SignalResponse;
use roomlink_peer::{PeerRole, PeerState};
use roomlink_signal::SignalState;

use crate::queue::Priority;

#[derive(Debug)]
pub(crate) enum Event {
    Connect { url: String, token: String },
    Close,
    SignalState { epoch: u64, state: SignalState },
    SignalResponse { epoch: u64, response: SignalResponse },
    PeerState { epoch: u64, state: PeerState, role: PeerRole },
    PeerSdp { epoch: u64, sdp: String, role: PeerRole },
    /// The retry timer armed for `attempt` fired.
    RetryTimerExpired { attempt: u16 },
    MaxRetriesReached,
}

impl Event {
    /// State changes, timers, leave notices and user commands jump the queue.
    pub(crate) fn priority(&self) -> Priority {
        match self {
            Self::SignalResponse { response: SignalResponse::Leave(_), .. } => Priority::Urgent,
            Self::SignalResponse { .. } | Self::PeerSdp { .. } => Priority::Normal,
            Self::Connect { .. }
            | Self::Close
            | Self::SignalState { .. }
            | Self::PeerState { .. }
            | Self::RetryTimerExpired { .. }
            | Self::MaxRetriesReached => Priority::Urgent,
        }
    }

    pub(crate) fn epoch(&self) -> Option<u64> {
        match self {
            Self::SignalState { epoch, .. }
            | Self::SignalResponse { epoch, .. }
            | Self::PeerState { epoch, .. }
            | Self::PeerSdp { epoch, .. } => Some(*epoch),
            Self::Connect { .. }
            | Self::Close
            | Self::RetryTimerExpired { .. }
            | Self::MaxRetriesReached => None,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Close => "close",
            Self::SignalState { .. } => "signal_state",
            Self::SignalResponse { response, .. } => response.name(),
            Self::PeerState { .. } => "peer_state",
            Self::PeerSdp { .. } => "peer_sdp",
            Self::RetryTimerExpired { .. } => "retry_timer_expired",
            Self::MaxRetriesReached => "max_retries_reached",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomlink_common::protocol::{LeaveRequest, SessionDescription};

    #[test]
    fn leave_is_the_only_urgent_response() {
        let leave = Event::SignalResponse {
            epoch: 1,
            response: SignalResponse::Leave(LeaveRequest::client_initiated()),
        };
        let answer = Event::SignalResponse {
            epoch: 1,
            response: SignalResponse::Answer(SessionDescription::answer("v=0")),
        };
        assert_eq!(leave.priority(), Priority::Urgent);
        assert_eq!(answer.priority(), Priority::Normal);
    }

    #[test]
    fn sdp_queues_behind_state_changes() {
        let sdp = Event::PeerSdp { epoch: 3, sdp: "v=0".into(), role: PeerRole::Publisher };
        let state =
            Event::PeerState { epoch: 3, state: PeerState::Failed, role: PeerRole::Publisher };
        assert_eq!(sdp.priority(), Priority::Normal);
        assert_eq!(state.priority(), Priority::Urgent);
        assert_eq!(sdp.epoch(), Some(3));
        assert_eq!(Event::Close.epoch(), None);
    }
}
