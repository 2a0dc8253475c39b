use roomlink_common::CodecError;

/// Peer connection errors.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation needs something that is not there yet (e.g. an open data channel).
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Failed to encode packet: {0}")]
    Message(#[from] CodecError),

    /// The RTC stack refused or failed the operation.
    #[error("RTC error: {0}")]
    Rtc(String),
}

pub type PeerResult<T> = Result<T, PeerError>;
