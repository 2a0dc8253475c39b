use roomlink_common::CodecError;

/// Signal channel errors.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Socket is closed")]
    Closed,

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type SignalResult<T> = Result<T, SignalError>;
