//! Errors raised while turning protocol messages into bytes and back.

/// Wire codec failure.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Empty frame")]
    Empty,
}

/// Convenience alias for codec results.
pub type CodecResult<T> = Result<T, CodecError>;
