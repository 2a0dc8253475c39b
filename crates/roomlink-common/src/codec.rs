//! Wire codec for protocol messages.
//!
//! Frames are JSON documents produced from the serde model in [`crate::protocol`].

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CodecError, CodecResult};

/// Encode a signal request or data packet into a frame.
pub fn encode<T: Serialize>(message: &T) -> CodecResult<Vec<u8>> {
    serde_json::to_vec(message).map_err(CodecError::Encode)
}

/// Decode a frame received from the signal socket or a data channel.
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> CodecResult<T> {
    if frame.is_empty() {
        return Err(CodecError::Empty);
    }
    serde_json::from_slice(frame).map_err(CodecError::Decode)
}
