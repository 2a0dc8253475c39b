//! Media stream descriptions and encoded frames.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
    G711A,
    G711U,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    Mjpeg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioStreamInfo {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoStreamInfo {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub fps: u8,
}

/// Media a peer is set up for: what the publisher sends, or what the subscriber accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaOptions {
    pub audio: Option<AudioStreamInfo>,
    pub video: Option<VideoStreamInfo>,
}

/// One encoded audio frame. `pts` is in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub pts: u64,
    pub data: Vec<u8>,
}

/// One encoded video frame. `pts` is in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub pts: u64,
    pub data: Vec<u8>,
}
