//! Capture and render seams, and the publish loop that drains capture into
//! the publisher peer while the engine is connected.

use std::sync::Arc;
use std::time::Duration;

use roomlink_peer::media::{AudioFrame, AudioStreamInfo, MediaOptions, VideoFrame, VideoStreamInfo};
use roomlink_peer::{MediaSender, PeerResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::EngineResult;

/// Source of encoded local media. `acquire_*` must not block; `None` means
/// nothing is ready yet.
pub trait CaptureSink: Send + Sync + 'static {
    fn start(&self, media: MediaOptions) -> EngineResult<()>;

    fn stop(&self);

    fn acquire_audio(&self) -> Option<AudioFrame>;

    fn acquire_video(&self) -> Option<VideoFrame>;

    /// Hand a frame back once it has been sent.
    fn release_audio(&self, _frame: AudioFrame) {}

    fn release_video(&self, _frame: VideoFrame) {}
}

/// Sink for remote media received on the subscriber peer.
pub trait Renderer: Send + Sync + 'static {
    fn on_audio_info(&self, info: AudioStreamInfo);

    fn on_audio_frame(&self, frame: AudioFrame);

    fn on_video_info(&self, _info: VideoStreamInfo) {}

    fn on_video_frame(&self, _frame: VideoFrame) {}
}

/// Where the publish loop sends frames.
pub(crate) trait MediaOutput: Send + Sync + 'static {
    fn send_audio(&self, frame: &AudioFrame) -> PeerResult<()>;

    fn send_video(&self, frame: &VideoFrame) -> PeerResult<()>;
}

impl MediaOutput for MediaSender {
    fn send_audio(&self, frame: &AudioFrame) -> PeerResult<()> {
        MediaSender::send_audio(self, frame)
    }

    fn send_video(&self, frame: &VideoFrame) -> PeerResult<()> {
        MediaSender::send_video(self, frame)
    }
}

/// Running publish loop. Dropping it stops the loop.
pub(crate) struct MediaLoop {
    cancel: CancellationToken,
}

impl MediaLoop {
    pub(crate) fn start(
        output: impl MediaOutput,
        capture: Arc<dyn CaptureSink>,
        media: MediaOptions,
        interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        tokio::spawn(publish(output, capture, media, interval, cancel.clone()));
        Self { cancel }
    }
}

impl Drop for MediaLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn publish(
    output: impl MediaOutput,
    capture: Arc<dyn CaptureSink>,
    media: MediaOptions,
    interval: Duration,
    cancel: CancellationToken,
) {
    if let Err(e) = capture.start(media) {
        error!(error = %e, "Failed to start capture, not publishing");
        return;
    }
    info!(audio = media.audio.is_some(), video = media.video.is_some(), "Media publishing started");

    loop {
        if media.audio.is_some() {
            while let Some(frame) = capture.acquire_audio() {
                if let Err(e) = output.send_audio(&frame) {
                    debug!(error = %e, pts = frame.pts, "Audio frame not sent");
                }
                capture.release_audio(frame);
            }
        }
        if media.video.is_some() {
            if let Some(frame) = capture.acquire_video() {
                if let Err(e) = output.send_video(&frame) {
                    debug!(error = %e, pts = frame.pts, "Video frame not sent");
                }
                capture.release_video(frame);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    capture.stop();
    info!("Media publishing stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomlink_peer::PeerError;
    use roomlink_peer::media::{AudioCodec, VideoCodec};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture {
        audio: Mutex<VecDeque<AudioFrame>>,
        video: Mutex<VecDeque<VideoFrame>>,
        released: Mutex<usize>,
        running: Mutex<Option<bool>>,
    }

    impl CaptureSink for Capture {
        fn start(&self, _media: MediaOptions) -> EngineResult<()> {
            *self.running.lock().unwrap() = Some(true);
            Ok(())
        }

        fn stop(&self) {
            *self.running.lock().unwrap() = Some(false);
        }

        fn acquire_audio(&self) -> Option<AudioFrame> {
            self.audio.lock().unwrap().pop_front()
        }

        fn acquire_video(&self) -> Option<VideoFrame> {
            self.video.lock().unwrap().pop_front()
        }

        fn release_audio(&self, _frame: AudioFrame) {
            *self.released.lock().unwrap() += 1;
        }

        fn release_video(&self, _frame: VideoFrame) {
            *self.released.lock().unwrap() += 1;
        }
    }

    #[derive(Clone, Default)]
    struct Output {
        audio: Arc<Mutex<Vec<u64>>>,
        video: Arc<Mutex<Vec<u64>>>,
    }

    impl MediaOutput for Output {
        fn send_audio(&self, frame: &AudioFrame) -> PeerResult<()> {
            self.audio.lock().unwrap().push(frame.pts);
            Ok(())
        }

        fn send_video(&self, frame: &VideoFrame) -> PeerResult<()> {
            if frame.data.is_empty() {
                return Err(PeerError::Rtc("empty frame".into()));
            }
            self.video.lock().unwrap().push(frame.pts);
            Ok(())
        }
    }

    fn media() -> MediaOptions {
        MediaOptions {
            audio: Some(AudioStreamInfo {
                codec: AudioCodec::Opus,
                sample_rate: 48_000,
                channels: 1,
            }),
            video: Some(VideoStreamInfo {
                codec: VideoCodec::H264,
                width: 640,
                height: 480,
                fps: 15,
            }),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drains_audio_and_paces_video() {
        let capture = Arc::new(Capture::default());
        let audio = (0..3).map(|n| AudioFrame { pts: n * 20, data: vec![1] });
        capture.audio.lock().unwrap().extend(audio);
        let video = (0..3).map(|n| VideoFrame { pts: n * 66, data: vec![2] });
        capture.video.lock().unwrap().extend(video);
        let output = Output::default();

        let publishing =
            MediaLoop::start(output.clone(), capture.clone(), media(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(1)).await;

        // One pass: every queued audio frame, a single video frame.
        assert_eq!(*output.audio.lock().unwrap(), vec![0, 20, 40]);
        assert_eq!(*output.video.lock().unwrap(), vec![0]);
        assert_eq!(*capture.running.lock().unwrap(), Some(true));

        tokio::time::sleep(Duration::from_millis(45)).await;
        assert_eq!(*output.video.lock().unwrap(), vec![0, 66, 132]);
        assert_eq!(*capture.released.lock().unwrap(), 6);

        drop(publishing);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(*capture.running.lock().unwrap(), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn send_failures_still_release_frames() {
        let capture = Arc::new(Capture::default());
        capture.video.lock().unwrap().push_back(VideoFrame { pts: 0, data: vec![] });
        let output = Output::default();

        let _publishing = MediaLoop::start(
            output.clone(),
            capture.clone(),
            MediaOptions { audio: None, ..media() },
            Duration::from_millis(20),
        );
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(output.video.lock().unwrap().is_empty());
        assert_eq!(*capture.released.lock().unwrap(), 1);
    }
}
