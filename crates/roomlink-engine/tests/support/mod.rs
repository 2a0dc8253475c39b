//! In-memory signal socket and RTC stack for driving the engine end to end.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use roomlink_common::codec;
use roomlink_common::config::EngineConfig;
use roomlink_common::protocol::{
    IceServer, JoinResponse, ParticipantInfo, RoomInfo, SignalRequest, SignalResponse, TrackInfo,
    TrackKind, TrackSource,
};
use roomlink_engine::{
    CaptureSink, Engine, EngineDeps, EngineNotification, EngineOptions, EngineResult, EngineStatus,
};
use roomlink_peer::media::{AudioCodec, AudioFrame, AudioStreamInfo, MediaOptions, VideoFrame};
use roomlink_peer::rtc::{
    DataChannelConfig, RtcConfig, RtcConnection, RtcConnector, RtcEvent, RtcState,
};
use roomlink_peer::{PeerError, PeerResult, PeerRole};
use roomlink_signal::{SignalConnector, SignalResult, SignalSocket, SocketEvent};
use tokio::sync::{mpsc, watch};
use url::Url;

// === Signal ===

#[derive(Clone)]
pub struct SocketHandle {
    pub url: Url,
    pub token: String,
    events: mpsc::UnboundedSender<SocketEvent>,
    sent: Arc<Mutex<Vec<SignalRequest>>>,
    closed: Arc<AtomicBool>,
}

impl SocketHandle {
    pub fn open(&self) {
        let _ = self.events.send(SocketEvent::Connected);
    }

    pub fn respond(&self, response: SignalResponse) {
        let frame = codec::encode(&response).unwrap();
        let _ = self.events.send(SocketEvent::Frame(frame));
    }

    pub fn fail(&self, http_status: Option<u16>) {
        let _ = self.events.send(SocketEvent::Error { http_status });
    }

    pub fn drop_connection(&self) {
        let _ = self.events.send(SocketEvent::Closed);
    }

    pub fn sent(&self) -> Vec<SignalRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeSocket {
    sent: Arc<Mutex<Vec<SignalRequest>>>,
    closed: Arc<AtomicBool>,
}

impl SignalSocket for FakeSocket {
    fn send(&self, frame: Vec<u8>) -> SignalResult<()> {
        let request: SignalRequest = codec::decode(&frame)?;
        self.sent.lock().unwrap().push(request);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct FakeSignal {
    sockets: Arc<Mutex<Vec<SocketHandle>>>,
}

impl FakeSignal {
    pub fn count(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    pub fn socket(&self, index: usize) -> SocketHandle {
        self.sockets.lock().unwrap()[index].clone()
    }

    pub fn last(&self) -> SocketHandle {
        self.sockets.lock().unwrap().last().cloned().expect("no socket opened")
    }

    /// Wait (in virtual time) until `count` sockets have been opened.
    pub async fn wait_for(&self, count: usize) -> SocketHandle {
        for _ in 0..1_000 {
            if self.count() >= count {
                return self.socket(count - 1);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("only {} of {count} sockets opened", self.count());
    }
}

impl SignalConnector for FakeSignal {
    fn open(
        &self,
        url: &Url,
        token: &str,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> SignalResult<Arc<dyn SignalSocket>> {
        let handle = SocketHandle {
            url: url.clone(),
            token: token.to_owned(),
            events,
            sent: Arc::default(),
            closed: Arc::default(),
        };
        let socket = FakeSocket { sent: handle.sent.clone(), closed: handle.closed.clone() };
        self.sockets.lock().unwrap().push(handle);
        Ok(Arc::new(socket))
    }
}

// === RTC ===

#[derive(Debug, Default)]
pub struct PeerLog {
    pub connected: bool,
    pub disconnected: bool,
    pub remote_sdp: Vec<String>,
    pub candidates: Vec<String>,
    pub channels: Vec<DataChannelConfig>,
    pub data: Vec<(u16, Vec<u8>)>,
    pub audio_frames: usize,
    pub video_frames: usize,
}

#[derive(Clone)]
pub struct PeerHandle {
    pub config: RtcConfig,
    events: mpsc::UnboundedSender<RtcEvent>,
    log: Arc<Mutex<PeerLog>>,
}

impl PeerHandle {
    pub fn emit(&self, event: RtcEvent) {
        let _ = self.events.send(event);
    }

    /// Pairing, transport up, then both data channels open.
    pub fn bring_up(&self) {
        self.emit(RtcEvent::StateChanged(RtcState::Pairing));
        self.emit(RtcEvent::StateChanged(RtcState::Connected));
        self.emit(RtcEvent::ChannelOpened { label: "_reliable".into(), stream_id: 0 });
        self.emit(RtcEvent::ChannelOpened { label: "_lossy".into(), stream_id: 1 });
    }

    pub fn log<T>(&self, f: impl FnOnce(&PeerLog) -> T) -> T {
        f(&self.log.lock().unwrap())
    }

    pub fn sent_packets(&self) -> Vec<(u16, roomlink_common::protocol::DataPacket)> {
        self.log(|log| {
            log.data
                .iter()
                .map(|(id, bytes)| (*id, codec::decode(bytes).unwrap()))
                .collect()
        })
    }
}

struct FakeConnection {
    log: Arc<Mutex<PeerLog>>,
}

impl RtcConnection for FakeConnection {
    fn connect(&self) -> PeerResult<()> {
        self.log.lock().unwrap().connected = true;
        Ok(())
    }

    fn disconnect(&self) {
        self.log.lock().unwrap().disconnected = true;
    }

    fn set_remote_sdp(&self, sdp: &str) -> PeerResult<()> {
        self.log.lock().unwrap().remote_sdp.push(sdp.to_owned());
        Ok(())
    }

    fn add_remote_candidate(&self, candidate: &str) -> PeerResult<()> {
        self.log.lock().unwrap().candidates.push(candidate.to_owned());
        Ok(())
    }

    fn create_data_channel(&self, config: DataChannelConfig) -> PeerResult<()> {
        self.log.lock().unwrap().channels.push(config);
        Ok(())
    }

    fn send_data(&self, stream_id: u16, payload: &[u8]) -> PeerResult<()> {
        self.log.lock().unwrap().data.push((stream_id, payload.to_vec()));
        Ok(())
    }

    fn send_audio(&self, _frame: &AudioFrame) -> PeerResult<()> {
        self.log.lock().unwrap().audio_frames += 1;
        Ok(())
    }

    fn send_video(&self, _frame: &VideoFrame) -> PeerResult<()> {
        self.log.lock().unwrap().video_frames += 1;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeRtc {
    peers: Arc<Mutex<Vec<PeerHandle>>>,
    refuse: Arc<AtomicBool>,
}

impl FakeRtc {
    /// Make every following `create` fail until turned off again.
    pub fn refuse_creates(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    /// Most recently created peer of `role`.
    pub fn peer(&self, role: PeerRole) -> PeerHandle {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|p| p.config.role == role)
            .cloned()
            .expect("no peer with that role")
    }
}

impl RtcConnector for FakeRtc {
    fn create(
        &self,
        config: RtcConfig,
        events: mpsc::UnboundedSender<RtcEvent>,
    ) -> PeerResult<Arc<dyn RtcConnection>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(PeerError::Rtc("no media engine".into()));
        }
        let log = Arc::new(Mutex::new(PeerLog::default()));
        self.peers.lock().unwrap().push(PeerHandle { config, events, log: log.clone() });
        Ok(Arc::new(FakeConnection { log }))
    }
}

// === Capture ===

#[derive(Default)]
pub struct FakeCapture {
    pub audio: Mutex<VecDeque<AudioFrame>>,
    pub started: AtomicBool,
    pub stopped: AtomicBool,
}

impl CaptureSink for FakeCapture {
    fn start(&self, _media: MediaOptions) -> EngineResult<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn acquire_audio(&self) -> Option<AudioFrame> {
        self.audio.lock().unwrap().pop_front()
    }

    fn acquire_video(&self) -> Option<VideoFrame> {
        None
    }
}

// === Harness ===

pub struct Harness {
    pub engine: Engine,
    pub notifications: mpsc::UnboundedReceiver<EngineNotification>,
    pub status: watch::Receiver<EngineStatus>,
    pub signal: FakeSignal,
    pub rtc: FakeRtc,
    pub capture: Arc<FakeCapture>,
}

pub fn config() -> EngineConfig {
    EngineConfig { max_retries: 3, ..EngineConfig::default() }
}

pub fn opus() -> AudioStreamInfo {
    AudioStreamInfo { codec: AudioCodec::Opus, sample_rate: 48_000, channels: 1 }
}

impl Harness {
    /// Engine publishing mono Opus from a fake capture sink.
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let signal = FakeSignal::default();
        let rtc = FakeRtc::default();
        let capture = Arc::new(FakeCapture::default());
        capture
            .audio
            .lock()
            .unwrap()
            .extend((0..4).map(|n| AudioFrame { pts: n * 20, data: vec![0xF8, 0xFF] }));

        let deps = EngineDeps { signal: Arc::new(signal.clone()), rtc: Arc::new(rtc.clone()) };
        let options = EngineOptions {
            publish: MediaOptions { audio: Some(opus()), video: None },
            capture: Some(capture.clone()),
            ..Default::default()
        };
        let (engine, notifications) =
            Engine::with_rng(config, deps, options, StdRng::seed_from_u64(7));
        let status = engine.watch_status();
        Self { engine, notifications, status, signal, rtc, capture }
    }

    pub async fn wait_until(
        &mut self,
        what: &str,
        f: impl FnMut(&EngineStatus) -> bool,
    ) -> EngineStatus {
        match tokio::time::timeout(Duration::from_secs(60), self.status.wait_for(f)).await {
            Ok(Ok(status)) => status.clone(),
            _ => panic!("timed out waiting for {what}; status: {:?}", self.engine.status()),
        }
    }

    pub fn drain_notifications(&mut self) -> Vec<EngineNotification> {
        let mut seen = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            seen.push(n);
        }
        seen
    }

    /// Connect through to `Connected` with a publisher-primary join.
    pub async fn connect_fully(&mut self) -> (SocketHandle, PeerHandle, PeerHandle) {
        self.engine.connect("wss://x", "tok").unwrap();
        let socket = self.signal.wait_for(self.signal.count() + 1).await;
        socket.open();
        socket.respond(SignalResponse::Join(Box::new(join(false, vec![]))));
        settle().await;
        let publisher = self.rtc.peer(PeerRole::Publisher);
        let subscriber = self.rtc.peer(PeerRole::Subscriber);
        publisher.bring_up();
        self.wait_until("connected", |s| s.state == roomlink_engine::EngineState::Connected).await;
        (socket, publisher, subscriber)
    }
}

/// Let every runnable task make progress.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn stun() -> IceServer {
    IceServer { urls: vec!["stun:stun.example.com:3478".into()], username: None, credential: None }
}

pub fn participant(sid: &str, identity: &str, audio_tracks: &[&str]) -> ParticipantInfo {
    ParticipantInfo {
        sid: sid.into(),
        identity: identity.into(),
        tracks: audio_tracks
            .iter()
            .map(|sid| TrackInfo {
                sid: (*sid).into(),
                kind: TrackKind::Audio,
                name: "mic".into(),
                muted: false,
                source: TrackSource::Microphone,
            })
            .collect(),
        ..Default::default()
    }
}

pub fn join(subscriber_primary: bool, others: Vec<ParticipantInfo>) -> JoinResponse {
    JoinResponse {
        room: Some(RoomInfo { sid: "RM_1".into(), name: "lobby".into(), ..Default::default() }),
        participant: participant("PA_local", "device", &[]),
        other_participants: others,
        ice_servers: vec![stun()],
        subscriber_primary,
        client_configuration: None,
        // Long enough that keep-alive never fires during a test.
        ping_interval: 3_600,
        ping_timeout: 7_200,
        server_version: "1.8.0".into(),
    }
}
