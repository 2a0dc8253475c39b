//! Application-facing room: an [`Engine`] plus RPC dispatch and a broadcast
//! of [`RoomEvent`]s.

use std::sync::Arc;

use roomlink_common::config::EngineConfig;
use roomlink_common::protocol::{DataPacket, DataPacketValue, ParticipantInfo, RoomInfo, UserPacket};
use roomlink_common::{ConnectionState, FailureReason};
use roomlink_peer::media::MediaOptions;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::engine::{DataPublisher, Engine, EngineDeps, EngineNotification, EngineOptions};
use crate::error::{EngineError, EngineResult, RpcError, RpcResult};
use crate::rpc::{RpcHandler, RpcManager, RpcTransport};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    StateChanged(ConnectionState),
    RoomInfo(RoomInfo),
    ParticipantInfo { info: ParticipantInfo, is_local: bool },
    DataReceived { sender_identity: String, topic: Option<String>, payload: Vec<u8> },
}

/// A user data packet to send to the room.
#[derive(Debug, Clone, Default)]
pub struct DataPublishOptions {
    pub payload: Vec<u8>,
    pub topic: Option<String>,
    /// Send on the lossy channel instead of the reliable one.
    pub lossy: bool,
    /// Recipient identities; empty sends to everyone.
    pub destination_identities: Vec<String>,
}

impl RpcTransport for DataPublisher {
    fn send_packet(&self, packet: DataPacket) -> RpcResult<()> {
        self.send(&packet, true).map_err(|e| RpcError::SendFailed(e.to_string()))
    }
}

pub struct Room {
    engine: Engine,
    rpc: Arc<RpcManager>,
    events: broadcast::Sender<RoomEvent>,
    router: JoinHandle<()>,
}

impl Room {
    /// Validate `options` and start the underlying engine. Must be called from
    /// within a Tokio runtime.
    pub fn new(
        config: EngineConfig,
        deps: EngineDeps,
        options: EngineOptions,
    ) -> EngineResult<Self> {
        validate_options(&options)?;
        let (engine, notifications) = Engine::new(config, deps, options);
        Ok(Self::from_engine(engine, notifications))
    }

    /// Wrap an already started engine.
    pub fn from_engine(
        engine: Engine,
        notifications: mpsc::UnboundedReceiver<EngineNotification>,
    ) -> Self {
        let rpc = Arc::new(RpcManager::new(Arc::new(engine.data_publisher())));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let router = tokio::spawn(route(notifications, Arc::clone(&rpc), events.clone()));
        Self { engine, rpc, events, router }
    }

    pub fn connect(&self, server_url: &str, token: &str) -> EngineResult<()> {
        self.engine.connect(server_url, token)
    }

    pub fn close(&self) -> EngineResult<()> {
        self.engine.close()
    }

    pub fn state(&self) -> ConnectionState {
        self.engine.state()
    }

    pub fn failure_reason(&self) -> FailureReason {
        self.engine.failure_reason()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    pub fn publish_data(&self, options: DataPublishOptions) -> EngineResult<()> {
        if options.payload.is_empty() {
            return Err(EngineError::InvalidArgument("payload must not be empty".into()));
        }
        let packet = DataPacket {
            participant_identity: String::new(),
            destination_identities: options.destination_identities,
            value: DataPacketValue::User(UserPacket {
                topic: options.topic,
                payload: options.payload,
            }),
        };
        self.engine.send_data_packet(&packet, !options.lossy)
    }

    pub async fn register_rpc(
        &self,
        method: impl Into<String>,
        handler: RpcHandler,
    ) -> RpcResult<()> {
        self.rpc.register(method, handler).await
    }

    pub async fn unregister_rpc(&self, method: &str) -> RpcResult<()> {
        self.rpc.unregister(method).await
    }

    pub async fn shutdown(self) {
        self.engine.shutdown().await;
        self.router.abort();
    }
}

fn validate_options(options: &EngineOptions) -> EngineResult<()> {
    let MediaOptions { audio, video } = options.publish;
    if (audio.is_some() || video.is_some()) && options.capture.is_none() {
        return Err(EngineError::InvalidArgument("publishing requires a capture sink".into()));
    }
    if let Some(audio) = audio {
        if audio.sample_rate == 0 || !(1..=2).contains(&audio.channels) {
            return Err(EngineError::InvalidArgument("invalid published audio format".into()));
        }
    }
    if let Some(video) = video {
        if video.width == 0 || video.height == 0 || video.fps == 0 {
            return Err(EngineError::InvalidArgument("invalid published video format".into()));
        }
    }

    let subscribing = options.subscribe.audio.is_some() || options.subscribe.video.is_some();
    if subscribing && options.renderer.is_none() {
        return Err(EngineError::InvalidArgument("subscribing requires a renderer".into()));
    }
    Ok(())
}

async fn route(
    mut notifications: mpsc::UnboundedReceiver<EngineNotification>,
    rpc: Arc<RpcManager>,
    events: broadcast::Sender<RoomEvent>,
) {
    while let Some(notification) = notifications.recv().await {
        let event = match notification {
            EngineNotification::StateChanged(state) => RoomEvent::StateChanged(state),
            EngineNotification::RoomInfo(info) => RoomEvent::RoomInfo(info),
            EngineNotification::ParticipantInfo { info, is_local } => {
                RoomEvent::ParticipantInfo { info, is_local }
            }
            EngineNotification::DataPacket(packet) => match packet.value {
                DataPacketValue::User(user) => RoomEvent::DataReceived {
                    sender_identity: packet.participant_identity,
                    topic: user.topic,
                    payload: user.payload,
                },
                _ => {
                    match rpc.handle_packet(&packet).await {
                        Ok(()) => {}
                        Err(RpcError::NotSupported) => {
                            tracing::debug!("Ignoring response to an outbound RPC")
                        }
                        Err(e) => tracing::warn!(error = %e, "Failed to handle RPC packet"),
                    }
                    continue;
                }
            },
        };
        // No subscribers is fine.
        let _ = events.send(event);
    }
}
