//! Inbound RPC: method registry and request dispatch.
//!
//! A request is acknowledged as soon as it passes validation, then answered
//! with either an error (unsupported version or method) or whatever the
//! registered handler sends through its [`RpcInvocation`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use roomlink_common::protocol::{
    DataPacket, DataPacketValue, RpcAck, RpcErrorInfo, RpcRequest, RpcResponse, RpcResponseValue,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{RpcError, RpcResult};

/// Built-in result codes.
pub mod code {
    pub const OK: u32 = 0;
    pub const APPLICATION: u32 = 1500;
    pub const CONNECTION_TIMEOUT: u32 = 1501;
    pub const RESPONSE_TIMEOUT: u32 = 1502;
    pub const RECIPIENT_DISCONNECTED: u32 = 1503;
    pub const RESPONSE_PAYLOAD_TOO_LARGE: u32 = 1504;
    pub const SEND_FAILED: u32 = 1505;
    pub const UNSUPPORTED_METHOD: u32 = 1400;
    pub const RECIPIENT_NOT_FOUND: u32 = 1401;
    pub const REQUEST_PAYLOAD_TOO_LARGE: u32 = 1402;
    pub const UNSUPPORTED_SERVER: u32 = 1403;
    pub const UNSUPPORTED_VERSION: u32 = 1404;
}

/// Largest result payload, in bytes, that may be sent back (exclusive).
pub const MAX_PAYLOAD_BYTES: usize = 15_360;

const PROTOCOL_VERSION: u32 = 1;

/// Sends RPC packets to the room.
pub trait RpcTransport: Send + Sync + 'static {
    fn send_packet(&self, packet: DataPacket) -> RpcResult<()>;
}

/// Handles one invocation. Runs on the dispatching task; answer through
/// [`RpcInvocation::send_result`] before returning or from a spawned task.
pub type RpcHandler = Arc<dyn Fn(RpcInvocation) + Send + Sync>;

/// What a handler sends back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcReply {
    pub code: u32,
    pub payload: Option<String>,
    pub error_message: Option<String>,
}

impl RpcReply {
    pub fn ok(payload: impl Into<String>) -> Self {
        Self { code: code::OK, payload: Some(payload.into()), error_message: None }
    }

    pub fn error(code: u32, message: impl Into<String>) -> Self {
        Self { code, payload: None, error_message: Some(message.into()) }
    }
}

/// One inbound call.
pub struct RpcInvocation {
    pub id: String,
    pub method: String,
    pub caller_identity: String,
    pub payload: String,
    pub response_timeout: Duration,
    transport: Arc<dyn RpcTransport>,
}

impl RpcInvocation {
    /// Send the response packet for this call.
    pub fn send_result(&self, reply: RpcReply) -> RpcResult<()> {
        let size = reply.payload.as_ref().map_or(0, String::len);
        if size >= MAX_PAYLOAD_BYTES {
            tracing::error!(id = %self.id, size, "RPC result payload too large");
            return Err(RpcError::PayloadTooLarge { size });
        }

        let value = if reply.code == code::OK {
            if reply.error_message.is_some() {
                tracing::warn!(id = %self.id, "Error message provided for OK result, ignoring");
            }
            RpcResponseValue::Payload(reply.payload.unwrap_or_default())
        } else {
            RpcResponseValue::Error(RpcErrorInfo {
                code: reply.code,
                message: reply.error_message.unwrap_or_default(),
                data: None,
            })
        };
        self.transport.send_packet(response_packet(&self.id, &self.caller_identity, value))
    }

    pub fn ok(&self, payload: impl Into<String>) -> RpcResult<()> {
        self.send_result(RpcReply::ok(payload))
    }

    /// Fail the call with [`code::APPLICATION`].
    pub fn error(&self, message: impl Into<String>) -> RpcResult<()> {
        self.send_result(RpcReply::error(code::APPLICATION, message))
    }
}

impl std::fmt::Debug for RpcInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcInvocation")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("caller_identity", &self.caller_identity)
            .finish_non_exhaustive()
    }
}

pub struct RpcManager {
    handlers: RwLock<HashMap<String, RpcHandler>>,
    transport: Arc<dyn RpcTransport>,
}

impl RpcManager {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            transport,
        }
    }

    pub async fn register(&self, method: impl Into<String>, handler: RpcHandler) -> RpcResult<()> {
        let method = method.into();
        let mut handlers = self.handlers.write().await;
        if handlers.contains_key(&method) {
            return Err(RpcError::AlreadyRegistered(method));
        }
        tracing::debug!(method = %method, "RPC method registered");
        handlers.insert(method, handler);
        Ok(())
    }

    pub async fn unregister(&self, method: &str) -> RpcResult<()> {
        match self.handlers.write().await.remove(method) {
            Some(_) => Ok(()),
            None => Err(RpcError::NotRegistered(method.to_owned())),
        }
    }

    /// Dispatch an inbound RPC packet.
    pub async fn handle_packet(&self, packet: &DataPacket) -> RpcResult<()> {
        match &packet.value {
            DataPacketValue::RpcRequest(request) => {
                self.handle_request(request, &packet.participant_identity).await
            }
            DataPacketValue::RpcAck(_) | DataPacketValue::RpcResponse(_) => {
                Err(RpcError::NotSupported)
            }
            DataPacketValue::User(_) => Err(RpcError::InvalidPacket),
        }
    }

    async fn handle_request(&self, request: &RpcRequest, caller_identity: &str) -> RpcResult<()> {
        if caller_identity.is_empty() || request.method.is_empty() || !is_request_id(&request.id) {
            tracing::debug!(id = %request.id, "Ignoring malformed RPC request");
            return Ok(());
        }
        tracing::debug!(
            method = %request.method,
            id = %request.id,
            caller = %caller_identity,
            "RPC request"
        );

        let ack = DataPacket {
            participant_identity: String::new(),
            destination_identities: vec![caller_identity.to_owned()],
            value: DataPacketValue::RpcAck(RpcAck { request_id: request.id.clone() }),
        };
        self.transport.send_packet(ack)?;

        if request.version != PROTOCOL_VERSION {
            tracing::debug!(version = request.version, "Unsupported RPC version");
            return self.reject(&request.id, caller_identity, code::UNSUPPORTED_VERSION);
        }

        let handler = self.handlers.read().await.get(&request.method).cloned();
        let Some(handler) = handler else {
            tracing::debug!(method = %request.method, "No handler registered");
            return self.reject(&request.id, caller_identity, code::UNSUPPORTED_METHOD);
        };

        let invocation = RpcInvocation {
            id: request.id.clone(),
            method: request.method.clone(),
            caller_identity: caller_identity.to_owned(),
            payload: request.payload.clone(),
            response_timeout: Duration::from_millis(u64::from(request.response_timeout_ms)),
            transport: Arc::clone(&self.transport),
        };
        let started = Instant::now();
        handler(invocation);
        tracing::debug!(
            method = %request.method,
            elapsed = ?started.elapsed(),
            "RPC handler returned"
        );
        Ok(())
    }

    fn reject(&self, request_id: &str, caller_identity: &str, code: u32) -> RpcResult<()> {
        let error = RpcErrorInfo { code, message: String::new(), data: None };
        let packet = response_packet(request_id, caller_identity, RpcResponseValue::Error(error));
        self.transport.send_packet(packet)
    }
}

/// Request ids are hyphenated UUIDs.
fn is_request_id(id: &str) -> bool {
    id.len() == 36 && Uuid::try_parse(id).is_ok()
}

/// Responses go back to the caller only, like the ack.
fn response_packet(request_id: &str, caller_identity: &str, value: RpcResponseValue) -> DataPacket {
    DataPacket {
        participant_identity: String::new(),
        destination_identities: vec![caller_identity.to_owned()],
        value: DataPacketValue::RpcResponse(RpcResponse {
            request_id: request_id.to_owned(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<DataPacket>>,
        fail: bool,
    }

    impl RpcTransport for Recorder {
        fn send_packet(&self, packet: DataPacket) -> RpcResult<()> {
            if self.fail {
                return Err(RpcError::SendFailed("offline".into()));
            }
            self.sent.lock().unwrap().push(packet);
            Ok(())
        }
    }

    fn request(method: &str, version: u32) -> DataPacket {
        DataPacket {
            participant_identity: "caller".into(),
            destination_identities: vec![],
            value: DataPacketValue::RpcRequest(RpcRequest {
                id: "6f1c2a3e-8b4d-4c7e-9f10-2a3b4c5d6e7f".into(),
                method: method.into(),
                payload: "hello".into(),
                response_timeout_ms: 10_000,
                version,
            }),
        }
    }

    fn setup() -> (Arc<Recorder>, RpcManager) {
        let recorder = Arc::new(Recorder::default());
        let manager = RpcManager::new(recorder.clone());
        (recorder, manager)
    }

    fn response(packet: &DataPacket) -> &RpcResponseValue {
        match &packet.value {
            DataPacketValue::RpcResponse(response) => &response.value,
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ack_then_handler_result() {
        let (recorder, manager) = setup();
        manager
            .register(
                "ping",
                Arc::new(|invocation: RpcInvocation| {
                    assert_eq!(invocation.caller_identity, "caller");
                    invocation.ok(format!("pong:{}", invocation.payload)).unwrap();
                }),
            )
            .await
            .unwrap();

        manager.handle_packet(&request("ping", 1)).await.unwrap();

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(matches!(
            &sent[0].value,
            DataPacketValue::RpcAck(ack) if ack.request_id.len() == 36
        ));
        assert_eq!(response(&sent[1]), &RpcResponseValue::Payload("pong:hello".into()));
        for packet in sent.iter() {
            assert_eq!(packet.destination_identities, vec!["caller".to_owned()]);
        }
    }

    #[tokio::test]
    async fn unknown_method_and_version_are_rejected() {
        let (recorder, manager) = setup();
        manager.handle_packet(&request("missing", 1)).await.unwrap();
        manager.handle_packet(&request("missing", 2)).await.unwrap();

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        assert!(matches!(
            response(&sent[1]),
            RpcResponseValue::Error(e) if e.code == code::UNSUPPORTED_METHOD
        ));
        assert!(matches!(
            response(&sent[3]),
            RpcResponseValue::Error(e) if e.code == code::UNSUPPORTED_VERSION
        ));
        assert_eq!(sent[3].destination_identities, vec!["caller".to_owned()]);
    }

    #[tokio::test]
    async fn malformed_requests_are_ignored() {
        let (recorder, manager) = setup();
        let mut anonymous = request("ping", 1);
        anonymous.participant_identity.clear();
        manager.handle_packet(&anonymous).await.unwrap();

        let mut short_id = request("ping", 1);
        if let DataPacketValue::RpcRequest(r) = &mut short_id.value {
            r.id = "abc".into();
        }
        manager.handle_packet(&short_id).await.unwrap();

        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ack_failure_is_reported() {
        let manager = RpcManager::new(Arc::new(Recorder { fail: true, ..Default::default() }));
        assert!(matches!(
            manager.handle_packet(&request("ping", 1)).await,
            Err(RpcError::SendFailed(_))
        ));
    }

    #[tokio::test]
    async fn registration_is_unique() {
        let (_recorder, manager) = setup();
        let handler: RpcHandler = Arc::new(|_| {});
        manager.register("a", handler.clone()).await.unwrap();
        assert!(matches!(
            manager.register("a", handler).await,
            Err(RpcError::AlreadyRegistered(_))
        ));
        manager.unregister("a").await.unwrap();
        assert!(matches!(manager.unregister("a").await, Err(RpcError::NotRegistered(_))));
    }

    #[tokio::test]
    async fn outbound_responses_are_not_supported() {
        let (_recorder, manager) = setup();
        let ack = DataPacket {
            participant_identity: "caller".into(),
            destination_identities: vec![],
            value: DataPacketValue::RpcAck(RpcAck { request_id: "x".into() }),
        };
        assert!(matches!(manager.handle_packet(&ack).await, Err(RpcError::NotSupported)));
    }

    #[tokio::test]
    async fn results_are_validated() {
        let recorder = Arc::new(Recorder::default());
        let invocation = RpcInvocation {
            id: "id".into(),
            method: "m".into(),
            caller_identity: "caller".into(),
            payload: String::new(),
            response_timeout: Duration::from_secs(1),
            transport: recorder.clone(),
        };

        let big = "x".repeat(MAX_PAYLOAD_BYTES);
        assert!(matches!(
            invocation.ok(big),
            Err(RpcError::PayloadTooLarge { size: MAX_PAYLOAD_BYTES })
        ));

        invocation
            .send_result(RpcReply {
                code: code::OK,
                payload: Some("fine".into()),
                error_message: Some("ignored".into()),
            })
            .unwrap();
        invocation.error("boom").unwrap();

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(response(&sent[0]), &RpcResponseValue::Payload("fine".into()));
        assert_eq!(
            response(&sent[1]),
            &RpcResponseValue::Error(RpcErrorInfo {
                code: code::APPLICATION,
                message: "boom".into(),
                data: None,
            })
        );
    }
}
