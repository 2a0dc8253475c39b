mod support;

use std::sync::Arc;
use std::time::Duration;

use roomlink_common::ConnectionState;
use roomlink_common::codec;
use roomlink_common::protocol::{
    DataPacket, DataPacketValue, RpcRequest, RpcResponseValue, UserPacket,
};
use roomlink_engine::rpc::code;
use roomlink_engine::{DataPublishOptions, Room, RoomEvent, RpcError, RpcInvocation};
use roomlink_peer::rtc::RtcEvent;
use support::{Harness, settle};
use tokio::sync::broadcast;

async fn connected_room() -> (Room, support::PeerHandle, support::PeerHandle) {
    let mut h = Harness::new();
    let (_socket, publisher, subscriber) = h.connect_fully().await;
    h.drain_notifications();
    let Harness { engine, notifications, .. } = h;
    (Room::from_engine(engine, notifications), publisher, subscriber)
}

async fn next_event(events: &mut broadcast::Receiver<RoomEvent>) -> RoomEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("room event")
        .expect("channel open")
}

fn rpc_request(method: &str) -> DataPacket {
    DataPacket {
        participant_identity: "caller".into(),
        destination_identities: vec![],
        value: DataPacketValue::RpcRequest(RpcRequest {
            id: "0b7e6c52-1f4a-4d2b-8e3c-5a6b7c8d9e0f".into(),
            method: method.into(),
            payload: "ping".into(),
            response_timeout_ms: 5_000,
            version: 1,
        }),
    }
}

#[tokio::test(start_paused = true)]
async fn rpc_request_gets_ack_then_response() {
    let (room, publisher, subscriber) = connected_room().await;
    room.register_rpc(
        "ping",
        Arc::new(|invocation: RpcInvocation| {
            let _ = invocation.ok("pong");
        }),
    )
    .await
    .unwrap();

    let payload = codec::encode(&rpc_request("ping")).unwrap();
    subscriber.emit(RtcEvent::Data { stream_id: 0, payload });
    settle().await;

    let sent = publisher.sent_packets();
    assert_eq!(sent.len(), 2);
    // Both go out on the reliable channel, to the caller only.
    for (stream_id, packet) in &sent {
        assert_eq!(*stream_id, 0);
        assert_eq!(packet.destination_identities, vec!["caller".to_owned()]);
    }
    assert!(matches!(
        &sent[0].1.value,
        DataPacketValue::RpcAck(ack) if ack.request_id.len() == 36
    ));
    match &sent[1].1.value {
        DataPacketValue::RpcResponse(response) => {
            assert_eq!(response.value, RpcResponseValue::Payload("pong".into()));
        }
        other => panic!("expected response, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn unregistered_method_is_rejected() {
    let (room, publisher, subscriber) = connected_room().await;
    room.register_rpc("ping", Arc::new(|_| {})).await.unwrap();
    room.unregister_rpc("ping").await.unwrap();
    assert!(matches!(room.unregister_rpc("ping").await, Err(RpcError::NotRegistered(_))));

    let payload = codec::encode(&rpc_request("ping")).unwrap();
    subscriber.emit(RtcEvent::Data { stream_id: 0, payload });
    settle().await;

    let sent = publisher.sent_packets();
    assert_eq!(sent.len(), 2);
    match &sent[1].1.value {
        DataPacketValue::RpcResponse(r) => {
            assert!(matches!(
                &r.value,
                RpcResponseValue::Error(e) if e.code == code::UNSUPPORTED_METHOD
            ));
        }
        other => panic!("expected response, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn user_data_is_broadcast_and_published() {
    let (room, publisher, subscriber) = connected_room().await;
    let mut events = room.subscribe();
    assert_eq!(room.state(), ConnectionState::Connected);

    let inbound = DataPacket {
        participant_identity: "alice".into(),
        destination_identities: vec![],
        value: DataPacketValue::User(UserPacket {
            topic: Some("chat".into()),
            payload: b"hi".to_vec(),
        }),
    };
    subscriber.emit(RtcEvent::Data { stream_id: 0, payload: codec::encode(&inbound).unwrap() });
    assert_eq!(
        next_event(&mut events).await,
        RoomEvent::DataReceived {
            sender_identity: "alice".into(),
            topic: Some("chat".into()),
            payload: b"hi".to_vec(),
        }
    );

    room.publish_data(DataPublishOptions {
        payload: b"telemetry".to_vec(),
        topic: Some("sensors".into()),
        lossy: true,
        destination_identities: vec!["alice".into()],
    })
    .unwrap();
    assert!(room.publish_data(DataPublishOptions::default()).is_err());

    let sent = publisher.sent_packets();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 1);
    assert_eq!(sent[0].1.destination_identities, vec!["alice".to_owned()]);

    room.close().unwrap();
    assert_eq!(
        next_event(&mut events).await,
        RoomEvent::StateChanged(ConnectionState::Disconnected)
    );
    room.shutdown().await;
}
