//! WebSocket gateway on loopback.
//!
//! Interop is checked against `tokio-tungstenite` as the client; the wire
//! details (masking, fragmentation, rejected handshakes) use raw sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tourney_core::{codec, Command, Packet, Push};
use tourney_net::ws::frame::{self, FrameDecoder, Opcode};
use tourney_net::{Destination, PeerInfo, PeerKind, PeerRegistry, Subscription, TransportEvent, WsGateway};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const WAIT: Duration = Duration::from_secs(5);
const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

async fn start_gateway() -> (WsGateway, SocketAddr) {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let gateway = WsGateway::bind(&[addr], PeerRegistry::shared())
        .await
        .expect("bind gateway");
    let local = gateway.local_addrs()[0];
    (gateway, local)
}

async fn next_event(events: &mut Subscription) -> TransportEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("event timed out")
        .expect("subscription closed")
}

async fn next_packet(events: &mut Subscription) -> (PeerInfo, Arc<Packet>) {
    loop {
        if let TransportEvent::Packet { peer, packet } = next_event(events).await {
            return (peer, packet);
        }
    }
}

fn push(bytes: usize) -> Packet {
    Packet::new(Push {
        name: "leaderboard".to_string(),
        data: serde_json::json!({ "blob": "x".repeat(bytes) }),
    })
}

/// Perform the upgrade by hand and return the server's reply head.
async fn raw_upgrade(addr: SocketAddr) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /tourney HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let head = read_head(&mut stream).await;
    (stream, head)
}

/// Read byte by byte so nothing after the head is consumed.
async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let byte = timeout(WAIT, stream.read_u8())
            .await
            .expect("reply timed out")
            .expect("connection closed");
        head.push(byte);
    }
    String::from_utf8(head).unwrap()
}

// ---------------------------------------------------------------------------
// Interop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tungstenite_client_round_trip() {
    let (gateway, addr) = start_gateway().await;
    let mut events = gateway.registry().subscribe();

    let (mut ws, _) = connect_async(format!("ws://{addr}/")).await.expect("connect");
    let TransportEvent::Connected(peer) = next_event(&mut events).await else {
        panic!("expected Connected");
    };
    assert_eq!(peer.kind, PeerKind::WebSocket);

    let hello = Packet::new(Command::Heartbeat);
    ws.send(Message::Binary(codec::encode_payload(&hello).unwrap().into()))
        .await
        .unwrap();
    let (from, received) = next_packet(&mut events).await;
    assert_eq!(from.id, peer.id);
    assert_eq!(*received, hello);

    let reply = push(16);
    gateway.registry().send(&Destination::All, &reply).await;
    let message = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    assert!(message.is_binary());
    assert_eq!(codec::decode_payload(&message.into_data()).unwrap(), reply);
}

#[tokio::test]
async fn text_frames_carry_packets_too() {
    let (gateway, addr) = start_gateway().await;
    let mut events = gateway.registry().subscribe();
    let (mut ws, _) = connect_async(format!("ws://{addr}/")).await.unwrap();

    let packet = push(8);
    let json = serde_json::to_string(&packet).unwrap();
    ws.send(Message::Text(json.into())).await.unwrap();

    let (_, received) = next_packet(&mut events).await;
    assert_eq!(*received, packet);
}

#[tokio::test]
async fn large_messages_use_extended_lengths() {
    let (gateway, addr) = start_gateway().await;
    let mut events = gateway.registry().subscribe();
    let (mut ws, _) = connect_async(format!("ws://{addr}/")).await.unwrap();

    for size in [200, 70_000] {
        let packet = push(size);
        ws.send(Message::Binary(codec::encode_payload(&packet).unwrap().into()))
            .await
            .unwrap();
        let (_, received) = next_packet(&mut events).await;
        assert_eq!(*received, packet);

        gateway.registry().send(&Destination::All, &packet).await;
        let message = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(codec::decode_payload(&message.into_data()).unwrap(), packet);
    }
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let (_gateway, addr) = start_gateway().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/")).await.unwrap();

    ws.send(Message::Ping(b"are you there".to_vec().into()))
        .await
        .unwrap();
    let message = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(message, Message::Pong(b"are you there".to_vec().into()));
}

#[tokio::test]
async fn close_is_echoed_and_peer_removed() {
    let (gateway, addr) = start_gateway().await;
    let mut events = gateway.registry().subscribe();
    let (mut ws, _) = connect_async(format!("ws://{addr}/")).await.unwrap();
    let TransportEvent::Connected(peer) = next_event(&mut events).await else {
        panic!("expected Connected");
    };

    ws.close(None).await.unwrap();
    // The stream ends once the echoed close frame has been read.
    while let Ok(Some(Ok(_))) = timeout(WAIT, ws.next()).await {}

    match next_event(&mut events).await {
        TransportEvent::Disconnected(gone) => assert_eq!(gone.id, peer.id),
        other => panic!("expected Disconnected, got {other:?}"),
    }
    assert!(gateway.registry().is_empty().await);
}

// ---------------------------------------------------------------------------
// Wire level
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handshake_reply_carries_rfc_accept_key() {
    let (_gateway, addr) = start_gateway().await;
    let (_stream, head) = raw_upgrade(addr).await;

    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(head.contains("Upgrade: websocket\r\n"));
    assert!(head.contains("Connection: Upgrade\r\n"));
    assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
}

#[tokio::test]
async fn masked_fragments_are_reassembled() {
    let (gateway, addr) = start_gateway().await;
    let mut events = gateway.registry().subscribe();
    let (mut stream, _) = raw_upgrade(addr).await;

    let packet = push(300);
    let payload = codec::encode_payload(&packet).unwrap();
    let (head, tail) = payload.split_at(100);
    let key = [0x37, 0xfa, 0x21, 0x3d];

    let mut first = frame::encode(Opcode::Binary, head, Some(key));
    first[0] &= 0x7F; // clear FIN
    let ping = frame::encode(Opcode::Ping, b"mid", Some(key));
    let last = frame::encode(Opcode::Continuation, tail, Some(key));

    stream.write_all(&first).await.unwrap();
    stream.write_all(&ping).await.unwrap();
    stream.write_all(&last).await.unwrap();

    let (_, received) = next_packet(&mut events).await;
    assert_eq!(*received, packet);

    // Control frames may interleave with fragments.
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 256];
    let pong = loop {
        if let Some(frame) = decoder.next_frame().unwrap() {
            break frame;
        }
        let n = timeout(WAIT, stream.read(&mut buf)).await.unwrap().unwrap();
        assert_ne!(n, 0);
        decoder.extend(&buf[..n]);
    };
    assert_eq!(pong.opcode, Opcode::Pong);
    assert_eq!(pong.payload, b"mid");
}

#[tokio::test]
async fn empty_frame_is_a_no_op() {
    let (gateway, addr) = start_gateway().await;
    let mut events = gateway.registry().subscribe();
    let (mut stream, _) = raw_upgrade(addr).await;

    let packet = Packet::new(Command::Heartbeat);
    let key = [1, 2, 3, 4];
    stream
        .write_all(&frame::encode(Opcode::Binary, &[], Some(key)))
        .await
        .unwrap();
    stream
        .write_all(&frame::encode(
            Opcode::Binary,
            &codec::encode_payload(&packet).unwrap(),
            Some(key),
        ))
        .await
        .unwrap();

    let (_, received) = next_packet(&mut events).await;
    assert_eq!(*received, packet);
}

#[tokio::test]
async fn bad_handshake_is_rejected_unregistered() {
    let (gateway, addr) = start_gateway().await;
    let mut events = gateway.registry().subscribe();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let head = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    let mut rest = Vec::new();
    timeout(WAIT, stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(timeout(Duration::from_millis(100), events.recv()).await.is_err());
    assert!(gateway.registry().is_empty().await);
}
