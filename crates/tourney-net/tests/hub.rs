//! Replication hub behind a framed server, driven by real clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tourney_core::{
    ClientType, CoreServer, Event, EventTarget, ForwardingPacket, Packet, Payload, PeerId, Push,
    Request, ResponseDetails, State, Tournament, User, PROTOCOL_VERSION,
};
use tourney_net::{
    ClientConfig, PeerRegistry, ReplicationHub, Subscription, TcpClient, TcpServer, TransportEvent,
};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

struct Host {
    server: TcpServer,
    hub: ReplicationHub<PeerRegistry>,
    addr: SocketAddr,
    /// Lifecycle events, used to learn the ids the host assigned.
    events: Subscription,
}

async fn start_host(state: State) -> Host {
    let registry = PeerRegistry::shared();
    let events = registry.subscribe();
    let server = TcpServer::bind(&["127.0.0.1:0".parse().unwrap()], registry.clone())
        .await
        .unwrap();
    let addr = server.local_addrs()[0];
    let hub = ReplicationHub::new(registry, state);
    hub.spawn();
    Host {
        server,
        hub,
        addr,
        events,
    }
}

/// Connect a client and return it with the id the host gave it.
async fn join(host: &mut Host) -> (TcpClient, Subscription, PeerId) {
    let client = TcpClient::new(
        CoreServer::new(host.addr.ip().to_string(), host.addr.port()),
        ClientConfig::default(),
    );
    let events = client.subscribe();
    client.start().await.unwrap();
    let id = loop {
        let event = timeout(WAIT, host.events.recv()).await.unwrap().unwrap();
        if let TransportEvent::Connected(peer) = event {
            break peer.id;
        }
    };
    (client, events, id)
}

async fn wait_for<F>(events: &mut Subscription, mut matches: F) -> Arc<Packet>
where
    F: FnMut(&Packet) -> bool,
{
    loop {
        let event = timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for packet")
            .expect("subscription closed");
        if let TransportEvent::Packet { packet, .. } = event {
            if matches(&packet) {
                return packet;
            }
        }
    }
}

fn connect(version: u32) -> Packet {
    Packet::new(Request::Connect {
        client_type: ClientType::Coordinator,
        name: "Ref".to_string(),
        user_id: "42".to_string(),
        client_version: version,
    })
}

fn seeded() -> (State, Uuid) {
    let tournament = Tournament::new(Uuid::new_v4(), "Spring Cup");
    let id = tournament.guid;
    let state = State {
        tournaments: vec![tournament],
        known_servers: vec![CoreServer::new("10.0.0.1", 2052).with_name("Master")],
    };
    (state, id)
}

fn user(guid: Uuid, name: &str) -> User {
    User {
        guid,
        name: name.to_string(),
        client_type: ClientType::Player,
        data: serde_json::Value::Null,
    }
}

fn is_event(packet: &Packet) -> bool {
    matches!(packet.payload, Payload::Event(_))
}

#[tokio::test]
async fn connect_response_carries_state() {
    let (state, _) = seeded();
    let mut host = start_host(state.clone()).await;
    let (client, mut events, _) = join(&mut host).await;

    let request = connect(PROTOCOL_VERSION);
    client.send(&request).await.unwrap();
    let reply = wait_for(&mut events, |p| p.answers(request.id)).await;

    let Payload::Response(response) = &reply.payload else {
        panic!("expected a response, got {}", reply.describe());
    };
    assert!(response.is_success());
    let ResponseDetails::Connect {
        state: received,
        server_version,
        ..
    } = &response.details
    else {
        panic!("expected connect details");
    };
    assert_eq!(*received, state);
    assert_eq!(*server_version, PROTOCOL_VERSION);
}

#[tokio::test]
async fn version_mismatch_is_rejected() {
    let mut host = start_host(State::default()).await;
    let (client, mut events, _) = join(&mut host).await;

    let request = connect(PROTOCOL_VERSION + 1);
    client.send(&request).await.unwrap();
    let reply = wait_for(&mut events, |p| p.answers(request.id)).await;

    let Payload::Response(response) = &reply.payload else {
        panic!("expected a response");
    };
    assert!(!response.is_success());
    assert!(response.details.message().contains("Version mismatch"));
}

#[tokio::test]
async fn events_are_applied_and_relayed() {
    let (state, tournament_id) = seeded();
    let mut host = start_host(state).await;
    let (author, _author_events, author_id) = join(&mut host).await;
    let (_watcher, mut watcher_events, _) = join(&mut host).await;

    let event = Event::added(EventTarget::User {
        tournament_id,
        user: user(Uuid::new_v4(), "Moon"),
    });
    author.send(&Packet::new(event.clone())).await.unwrap();

    let relayed = wait_for(&mut watcher_events, is_event).await;
    assert_eq!(relayed.payload, Payload::Event(event));
    assert_eq!(relayed.from, author_id);

    let state = host.hub.state().await;
    let users = &state.tournaments[0].users;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].name, "Moon");
}

#[tokio::test]
async fn events_for_unknown_tournaments_are_dropped() {
    let mut host = start_host(State::default()).await;
    let (author, _, _) = join(&mut host).await;
    let (_watcher, mut watcher_events, _) = join(&mut host).await;

    let stray = Event::added(EventTarget::User {
        tournament_id: Uuid::new_v4(),
        user: user(Uuid::new_v4(), "Ghost"),
    });
    author.send(&Packet::new(stray)).await.unwrap();
    let server = Event::added(EventTarget::Server {
        server: CoreServer::new("10.0.0.9", 2052),
    });
    author.send(&Packet::new(server.clone())).await.unwrap();

    // Packets from one peer are handled in order, so the first relayed
    // event must be the valid one.
    let relayed = wait_for(&mut watcher_events, is_event).await;
    assert_eq!(relayed.payload, Payload::Event(server));
}

#[tokio::test]
async fn forwarding_reaches_only_the_targets() {
    let mut host = start_host(State::default()).await;
    let (sender, mut sender_events, sender_id) = join(&mut host).await;
    let (_target, mut target_events, target_id) = join(&mut host).await;

    let inner = Packet::new(Push {
        name: "song_finished".to_string(),
        data: serde_json::json!({ "score": 987_654 }),
    });
    let forward = Packet::new(ForwardingPacket {
        forward_to: vec![target_id],
        packet: inner.clone(),
    });
    sender.send(&forward).await.unwrap();

    let received = wait_for(&mut target_events, |p| p.id == inner.id).await;
    assert_eq!(received.payload, inner.payload);
    assert_eq!(received.from, sender_id);

    let echoed = timeout(
        Duration::from_millis(150),
        wait_for(&mut sender_events, |p| p.id == inner.id),
    )
    .await;
    assert!(echoed.is_err());
}

#[tokio::test]
async fn disconnect_removes_the_peers_users() {
    let (state, tournament_id) = seeded();
    let mut host = start_host(state).await;
    let (leaver, _, leaver_id) = join(&mut host).await;
    let (_stayer, mut stayer_events, stayer_id) = join(&mut host).await;

    for (id, name) in [(leaver_id, "Leaver"), (stayer_id, "Stayer")] {
        let added = Event::added(EventTarget::User {
            tournament_id,
            user: user(id.as_uuid(), name),
        });
        assert!(host.hub.publish(added).await.unwrap());
    }
    for _ in 0..2 {
        wait_for(&mut stayer_events, is_event).await;
    }

    leaver.shutdown().await;

    let deleted = wait_for(&mut stayer_events, is_event).await;
    let Payload::Event(event) = &deleted.payload else {
        unreachable!();
    };
    assert_eq!(event.name(), "user_deleted");

    let state = host.hub.state().await;
    let users = &state.tournaments[0].users;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].name, "Stayer");
}

#[tokio::test]
async fn publish_broadcasts_only_changes() {
    let mut host = start_host(State::default()).await;
    let (_client, mut events, _) = join(&mut host).await;

    let server = CoreServer::new("10.0.0.2", 2052).with_name("Relay");
    let added = Event::added(EventTarget::Server {
        server: server.clone(),
    });
    assert!(host.hub.publish(added.clone()).await.unwrap());
    assert!(!host.hub.publish(added.clone()).await.unwrap());

    let received = wait_for(&mut events, is_event).await;
    assert_eq!(received.payload, Payload::Event(added));
    assert!(received.from.is_host());

    let duplicate = timeout(Duration::from_millis(150), wait_for(&mut events, is_event)).await;
    assert!(duplicate.is_err());
    assert!(host.hub.state().await.knows_server(&server));

    host.server.shutdown().await;
}
