//! Host side of the state replication feed.
//!
//! New peers get the full State in their Connect response. Every change
//! after that travels as an Event, broadcast to all peers once it has been
//! applied locally.

use crate::event::{PeerInfo, Subscription, TransportEvent};
use crate::transport::{Destination, Transport};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tourney_core::{
    Command, Event, EventTarget, Packet, Payload, ReplicationError, Request, Response,
    ResponseDetails, State, PROTOCOL_VERSION,
};

pub struct ReplicationHub<T> {
    transport: Arc<T>,
    state: Arc<RwLock<State>>,
}

impl<T> Clone for ReplicationHub<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            state: self.state.clone(),
        }
    }
}

impl<T: Transport> ReplicationHub<T> {
    pub fn new(transport: Arc<T>, state: State) -> Self {
        Self {
            transport,
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Snapshot of the current State.
    pub async fn state(&self) -> State {
        self.state.read().await.clone()
    }

    /// Apply `event` locally and broadcast it if anything changed.
    pub async fn publish(&self, event: Event) -> Result<bool, ReplicationError> {
        let changed = self.state.write().await.apply(&event)?;
        if changed {
            self.transport
                .send(Destination::All, &Packet::new(event))
                .await;
        }
        Ok(changed)
    }

    /// Start serving. The subscription is taken before this returns, so no
    /// peer that connects afterwards is missed.
    pub fn spawn(&self) -> JoinHandle<()> {
        let events = self.transport.subscribe();
        let hub = self.clone();
        tokio::spawn(async move { hub.run(events).await })
    }

    async fn run(self, mut events: Subscription) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Packet { peer, packet } => self.handle_packet(&peer, &packet).await,
                TransportEvent::Disconnected(peer) => self.remove_users_of(&peer).await,
                TransportEvent::Connected(_) | TransportEvent::FailedToConnect { .. } => {}
            }
        }
    }

    async fn handle_packet(&self, peer: &PeerInfo, packet: &Packet) {
        match &packet.payload {
            Payload::Request(Request::Connect {
                client_type,
                name,
                client_version,
                ..
            }) => {
                tracing::info!("{} ({:?}) connecting from {}", name, client_type, peer.addr);
                let response = if *client_version == PROTOCOL_VERSION {
                    Response::success(
                        packet.id,
                        ResponseDetails::Connect {
                            state: self.state().await,
                            server_version: PROTOCOL_VERSION,
                            message: format!("Connected as {name}"),
                        },
                    )
                } else {
                    tracing::warn!(
                        "Rejected {}: client version {} does not match {}",
                        name,
                        client_version,
                        PROTOCOL_VERSION
                    );
                    Response::fail(
                        packet.id,
                        ResponseDetails::Connect {
                            state: State::default(),
                            server_version: PROTOCOL_VERSION,
                            message: format!(
                                "Version mismatch: this host runs version {PROTOCOL_VERSION}, you run {client_version}"
                            ),
                        },
                    )
                };
                self.transport
                    .send(Destination::Peer(peer.id), &Packet::new(response))
                    .await;
            }
            Payload::Event(event) => {
                let applied = self.state.write().await.apply(event);
                match applied {
                    Ok(true) => {
                        tracing::debug!("Applied {} from {}", event.name(), peer.addr);
                        let relay = packet.clone().with_from(peer.id);
                        self.transport.send(Destination::All, &relay).await;
                    }
                    Ok(false) => tracing::debug!("{} from {} changed nothing", event.name(), peer.addr),
                    Err(e) => tracing::warn!("Ignored {} from {}: {}", event.name(), peer.addr, e),
                }
            }
            Payload::ForwardingPacket(forward) => {
                let inner = forward.packet.clone().with_from(peer.id);
                tracing::debug!(
                    "Forwarding {} from {} to {} peer(s)",
                    inner.describe(),
                    peer.addr,
                    forward.forward_to.len()
                );
                self.transport
                    .send(Destination::Peers(forward.forward_to.clone()), &inner)
                    .await;
            }
            Payload::Command(Command::Heartbeat) => {
                tracing::trace!("Heartbeat from {}", peer.addr);
            }
            Payload::Acknowledgement(ack) => {
                tracing::debug!("{} acknowledged {}", peer.addr, ack.packet_id);
            }
            _ => {
                tracing::debug!("Unhandled {} from {}", packet.describe(), peer.addr);
            }
        }
    }

    /// Users are keyed by the id of the connection that created them.
    async fn remove_users_of(&self, peer: &PeerInfo) {
        let guid = peer.id.as_uuid();
        let events: Vec<Event> = {
            let mut state = self.state.write().await;
            let doomed: Vec<Event> = state
                .tournaments
                .iter()
                .flat_map(|tournament| {
                    tournament
                        .users
                        .iter()
                        .filter(|user| user.guid == guid)
                        .map(|user| {
                            Event::deleted(EventTarget::User {
                                tournament_id: tournament.guid,
                                user: user.clone(),
                            })
                        })
                })
                .collect();
            doomed
                .into_iter()
                .filter(|event| matches!(state.apply(event), Ok(true)))
                .collect()
        };

        for event in events {
            tracing::info!("Removed {}'s user after disconnect", peer.addr);
            self.transport
                .send(Destination::All, &Packet::new(event))
                .await;
        }
    }
}
