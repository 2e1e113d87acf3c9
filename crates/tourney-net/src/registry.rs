//! Connected-peer registry shared by the TCP server and WebSocket gateway.
//!
//! The map is only touched under its lock; socket writes happen outside it,
//! each serialized by its peer's own writer lock.

use crate::event::{PeerInfo, PeerKind, Subscribers, Subscription, TransportEvent};
use crate::transport::{Destination, Transport};
use crate::ws::frame::{self, Opcode};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{watch, Mutex};
use tourney_core::{codec, CodecError, Packet, PeerId};

/// Write half of a peer's socket.
pub type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

struct PeerHandle {
    info: PeerInfo,
    writer: SharedWriter,
    close: watch::Sender<bool>,
}

#[derive(Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<PeerId, PeerHandle>>,
    subscribers: Subscribers,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn subscribe(&self) -> Subscription {
        self.subscribers.subscribe()
    }

    pub(crate) fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }

    /// Add a peer and announce it. The returned receiver flips to `true`
    /// when the peer is removed; its read loop should stop then.
    pub(crate) async fn register(&self, info: PeerInfo, writer: SharedWriter) -> watch::Receiver<bool> {
        let (close, closed) = watch::channel(false);
        let mut peers = self.peers.lock().await;
        tracing::info!("Peer {} connected from {} ({:?})", info.id, info.addr, info.kind);
        self.subscribers.emit(TransportEvent::Connected(info.clone()));
        peers.insert(
            info.id,
            PeerHandle {
                info,
                writer,
                close,
            },
        );
        closed
    }

    /// Remove a peer. Only the first call for a given id reports it.
    pub async fn unregister(&self, id: PeerId) -> bool {
        let mut peers = self.peers.lock().await;
        let Some(handle) = peers.remove(&id) else {
            return false;
        };
        handle.close.send_replace(true);
        tracing::info!("Peer {} disconnected ({})", id, handle.info.addr);
        self.subscribers
            .emit(TransportEvent::Disconnected(handle.info));
        true
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        let peers = self.peers.lock().await;
        peers.values().map(|handle| handle.info.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, id: PeerId) -> bool {
        self.peers.lock().await.contains_key(&id)
    }

    /// Disconnect every peer of one framing kind.
    pub async fn disconnect_kind(&self, kind: PeerKind) {
        let ids: Vec<PeerId> = {
            let peers = self.peers.lock().await;
            peers
                .values()
                .filter(|handle| handle.info.kind == kind)
                .map(|handle| handle.info.id)
                .collect()
        };
        for id in ids {
            self.unregister(id).await;
        }
    }

    pub async fn disconnect_all(&self) {
        let ids: Vec<PeerId> = self.peers.lock().await.keys().copied().collect();
        for id in ids {
            self.unregister(id).await;
        }
    }

    /// Deliver a packet to every matching peer concurrently.
    pub async fn send(&self, to: &Destination, packet: &Packet) {
        let targets: Vec<(PeerInfo, SharedWriter)> = {
            let peers = self.peers.lock().await;
            match to {
                Destination::All => peers
                    .values()
                    .map(|handle| (handle.info.clone(), handle.writer.clone()))
                    .collect(),
                _ => peers
                    .values()
                    .filter(|handle| to.includes(handle.info.id))
                    .map(|handle| (handle.info.clone(), handle.writer.clone()))
                    .collect(),
            }
        };
        if targets.is_empty() {
            tracing::debug!("No peers for {}", packet.describe());
            return;
        }

        let encoded = match Encoded::new(packet, &targets) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!("Failed to encode {}: {}", packet.describe(), e);
                return;
            }
        };

        tracing::debug!("Sending {} to {} peer(s)", packet.describe(), targets.len());
        let writes = targets.into_iter().map(|(info, writer)| {
            let bytes = encoded.for_kind(info.kind);
            async move {
                let mut writer = writer.lock().await;
                let result = writer.write_all(bytes).await;
                (info, result)
            }
        });

        for (info, result) in join_all(writes).await {
            if let Err(e) = result {
                tracing::debug!("Write to {} failed: {}", info.addr, e);
                self.unregister(info.id).await;
            }
        }
    }
}

/// A packet encoded once per framing kind in use.
struct Encoded {
    framed: Vec<u8>,
    websocket: Vec<u8>,
}

impl Encoded {
    fn new(packet: &Packet, targets: &[(PeerInfo, SharedWriter)]) -> Result<Self, CodecError> {
        let wants = |kind: PeerKind| targets.iter().any(|(info, _)| info.kind == kind);
        let framed = if wants(PeerKind::Framed) {
            codec::serialize(packet)?
        } else {
            Vec::new()
        };
        let websocket = if wants(PeerKind::WebSocket) {
            frame::encode(Opcode::Binary, &codec::encode_payload(packet)?, None)
        } else {
            Vec::new()
        };
        Ok(Self { framed, websocket })
    }

    fn for_kind(&self, kind: PeerKind) -> &[u8] {
        match kind {
            PeerKind::Framed => &self.framed,
            PeerKind::WebSocket => &self.websocket,
        }
    }
}

impl Transport for PeerRegistry {
    fn subscribe(&self) -> Subscription {
        PeerRegistry::subscribe(self)
    }

    async fn send(&self, to: Destination, packet: &Packet) {
        PeerRegistry::send(self, &to, packet).await
    }
}
