//! Framed TCP server.

use super::read_framed;
use crate::error::NetResult;
use crate::event::{PeerInfo, PeerKind, Subscription};
use crate::listener::{dual_stack, AcceptLoops};
use crate::registry::PeerRegistry;
use crate::stream::configure_stream;
use crate::transport::{Destination, Transport};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tourney_core::{Packet, PeerId};

/// Accepts framed connections and registers them in a [`PeerRegistry`].
pub struct TcpServer {
    registry: Arc<PeerRegistry>,
    listeners: AcceptLoops,
}

impl TcpServer {
    pub async fn bind(addrs: &[SocketAddr], registry: Arc<PeerRegistry>) -> NetResult<Self> {
        let accept_registry = registry.clone();
        let listeners = AcceptLoops::start(addrs, "framed", move |stream, addr| {
            handle_connection(stream, addr, accept_registry.clone())
        })?;
        Ok(Self {
            registry,
            listeners,
        })
    }

    /// Listen on `0.0.0.0:port` and `[::]:port`.
    pub async fn bind_dual_stack(port: u16, registry: Arc<PeerRegistry>) -> NetResult<Self> {
        Self::bind(&dual_stack(port), registry).await
    }

    pub fn local_addrs(&self) -> &[SocketAddr] {
        self.listeners.local_addrs()
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Stop listening and drop every framed peer.
    pub async fn shutdown(&self) {
        self.listeners.stop().await;
        self.registry.disconnect_kind(PeerKind::Framed).await;
    }
}

impl Transport for TcpServer {
    fn subscribe(&self) -> Subscription {
        self.registry.subscribe()
    }

    async fn send(&self, to: Destination, packet: &Packet) {
        self.registry.send(&to, packet).await
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, registry: Arc<PeerRegistry>) {
    if let Err(e) = configure_stream(&stream) {
        tracing::debug!("Could not set socket options for {}: {}", addr, e);
    }

    let (reader, writer) = stream.into_split();
    let info = PeerInfo {
        id: PeerId::new(),
        addr,
        kind: PeerKind::Framed,
    };
    let close = registry
        .register(info.clone(), Arc::new(Mutex::new(writer)))
        .await;

    if let Err(e) = read_framed(reader, &info, registry.subscribers(), close).await {
        tracing::debug!("Connection from {} faulted: {}", addr, e);
    }
    registry.unregister(info.id).await;
}
