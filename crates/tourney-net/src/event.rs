//! Lifecycle and packet notifications.
//!
//! Every subscriber gets its own unbounded channel. A subscriber goes away
//! by dropping its receiver; it is pruned on the next emit.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tourney_core::{Packet, PeerId};

/// Which framing a peer speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerKind {
    /// Length-framed packets over raw TCP.
    Framed,
    WebSocket,
}

/// One end of a connection, as seen by this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub kind: PeerKind,
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected(PeerInfo),
    /// Emitted exactly once per connected peer.
    Disconnected(PeerInfo),
    /// Outbound connection attempt failed. Clients only.
    FailedToConnect { reason: String },
    Packet { peer: PeerInfo, packet: Arc<Packet> },
}

pub type Subscription = mpsc::UnboundedReceiver<TransportEvent>;

/// Fan-out list of event subscribers.
#[derive(Debug, Clone, Default)]
pub struct Subscribers {
    senders: Arc<Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn emit(&self, event: TransportEvent) {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_subscribers_are_pruned() {
        let subscribers = Subscribers::new();
        let mut kept = subscribers.subscribe();
        let dropped = subscribers.subscribe();
        drop(dropped);

        subscribers.emit(TransportEvent::FailedToConnect {
            reason: "refused".to_string(),
        });
        assert_eq!(subscribers.len(), 1);
        assert!(matches!(
            kept.try_recv(),
            Ok(TransportEvent::FailedToConnect { .. })
        ));
    }
}
