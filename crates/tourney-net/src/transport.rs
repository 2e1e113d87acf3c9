//! The seam collaborators program against.

use crate::event::Subscription;
use std::future::Future;
use tourney_core::{Packet, PeerId};

/// Who a packet goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Peer(PeerId),
    Peers(Vec<PeerId>),
    All,
}

impl Destination {
    /// The one peer this destination names, if it names exactly one.
    pub fn single_peer(&self) -> Option<PeerId> {
        match self {
            Destination::Peer(id) => Some(*id),
            Destination::Peers(ids) if ids.len() == 1 => Some(ids[0]),
            _ => None,
        }
    }

    pub fn includes(&self, id: PeerId) -> bool {
        match self {
            Destination::Peer(target) => *target == id,
            Destination::Peers(ids) => ids.contains(&id),
            Destination::All => true,
        }
    }
}

impl From<PeerId> for Destination {
    fn from(id: PeerId) -> Self {
        Destination::Peer(id)
    }
}

impl From<Vec<PeerId>> for Destination {
    fn from(ids: Vec<PeerId>) -> Self {
        Destination::Peers(ids)
    }
}

/// Something that can notify about peers and deliver packets to them.
///
/// Sends never fail from the caller's point of view: a peer that cannot be
/// written to is disconnected and reported through its `Disconnected` event.
pub trait Transport: Send + Sync + 'static {
    fn subscribe(&self) -> Subscription;

    fn send(&self, to: Destination, packet: &Packet) -> impl Future<Output = ()> + Send;
}
