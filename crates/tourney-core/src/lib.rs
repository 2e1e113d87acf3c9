//! Core types for the tournament relay protocol.
//!
//! This crate provides the protocol primitives: the packet envelope, the
//! aggregate State with its replication events, and the length-framed codec
//! shared by every stream transport. Sockets live in `tourney-net`.

pub mod codec;
mod models;
mod packet;
mod peer;
mod replication;
mod server;

pub use codec::{CodecError, Reassembler};
pub use models::{ClientType, Match, QualifierEvent, State, Tournament, User};
pub use packet::{
    Acknowledgement, Change, Command, Event, EventTarget, ForwardingPacket, Packet, Payload, Push,
    Request, Response, ResponseDetails, ResponseKind,
};
pub use peer::{PeerId, PeerIdParseError};
pub use replication::{MirrorChange, ReplicationError, StateMirror};
pub use server::{CoreServer, ServerAddrParseError};

/// Version a Connect request must carry to be accepted.
pub const PROTOCOL_VERSION: u32 = 1;

/// Connection lifecycle as seen by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Establishing connection.
    Connecting,
    /// Connected and receiving packets.
    Connected,
    /// The connection attempt failed.
    FailedToConnect,
    /// Connection ended.
    Disconnected,
}
