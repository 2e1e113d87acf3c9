//! WebSocket gateway written against the wire format.
//!
//! Browser and script clients speak the same packets as framed TCP peers,
//! one packet per binary (or text) message.

pub mod frame;
pub mod handshake;
mod server;

pub use frame::{Frame, FrameDecoder, FrameError, Opcode};
pub use handshake::{HandshakeError, UpgradeRequest};
pub use server::WsGateway;
