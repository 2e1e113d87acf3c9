//! Transport errors.

use crate::ws::{FrameError, HandshakeError};
use tourney_core::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("websocket protocol error: {0}")]
    Frame(#[from] FrameError),
    #[error("connecting to {0} timed out")]
    ConnectTimeout(String),
    #[error("client was already started")]
    AlreadyStarted,
    #[error("not connected")]
    NotConnected,
}

pub type NetResult<T> = Result<T, NetError>;
