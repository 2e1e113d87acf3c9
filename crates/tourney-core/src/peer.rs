//! Peer identifiers.
//!
//! Every connection gets a `PeerId` from the accepting side at accept time.
//! The nil id is reserved for the host itself: packets a node originates
//! carry it in `from` unless a collaborator stamps a user id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of one end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(Uuid);

impl PeerId {
    /// The id a host uses for itself.
    pub const HOST: PeerId = PeerId(Uuid::nil());

    /// Allocate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing uuid (user guids double as peer ids).
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Check if this is the host id.
    pub fn is_host(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::HOST
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(PeerIdParseError::Empty);
        }

        Uuid::parse_str(trimmed)
            .map(Self)
            .map_err(|e| PeerIdParseError::Invalid(s.to_string(), e))
    }
}

impl TryFrom<String> for PeerId {
    type Error = PeerIdParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.to_string()
    }
}

impl From<Uuid> for PeerId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Error parsing a peer id string.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PeerIdParseError {
    #[error("peer id cannot be empty")]
    Empty,
    #[error("peer id must be a uuid, got {0}: {1}")]
    Invalid(String, uuid::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_uuid() {
        let id: PeerId = "67e55044-10b1-426f-9247-bb680e5fe0c8".parse().unwrap();
        assert_eq!(id.to_string(), "67e55044-10b1-426f-9247-bb680e5fe0c8");
        assert!(!id.is_host());
    }

    #[test]
    fn host_is_nil() {
        let id: PeerId = "00000000-0000-0000-0000-000000000000".parse().unwrap();
        assert_eq!(id, PeerId::HOST);
        assert!(id.is_host());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!("".parse::<PeerId>(), Err(PeerIdParseError::Empty)));
        assert!(matches!(
            "local:alice".parse::<PeerId>(),
            Err(PeerIdParseError::Invalid(..))
        ));
    }

    #[test]
    fn roundtrip() {
        let id = PeerId::new();
        let s = id.to_string();
        let id2: PeerId = s.parse().unwrap();
        assert_eq!(id, id2);
    }
}
