//! Host records for federation membership.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A remote node a host knows about.
///
/// Two records are the same host when address and port match; the name and
/// websocket port are descriptive and may differ between sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreServer {
    #[serde(default)]
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket_port: Option<u16>,
}

impl CoreServer {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            name: String::new(),
            address: address.into(),
            port,
            websocket_port: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_websocket_port(mut self, port: u16) -> Self {
        self.websocket_port = Some(port);
        self
    }

    /// Same host as `other` (address and port).
    pub fn same_host(&self, other: &CoreServer) -> bool {
        self.address == other.address && self.port == other.port
    }
}

impl PartialEq for CoreServer {
    fn eq(&self, other: &Self) -> bool {
        self.same_host(other)
    }
}

impl Eq for CoreServer {}

impl Hash for CoreServer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for CoreServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

impl FromStr for CoreServer {
    type Err = ServerAddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ServerAddrParseError::MissingPort(s.to_string()))?;

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(ServerAddrParseError::EmptyAddress);
        }

        let port = port
            .parse()
            .map_err(|_| ServerAddrParseError::InvalidPort(port.to_string()))?;

        Ok(Self::new(host, port))
    }
}

/// Error parsing an `address:port` string.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServerAddrParseError {
    #[error("server address must be address:port, got: {0}")]
    MissingPort(String),
    #[error("server address cannot be empty")]
    EmptyAddress,
    #[error("invalid port: {0}")]
    InvalidPort(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn parse_ipv4_and_names() {
        let server: CoreServer = "127.0.0.1:2052".parse().unwrap();
        assert_eq!(server.address, "127.0.0.1");
        assert_eq!(server.port, 2052);

        let server: CoreServer = "server.example.net:2053".parse().unwrap();
        assert_eq!(server.address, "server.example.net");
    }

    #[test]
    fn parse_bracketed_ipv6() {
        let server: CoreServer = "[::1]:2052".parse().unwrap();
        assert_eq!(server.address, "::1");
        assert_eq!(server.to_string(), "[::1]:2052");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            "localhost".parse::<CoreServer>(),
            Err(ServerAddrParseError::MissingPort(_))
        ));
        assert!(matches!(
            "localhost:http".parse::<CoreServer>(),
            Err(ServerAddrParseError::InvalidPort(_))
        ));
        assert!(matches!(
            ":2052".parse::<CoreServer>(),
            Err(ServerAddrParseError::EmptyAddress)
        ));
    }

    #[test]
    fn equality_ignores_descriptive_fields() {
        let a = CoreServer::new("10.0.0.1", 2052).with_name("Master");
        let b = CoreServer::new("10.0.0.1", 2052)
            .with_name("master (via peer)")
            .with_websocket_port(2053);
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b, CoreServer::new("10.0.0.1", 2054)].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
