//! HTTP Upgrade handshake (RFC 6455 section 4).

use data_encoding::BASE64;
use sha1::{Digest, Sha1};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
/// Largest request head accepted.
pub const MAX_REQUEST_SIZE: usize = 8 * 1024;
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

pub const BAD_REQUEST: &str =
    "HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed during handshake")]
    Closed,
    #[error("request head exceeds {max} bytes", max = MAX_REQUEST_SIZE)]
    TooLarge,
    #[error("request head is not utf-8")]
    NotUtf8,
    #[error("expected GET, got {0:?}")]
    NotGet(String),
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    #[error("missing Upgrade: websocket")]
    MissingUpgrade,
    #[error("missing Sec-WebSocket-Key")]
    MissingKey,
    #[error("Sec-WebSocket-Key must be 16 base64-encoded bytes")]
    InvalidKey,
    #[error("handshake timed out")]
    TimedOut,
}

/// A validated upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub path: String,
    pub key: String,
}

/// `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(&hasher.finalize())
}

/// Parse a request head (everything before the blank line).
pub fn parse_request(head: &str) -> Result<UpgradeRequest, HandshakeError> {
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    if method != "GET" {
        return Err(HandshakeError::NotGet(method.to_string()));
    }
    let path = parts.next().unwrap_or("/").to_string();

    let mut upgrade = false;
    let mut key = None;
    for line in lines.take_while(|line| !line.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HandshakeError::MalformedHeader(line.to_string()))?;
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("upgrade") {
            upgrade = value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("websocket"));
        } else if name.eq_ignore_ascii_case("sec-websocket-key") {
            key = Some(value.to_string());
        }
    }

    if !upgrade {
        return Err(HandshakeError::MissingUpgrade);
    }
    let key = key.ok_or(HandshakeError::MissingKey)?;
    match BASE64.decode(key.as_bytes()) {
        Ok(nonce) if nonce.len() == 16 => Ok(UpgradeRequest { path, key }),
        _ => Err(HandshakeError::InvalidKey),
    }
}

/// Read and validate the upgrade request. Returns any bytes that arrived
/// after the head; they belong to the first frames.
pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(UpgradeRequest, Vec<u8>), HandshakeError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = std::str::from_utf8(&buf[..end]).map_err(|_| HandshakeError::NotUtf8)?;
            let request = parse_request(head)?;
            return Ok((request, buf[end + 4..].to_vec()));
        }
        if buf.len() > MAX_REQUEST_SIZE {
            return Err(HandshakeError::TooLarge);
        }

        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(HandshakeError::Closed);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// The `101 Switching Protocols` reply.
pub fn response(request: &UpgradeRequest) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(&request.key)
    )
}
