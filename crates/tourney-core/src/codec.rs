//! Length-framed packet codec.
//!
//! Frame layout:
//!
//! ```text
//! +--------+---------+----------------+-----------------+
//! | "moon" | version | payload length | payload (JSON)  |
//! | 4 B    | 1 B     | u32 big endian | length bytes    |
//! +--------+---------+----------------+-----------------+
//! ```
//!
//! Stream transports feed raw reads into a [`Reassembler`], which yields
//! packets in order and skips forward past bytes that cannot start a header.

use crate::Packet;

pub const MAGIC: [u8; 4] = *b"moon";
pub const VERSION: u8 = 1;
/// Bytes needed before the declared payload length is readable.
pub const HEADER_SIZE: usize = MAGIC.len() + 1 + 4;
/// Largest payload a header may declare.
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

/// Errors from encoding or decoding packets.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed packet: {0}")]
    MalformedPacket(#[source] serde_json::Error),
    #[error("bad packet header")]
    BadHeader,
    #[error("header declares {declared} bytes, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("payload of {0} bytes exceeds the {max} byte limit", max = MAX_PAYLOAD_SIZE)]
    TooLarge(usize),
    #[error("failed to encode packet: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Encode a packet without a frame header.
pub fn encode_payload(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    let bytes = serde_json::to_vec(packet).map_err(CodecError::Encode)?;
    if bytes.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::TooLarge(bytes.len()));
    }
    Ok(bytes)
}

/// Decode a headerless packet payload.
pub fn decode_payload(bytes: &[u8]) -> Result<Packet, CodecError> {
    if bytes.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::TooLarge(bytes.len()));
    }
    serde_json::from_slice(bytes).map_err(CodecError::MalformedPacket)
}

/// Encode a packet into a complete frame.
pub fn serialize(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    let payload = encode_payload(packet)?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&MAGIC);
    frame.push(VERSION);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode exactly one complete frame.
pub fn deserialize(bytes: &[u8]) -> Result<Packet, CodecError> {
    if !looks_like_header_at(bytes) {
        return Err(CodecError::BadHeader);
    }
    let declared = declared_size(bytes).ok_or(CodecError::BadHeader)?;
    if declared != bytes.len() {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: bytes.len(),
        });
    }
    decode_payload(&bytes[HEADER_SIZE..])
}

/// Whether `buf` could be the start of a frame.
///
/// Only the bytes present are checked: a buffer holding `"mo"` is still
/// plausible. Once the length is readable it must be within bounds.
pub fn looks_like_header_at(buf: &[u8]) -> bool {
    let prefix = buf.len().min(MAGIC.len());
    if buf[..prefix] != MAGIC[..prefix] {
        return false;
    }
    if let Some(&version) = buf.get(MAGIC.len()) {
        if version != VERSION {
            return false;
        }
    }
    match payload_len(buf) {
        Some(len) => len <= MAX_PAYLOAD_SIZE,
        None => true,
    }
}

/// Total frame size (header plus payload) declared by the header at the
/// front of `buf`, or `None` while the header is incomplete.
pub fn declared_size(buf: &[u8]) -> Option<usize> {
    payload_len(buf).map(|len| HEADER_SIZE + len)
}

fn payload_len(buf: &[u8]) -> Option<usize> {
    let bytes: [u8; 4] = buf.get(MAGIC.len() + 1..HEADER_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes) as usize)
}

/// Turns a byte stream back into packets.
///
/// Owned by a single read loop; feed every read with [`extend`](Self::extend)
/// and drain with [`next_packet`](Self::next_packet) until it returns `None`.
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: Vec<u8>,
    discarded: usize,
    /// Offset up to which the pending frame has been searched for a marker.
    scanned: usize,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Bytes skipped while resynchronising.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Next complete packet, if one is buffered.
    ///
    /// A frame that fails to decode yields its error and costs `HEADER_SIZE`
    /// bytes; scanning resumes from there on the next call. A header whose
    /// frame would swallow a later magic+version marker is garbage and is
    /// skipped up to that marker.
    pub fn next_packet(&mut self) -> Option<Result<Packet, CodecError>> {
        loop {
            if self.buf.len() < HEADER_SIZE {
                return None;
            }

            let skip = (0..self.buf.len())
                .find(|&i| looks_like_header_at(&self.buf[i..]))
                .unwrap_or(self.buf.len());
            if skip > 0 {
                self.discard(skip);
                continue;
            }

            let total = declared_size(&self.buf)?;
            if let Some(marker) = self.marker_within(total) {
                self.discard(marker);
                continue;
            }
            if self.buf.len() < total {
                return None;
            }

            return match deserialize(&self.buf[..total]) {
                Ok(packet) => {
                    self.consume(total);
                    Some(Ok(packet))
                }
                Err(e) => {
                    self.discard(HEADER_SIZE);
                    Some(Err(e))
                }
            };
        }
    }

    /// Offset of a complete `MAGIC` + `VERSION` marker inside the first
    /// `total` bytes, past the header at the front. JSON payloads never hold
    /// a raw `VERSION` byte, so a valid frame has none.
    fn marker_within(&mut self, total: usize) -> Option<usize> {
        const MARKER_LEN: usize = MAGIC.len() + 1;
        let end = total.min(self.buf.len());
        let from = self.scanned.max(1);
        let buf = &self.buf;
        let found = (from..end).find(|&i| {
            buf.get(i..i + MARKER_LEN)
                .is_some_and(|m| m[..MAGIC.len()] == MAGIC && m[MAGIC.len()] == VERSION)
        });
        if found.is_none() {
            // Positions whose marker is not fully buffered yet are rechecked.
            self.scanned = end.min((buf.len() + 1).saturating_sub(MARKER_LEN)).max(from);
        }
        found
    }

    fn consume(&mut self, n: usize) {
        self.buf.drain(..n);
        self.scanned = 0;
    }

    fn discard(&mut self, n: usize) {
        self.consume(n);
        self.discarded += n;
    }
}
