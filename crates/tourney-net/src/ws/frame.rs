//! WebSocket frame encoding and incremental decoding (RFC 6455 section 5).
//!
//! ```text
//!  0               1               2               3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| payload len |   extended payload length     |
//! |I|S|S|S|  (4)  |A|     (7)     |        (16 or 64 bits)        |
//! |N|V|V|V|       |S|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     masking key (0 or 4 bytes)      |     payload data ...    |
//! +-------------------------------------+-------------------------+
//! ```

use tourney_core::codec::MAX_PAYLOAD_SIZE;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        self.as_u8() & 0x8 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    /// Unmasked payload.
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("reserved bits set")]
    ReservedBits,
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("control frame payload of {0} bytes")]
    ControlTooLong(u64),
    #[error("fragmented control frame")]
    FragmentedControl,
    #[error("frame payload of {0} bytes exceeds limit")]
    TooLarge(u64),
}

/// XOR `data` with the four-byte masking key.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Encode a single final frame. Servers pass `None`; clients must mask.
pub fn encode(opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push(0x80 | opcode.as_u8());

    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    match payload.len() {
        len if len <= MAX_CONTROL_PAYLOAD => out.push(mask_bit | len as u8),
        len if len <= u16::MAX as usize => {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(payload),
    }
    out
}

/// Close frame payload: status code followed by an optional reason.
pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend_from_slice(reason.as_bytes());
    payload.truncate(MAX_CONTROL_PAYLOAD);
    payload
}

/// Accumulates bytes and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, `Ok(None)` if more bytes are needed. Errors are
    /// not recoverable; the connection should be closed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let buf = &self.buf;
        if buf.len() < 2 {
            return Ok(None);
        }

        let (b0, b1) = (buf[0], buf[1]);
        if b0 & 0x70 != 0 {
            return Err(FrameError::ReservedBits);
        }
        let fin = b0 & 0x80 != 0;
        let opcode = Opcode::from_u8(b0 & 0x0F).ok_or(FrameError::UnknownOpcode(b0 & 0x0F))?;
        let masked = b1 & 0x80 != 0;

        let (len, mut offset) = match b1 & 0x7F {
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
            }
            127 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&buf[2..10]);
                (u64::from_be_bytes(bytes), 10)
            }
            len => (u64::from(len), 2),
        };

        if opcode.is_control() {
            if !fin {
                return Err(FrameError::FragmentedControl);
            }
            if len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(FrameError::ControlTooLong(len));
            }
        }
        if len > MAX_PAYLOAD_SIZE as u64 {
            return Err(FrameError::TooLarge(len));
        }
        let len = len as usize;

        let key = if masked {
            if buf.len() < offset + 4 {
                return Ok(None);
            }
            let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
            offset += 4;
            Some(key)
        } else {
            None
        };

        if buf.len() < offset + len {
            return Ok(None);
        }

        let mut payload = buf[offset..offset + len].to_vec();
        if let Some(key) = key {
            apply_mask(&mut payload, key);
        }
        self.buf.drain(..offset + len);

        Ok(Some(Frame {
            fin,
            opcode,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        decoder.extend(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame().unwrap() {
            frames.push(frame);
        }
        assert_eq!(decoder.buffered(), 0);
        frames
    }

    #[test]
    fn length_encodings_round_trip() {
        for len in [0, 10, 125, 126, 65535, 65536, 70_000] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            for mask in [None, Some([0x12, 0x34, 0x56, 0x78])] {
                let encoded = encode(Opcode::Binary, &payload, mask);
                let header = match len {
                    0..=125 => 2,
                    126..=65535 => 4,
                    _ => 10,
                } + if mask.is_some() { 4 } else { 0 };
                assert_eq!(encoded.len(), header + len, "len {len}");

                let frames = decode_all(&encoded);
                assert_eq!(frames.len(), 1);
                assert!(frames[0].fin);
                assert_eq!(frames[0].opcode, Opcode::Binary);
                assert_eq!(frames[0].payload, payload, "len {len}");
            }
        }
    }

    #[test]
    fn rfc_masked_hello() {
        // Example from RFC 6455 section 5.7.
        let bytes = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let frames = decode_all(&bytes);
        assert_eq!(frames[0].opcode, Opcode::Text);
        assert_eq!(frames[0].payload, b"Hello");
    }

    #[test]
    fn server_frames_are_unmasked() {
        let encoded = encode(Opcode::Text, b"Hello", None);
        assert_eq!(encoded, [0x81, 0x05, b'H', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn byte_at_a_time() {
        let payload = vec![7u8; 300];
        let encoded = encode(Opcode::Binary, &payload, Some([1, 2, 3, 4]));
        let mut decoder = FrameDecoder::new();
        for (i, byte) in encoded.iter().enumerate() {
            decoder.extend(&[*byte]);
            let frame = decoder.next_frame().unwrap();
            if i + 1 < encoded.len() {
                assert!(frame.is_none());
            } else {
                assert_eq!(frame.unwrap().payload, payload);
            }
        }
    }

    #[test]
    fn protocol_violations() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0xC2, 0x00]);
        assert_eq!(decoder.next_frame(), Err(FrameError::ReservedBits));

        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0x83, 0x00]);
        assert_eq!(decoder.next_frame(), Err(FrameError::UnknownOpcode(3)));

        let mut decoder = FrameDecoder::new();
        decoder.extend(&encode(Opcode::Ping, &[0u8; 126], None));
        assert_eq!(decoder.next_frame(), Err(FrameError::ControlTooLong(126)));

        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0x09, 0x00]);
        assert_eq!(decoder.next_frame(), Err(FrameError::FragmentedControl));

        let mut decoder = FrameDecoder::new();
        let mut huge = vec![0x82, 127];
        huge.extend_from_slice(&u64::MAX.to_be_bytes());
        decoder.extend(&huge);
        assert_eq!(decoder.next_frame(), Err(FrameError::TooLarge(u64::MAX)));
    }

    #[test]
    fn close_payload_carries_code() {
        let payload = close_payload(1000, "bye");
        assert_eq!(payload, [0x03, 0xE8, b'b', b'y', b'e']);
    }
}
