//! Gateway frame codec
//!
//! Encodes and decodes single unfragmented frames of the RFC 6455 wire format.
//!
//! ```text
//!  byte 0      byte 1         extended length     mask          payload
//! +--------+-+-------------+ - - - - - - - - - +- - - - - - -+- - - - - -
//! |FIN|op  |M| len (7 bit) | 0, 2 or 8 bytes   | 0 or 4 bytes| len bytes
//! +--------+-+-------------+ - - - - - - - - - +- - - - - - -+- - - - - -
//! ```
//!
//! The client only ever receives text and control frames from the gateway,
//! so any first byte other than a final text, ping or pong frame is read as
//! a close notice.

use super::CodecError;

const MASK_BIT: u8 = 0x80;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// Close code reported when a close frame carries no status (RFC 6455 7.4.1)
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Close code reported when the socket ended without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Final-fragment frame kinds this client writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Text,
    Close,
    Ping,
    Pong,
}

impl FrameType {
    /// First header byte: FIN bit plus opcode
    #[must_use]
    pub const fn header_byte(self) -> u8 {
        match self {
            Self::Text => 0x81,
            Self::Close => 0x88,
            Self::Ping => 0x89,
            Self::Pong => 0x8A,
        }
    }

    #[must_use]
    pub const fn from_header_byte(byte: u8) -> Option<Self> {
        match byte {
            0x81 => Some(Self::Text),
            0x88 => Some(Self::Close),
            0x89 => Some(Self::Ping),
            0x8A => Some(Self::Pong),
            _ => None,
        }
    }

    /// Low four bits of the header byte
    #[must_use]
    pub const fn opcode(self) -> u8 {
        self.header_byte() & 0x0F
    }
}

/// Encode one frame, masking with a fresh random key when `masked` is set
///
/// # Errors
/// `CodecError::PayloadTooLarge` if the length cannot be represented.
pub fn encode(payload: &[u8], frame_type: FrameType, masked: bool) -> Result<Vec<u8>, CodecError> {
    let mask = masked.then(rand::random::<[u8; 4]>);
    encode_with_mask(payload, frame_type, mask)
}

/// Encode one frame with an explicit mask key
pub fn encode_with_mask(
    payload: &[u8],
    frame_type: FrameType,
    mask: Option<[u8; 4]>,
) -> Result<Vec<u8>, CodecError> {
    let length = encode_length(payload.len() as u64, mask.is_some())?;

    let mut frame = Vec::with_capacity(1 + length.len() + 4 + payload.len());
    frame.push(frame_type.header_byte());
    frame.extend_from_slice(&length);

    match mask {
        Some(key) => {
            frame.extend_from_slice(&key);
            let start = frame.len();
            frame.extend_from_slice(payload);
            apply_mask(&mut frame[start..], key);
        }
        None => frame.extend_from_slice(payload),
    }

    Ok(frame)
}

/// Encode the length field (second header byte plus any extended length)
///
/// `<=125` uses one byte, `126..=65535` the 16-bit form and anything larger
/// the 64-bit form, whose most significant bit must be clear.
pub fn encode_length(len: u64, masked: bool) -> Result<Vec<u8>, CodecError> {
    let mask_bit = if masked { MASK_BIT } else { 0 };

    if len <= 125 {
        return Ok(vec![len as u8 | mask_bit]);
    }

    if let Ok(short) = u16::try_from(len) {
        let mut field = Vec::with_capacity(3);
        field.push(LEN_16 | mask_bit);
        field.extend_from_slice(&short.to_be_bytes());
        return Ok(field);
    }

    let bytes = len.to_be_bytes();
    if bytes[0] > 127 {
        return Err(CodecError::PayloadTooLarge { len });
    }

    let mut field = Vec::with_capacity(9);
    field.push(LEN_64 | mask_bit);
    field.extend_from_slice(&bytes);
    Ok(field)
}

/// XOR every byte with `key[i % 4]`; applying it twice restores the input
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Parsed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw first byte (FIN, RSV and opcode bits)
    pub first_byte: u8,
    pub masked: bool,
    pub mask: Option<[u8; 4]>,
    /// Bytes taken by the header, including extended length and mask
    pub header_len: usize,
    /// Declared payload length
    pub payload_len: u64,
}

impl FrameHeader {
    /// Parse a header from the start of `bytes`, or `None` if more bytes are needed
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 2 {
            return None;
        }

        let first_byte = bytes[0];
        let masked = bytes[1] & MASK_BIT != 0;
        let marker = bytes[1] & 0x7F;

        let (payload_len, mut offset) = match marker {
            LEN_16 => {
                let raw: [u8; 2] = bytes.get(2..4)?.try_into().ok()?;
                (u64::from(u16::from_be_bytes(raw)), 4)
            }
            LEN_64 => {
                let raw: [u8; 8] = bytes.get(2..10)?.try_into().ok()?;
                (u64::from_be_bytes(raw), 10)
            }
            literal => (u64::from(literal), 2),
        };

        let mask = if masked {
            let key: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
            offset += 4;
            Some(key)
        } else {
            None
        };

        Some(Self {
            first_byte,
            masked,
            mask,
            header_len: offset,
            payload_len,
        })
    }

    /// Low four bits of the first byte
    #[must_use]
    pub const fn opcode(&self) -> u8 {
        self.first_byte & 0x0F
    }

    #[must_use]
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_header_byte(self.first_byte)
    }

    /// Total bytes of header plus declared payload
    pub fn frame_len(&self) -> Result<usize, CodecError> {
        usize::try_from(self.payload_len)
            .ok()
            .and_then(|len| len.checked_add(self.header_len))
            .ok_or(CodecError::PayloadTooLarge { len: self.payload_len })
    }
}

/// Close code and reason sent by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseNotice {
    pub code: u16,
    pub reason: String,
}

impl CloseNotice {
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// The socket ended without a close frame
    #[must_use]
    pub fn abnormal() -> Self {
        Self::new(ABNORMAL_CLOSURE, "connection closed without close frame")
    }

    /// Read a close payload: a big-endian code followed by a UTF-8 reason
    #[must_use]
    pub fn from_payload(payload: &[u8]) -> Self {
        match payload {
            [hi, lo, reason @ ..] => Self::new(
                u16::from_be_bytes([*hi, *lo]),
                String::from_utf8_lossy(reason).into_owned(),
            ),
            _ => Self::new(NO_STATUS_RECEIVED, ""),
        }
    }
}

impl std::fmt::Display for CloseNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} {}", self.code, self.reason)
        }
    }
}

/// A decoded text or control frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub opcode: u8,
    pub masked: bool,
    pub header_len: usize,
    /// Declared payload length from the header
    pub payload_len: u64,
    /// Unmasked payload bytes that were present in the input
    pub payload: Vec<u8>,
}

impl DecodedFrame {
    /// Payload bytes still to be read from the stream
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.payload_len.saturating_sub(self.payload.len() as u64)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    #[must_use]
    pub fn frame_type(&self) -> Option<FrameType> {
        match self.opcode {
            0x1 => Some(FrameType::Text),
            0x9 => Some(FrameType::Ping),
            0xA => Some(FrameType::Pong),
            _ => None,
        }
    }
}

/// Result of decoding one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(DecodedFrame),
    Close(CloseNotice),
}

/// Decode the frame at the start of `bytes`
///
/// The payload may be shorter than declared; see [`DecodedFrame::remaining`].
///
/// # Errors
/// `CodecError::Incomplete` if the header itself is cut off.
pub fn decode(bytes: &[u8]) -> Result<Decoded, CodecError> {
    let header = FrameHeader::parse(bytes).ok_or(CodecError::Incomplete {
        available: bytes.len(),
    })?;

    let end = match usize::try_from(header.payload_len) {
        Ok(len) => header.header_len.saturating_add(len).min(bytes.len()),
        Err(_) => bytes.len(),
    };
    let mut payload = bytes[header.header_len..end].to_vec();
    if let Some(key) = header.mask {
        apply_mask(&mut payload, key);
    }

    match header.frame_type() {
        Some(FrameType::Text | FrameType::Ping | FrameType::Pong) => {
            Ok(Decoded::Frame(DecodedFrame {
                opcode: header.opcode(),
                masked: header.masked,
                header_len: header.header_len,
                payload_len: header.payload_len,
                payload,
            }))
        }
        _ => Ok(Decoded::Close(CloseNotice::from_payload(&payload))),
    }
}
