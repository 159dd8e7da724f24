//! Binary frame format.
//!
//! ```text
//! offset  size  field
//! 0       4     magic = 0x52454348 ("RECH")
//! 4       2     version_major
//! 6       2     version_minor
//! 8       4     msg_type
//! 12      4     flags (bit 0 compressed, bit 1 end-of-stream, bit 2 correlation-present)
//! 16      4     correlation_id
//! 20      4     payload_len
//! 24      N     payload
//! 24+N    4     crc32c (over header+payload, excluding footer)
//! ```

use bytes::{Buf, BufMut, BytesMut};
use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

pub const MAGIC: u32 = 0x5245_4348;
pub const MAX_PAYLOAD_BYTES: u32 = 64 * 1024 * 1024;
pub const HEADER_SIZE: usize = 24;
pub const FOOTER_SIZE: usize = 4;
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + FOOTER_SIZE;
pub const MAX_UNTRUSTED_ALLOCATION: u32 = 1024 * 1024;
pub const PROTOCOL_VERSION_MAJOR: u16 = 1;
pub const PROTOCOL_VERSION_MINOR: u16 = 0;

/// Default cap on the streaming parser's internal buffer before
/// `BufferOverflow` is raised.
pub const DEFAULT_STREAM_BUFFER_CAP: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(pub u32);

impl FrameFlags {
    pub const NONE: Self = Self(0);
    pub const COMPRESSED: Self = Self(1 << 0);
    pub const EOS: Self = Self(1 << 1);
    pub const CORRELATION: Self = Self(1 << 2);

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum MessageType {
    Heartbeat = 0x00,
    Hello = 0x01,
    HelloAck = 0x02,
    ExecRequest = 0x10,
    ExecResult = 0x11,
    HealthRequest = 0x20,
    HealthResult = 0x21,
    Error = 0xFF,
}

impl MessageType {
    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x00 => Some(Self::Heartbeat),
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::HelloAck),
            0x10 => Some(Self::ExecRequest),
            0x11 => Some(Self::ExecResult),
            0x20 => Some(Self::HealthRequest),
            0x21 => Some(Self::HealthResult),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid magic number: expected {expected:08X}, got {got:08X}")]
    InvalidMagic { expected: u32, got: u32 },

    #[error("unsupported protocol version: major={major}, minor={minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("unknown message type: {0:#08X}")]
    UnknownMessageType(u32),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u32, max: u32 },

    #[error("payload length mismatch: header says {expected}, got {actual}")]
    PayloadLengthMismatch { expected: usize, actual: usize },

    #[error("CRC32C mismatch: expected {expected:08X}, calculated {calculated:08X}")]
    CrcMismatch { expected: u32, calculated: u32 },

    #[error("incomplete frame: need {needed} more bytes")]
    Incomplete { needed: usize },

    #[error("streaming buffer exceeded cap of {cap} bytes")]
    BufferOverflow { cap: usize },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version_major: u16,
    pub version_minor: u16,
    pub msg_type: MessageType,
    pub flags: FrameFlags,
    pub correlation_id: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: MessageType, payload: Vec<u8>) -> Result<Self, FrameError> {
        let payload_len = payload.len() as u32;
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(FrameError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_BYTES,
            });
        }

        Ok(Self {
            version_major: PROTOCOL_VERSION_MAJOR,
            version_minor: PROTOCOL_VERSION_MINOR,
            msg_type,
            flags: FrameFlags::NONE,
            correlation_id: 0,
            payload,
        })
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: u32) -> Self {
        self.correlation_id = id;
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }

    fn calculate_crc(&self) -> u32 {
        let mut hasher = crc32c::Hasher::new();
        hasher.update(&MAGIC.to_le_bytes());
        hasher.update(&self.version_major.to_le_bytes());
        hasher.update(&self.version_minor.to_le_bytes());
        hasher.update(&self.msg_type.to_u32().to_le_bytes());
        hasher.update(&self.flags.0.to_le_bytes());
        hasher.update(&self.correlation_id.to_le_bytes());
        hasher.update(&(self.payload.len() as u32).to_le_bytes());
        hasher.update(&self.payload);
        hasher.finalize()
    }

    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        let payload_len = self.payload.len();
        let total_len = FRAME_OVERHEAD + payload_len;

        dst.reserve(total_len);
        dst.put_u32_le(MAGIC);
        dst.put_u16_le(self.version_major);
        dst.put_u16_le(self.version_minor);
        dst.put_u32_le(self.msg_type.to_u32());
        dst.put_u32_le(self.flags.0);
        dst.put_u32_le(self.correlation_id);
        dst.put_u32_le(payload_len as u32);
        dst.extend_from_slice(&self.payload);
        dst.put_u32_le(self.calculate_crc());

        Ok(())
    }

    /// Decodes a single frame. Rejects `version_major` values other than
    /// the compiled-in major before accepting the frame, so a client never
    /// has to decode a payload it cannot understand.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, FrameError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut peek = src.as_ref();

        let magic = peek.get_u32_le();
        if magic != MAGIC {
            return Err(FrameError::InvalidMagic {
                expected: MAGIC,
                got: magic,
            });
        }

        let version_major = peek.get_u16_le();
        let version_minor = peek.get_u16_le();
        if version_major != PROTOCOL_VERSION_MAJOR {
            return Err(FrameError::UnsupportedVersion {
                major: version_major,
                minor: version_minor,
            });
        }

        let msg_type_raw = peek.get_u32_le();
        let msg_type =
            MessageType::from_u32(msg_type_raw).ok_or(FrameError::UnknownMessageType(msg_type_raw))?;

        let flags = FrameFlags(peek.get_u32_le());
        let correlation_id = peek.get_u32_le();
        let payload_len = peek.get_u32_le();

        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(FrameError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_BYTES,
            });
        }

        let total_frame_len = FRAME_OVERHEAD + payload_len as usize;
        if src.len() < total_frame_len {
            return Ok(None);
        }

        src.advance(HEADER_SIZE);

        let mut payload =
            Vec::with_capacity(std::cmp::min(payload_len, MAX_UNTRUSTED_ALLOCATION) as usize);
        payload.extend_from_slice(&src[..payload_len as usize]);
        src.advance(payload_len as usize);

        let expected_crc = src.get_u32_le();

        let frame = Self {
            version_major,
            version_minor,
            msg_type,
            flags,
            correlation_id,
            payload,
        };

        let calculated_crc = frame.calculate_crc();
        if expected_crc != calculated_crc {
            return Err(FrameError::CrcMismatch {
                expected: expected_crc,
                calculated: calculated_crc,
            });
        }

        Ok(Some(frame))
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Frame::decode(src)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)
    }
}

/// Streaming frame parser with resync-on-corruption recovery.
///
/// On `InvalidMagic` it scans forward for the next magic sequence and
/// drops bytes up to it, preserving a trailing partial-magic tail (at most
/// 3 bytes) instead of discarding it, so a magic sequence split across two
/// `feed` calls is not lost. The buffer is capped; exceeding the cap raises
/// `BufferOverflow` rather than silently truncating.
pub struct StreamingFrameParser {
    cap: usize,
}

impl Default for StreamingFrameParser {
    fn default() -> Self {
        Self {
            cap: DEFAULT_STREAM_BUFFER_CAP,
        }
    }
}

impl StreamingFrameParser {
    #[must_use]
    pub fn with_cap(cap: usize) -> Self {
        Self { cap }
    }

    /// Raises or lowers the buffer cap in place, preserving any bytes
    /// already buffered by the caller. Used to widen the cap from the
    /// pre-handshake [`MAX_UNTRUSTED_ALLOCATION`] ceiling to
    /// [`DEFAULT_STREAM_BUFFER_CAP`] once a session is established.
    pub fn set_cap(&mut self, cap: usize) {
        self.cap = cap;
    }

    /// Attempts to decode the next frame out of `src`, resyncing past
    /// corrupted bytes as needed. Returns `Ok(None)` when more data is
    /// needed, `Ok(Some(frame))` on success, `Err` only for unrecoverable
    /// conditions (unknown message type, oversized payload, buffer cap).
    pub fn parse(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            if src.len() > self.cap {
                return Err(FrameError::BufferOverflow { cap: self.cap });
            }

            match Frame::decode(src) {
                Ok(frame) => return Ok(frame),
                Err(FrameError::InvalidMagic { .. }) => {
                    if let Some(pos) = find_magic(src) {
                        if pos > 0 {
                            src.advance(pos);
                        }
                        continue;
                    }
                    // No full magic in the buffer. Preserve a trailing
                    // partial match (up to 3 bytes) in case the rest of
                    // the magic sequence arrives in the next chunk.
                    let keep = trailing_partial_magic_len(src);
                    let drop_len = src.len() - keep;
                    if drop_len > 0 {
                        src.advance(drop_len);
                    }
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn find_magic(src: &BytesMut) -> Option<usize> {
    let magic_bytes = MAGIC.to_le_bytes();
    src.windows(4).position(|window| window == magic_bytes)
}

/// Returns how many trailing bytes of `src` form a prefix of the magic
/// sequence (0..=3), so resync never discards a split magic.
fn trailing_partial_magic_len(src: &BytesMut) -> usize {
    let magic_bytes = MAGIC.to_le_bytes();
    let max_check = std::cmp::min(3, src.len());
    for len in (1..=max_check).rev() {
        let tail = &src[src.len() - len..];
        if tail == &magic_bytes[..len] {
            return len;
        }
    }
    0
}

const _ASSERT_HEADER_SIZE: () = assert!(HEADER_SIZE == 24, "Header size must be 24 bytes");
const _ASSERT_FRAME_OVERHEAD: () = assert!(FRAME_OVERHEAD == 28, "Frame overhead must be 28 bytes");
const _ASSERT_MAGIC_VALUE: () = assert!(MAGIC == 0x5245_4348, "Magic must be 'RECH'");
const _ASSERT_MAX_PAYLOAD: () = assert!(MAX_PAYLOAD_BYTES == 64 * 1024 * 1024, "Max payload must be 64 MiB");
