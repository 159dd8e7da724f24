//! Frame codec, message payloads, and the session state machine that sits
//! on top of both.

pub mod frame;
pub mod message;
pub mod session;

pub use frame::{
    Frame, FrameCodec, FrameError, FrameFlags, MessageType, StreamingFrameParser,
    DEFAULT_STREAM_BUFFER_CAP, MAX_UNTRUSTED_ALLOCATION,
};
pub use message::*;
pub use session::{PendingRequests, ReachClient, SessionError, SessionState};

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("version negotiation failed: client supports {client:?}, server requires {server:?}")]
    VersionNegotiationFailed {
        client: (u16, u16),
        server: (u16, u16),
    },

    #[error("capability mismatch: required {required:#x}, have {have:#x}")]
    CapabilityMismatch { required: u64, have: u64 },

    #[error("unexpected message type: expected {expected:?}, got {got:?}")]
    UnexpectedMessageType {
        expected: MessageType,
        got: MessageType,
    },

    #[error("no active session")]
    NoSession,

    #[error("request timed out")]
    Timeout,

    #[error("session is shutting down")]
    Shutdown,

    #[error("concurrent-run admission limit reached")]
    ResourceExhausted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const V1_0: Self = Self { major: 1, minor: 0 };

    #[must_use]
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    #[must_use]
    pub fn compatible_with(self, other: Self) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

pub fn serialize_message<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    message::encoding::encode_cbor(value).map_err(ProtocolError::Encoding)
}

pub fn deserialize_message<T: for<'de> serde::Deserialize<'de>>(
    bytes: &[u8],
) -> Result<T, ProtocolError> {
    message::encoding::decode_cbor(bytes).map_err(ProtocolError::Encoding)
}

pub fn frame_message<T: serde::Serialize>(
    msg_type: MessageType,
    value: &T,
) -> Result<Frame, ProtocolError> {
    let bytes = serialize_message(value)?;
    Ok(Frame::new(msg_type, bytes)?)
}

pub fn parse_frame_payload<T: for<'de> serde::Deserialize<'de>>(
    frame: &Frame,
) -> Result<T, ProtocolError> {
    deserialize_message(frame.payload())
}

#[derive(Debug, Clone, Default)]
pub struct ProtocolStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub crc_errors: u64,
    pub resync_events: u64,
    pub version: Option<ProtocolVersion>,
}

#[derive(Debug, Clone, Copy)]
pub struct ProtocolCapabilities {
    pub version: ProtocolVersion,
    pub encoding: Encoding,
    pub compression: bool,
    pub fixed_point: bool,
}

impl Default for ProtocolCapabilities {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::V1_0,
            encoding: Encoding::Cbor,
            compression: false,
            fixed_point: true,
        }
    }
}
