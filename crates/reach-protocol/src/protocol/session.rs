//! Client-side session: handshake, correlation-id bookkeeping, heartbeats,
//! and reconnect backoff on top of the frame codec.

use super::frame::{
    Frame, MessageType, StreamingFrameParser, DEFAULT_STREAM_BUFFER_CAP, MAX_UNTRUSTED_ALLOCATION,
};
use super::message::{Encoding, HelloAckPayload, HelloPayload};
use super::{deserialize_message, serialize_message, ProtocolError, ProtocolVersion};

use bytes::BytesMut;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

/// 5-state session lifecycle. `Connecting` covers the window between TCP/
/// socket establishment and the Hello/HelloAck exchange completing;
/// `Negotiating` covers the exchange itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Negotiating,
    Ready,
    Error,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("session not ready (state: {0:?})")]
    NotReady(SessionState),

    #[error("pending request table is full")]
    TableFull,

    #[error("request timed out waiting for a reply")]
    Timeout,

    #[error("correlation id channel dropped before a reply arrived")]
    ChannelDropped,

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
}

/// The only hash algorithm this core produces or accepts. A `HelloAck`
/// naming any other value is a hard abort, never a negotiation fallback.
const EXPECTED_HASH_VERSION: &str = "blake3";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);
const RECONNECT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_PENDING_REQUESTS: usize = 4096;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Table of in-flight requests keyed by a 31-bit wraparound correlation id.
/// Bit 31 is never set, so the id space is `[1, 0x7FFF_FFFF]` — zero is
/// reserved for unsolicited/fire-and-forget frames (heartbeats).
pub struct PendingRequests {
    next_id: AtomicU32,
    table: Mutex<HashMap<u32, (oneshot::Sender<Frame>, Instant)>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            table: Mutex::new(HashMap::new()),
        }
    }
}

impl PendingRequests {
    fn next_correlation_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) & 0x7FFF_FFFF;
            if id != 0 {
                return id;
            }
            // wrapped onto the reserved value; loop fetches the next one
        }
    }

    async fn register(&self) -> Result<(u32, oneshot::Receiver<Frame>), SessionError> {
        let mut table = self.table.lock().await;
        if table.len() >= MAX_PENDING_REQUESTS {
            return Err(SessionError::TableFull);
        }
        let id = self.next_correlation_id();
        let (tx, rx) = oneshot::channel();
        table.insert(id, (tx, Instant::now()));
        Ok((id, rx))
    }

    async fn complete(&self, correlation_id: u32, frame: Frame) {
        let mut table = self.table.lock().await;
        if let Some((tx, _)) = table.remove(&correlation_id) {
            let _ = tx.send(frame);
        }
    }

    /// Drops entries older than `max_age`, returning how many were swept.
    /// Run periodically so a peer that vanishes mid-request doesn't leak
    /// table slots forever.
    async fn sweep(&self, max_age: Duration) -> usize {
        let mut table = self.table.lock().await;
        let before = table.len();
        table.retain(|_, (_, inserted_at)| inserted_at.elapsed() < max_age);
        before - table.len()
    }
}

/// Client-side handle to a single Reach daemon connection.
///
/// Owns the read/write halves internally via spawned tasks; callers
/// interact through `call` (request/reply matched by correlation id) and
/// `state()`.
pub struct ReachClient {
    state: Arc<RwLock<SessionState>>,
    pending: Arc<PendingRequests>,
    outbound: mpsc::Sender<Frame>,
    session_id: Arc<RwLock<Option<String>>>,
}

impl ReachClient {
    /// Performs the handshake over an already-connected stream and spawns
    /// the reader/writer/heartbeat/sweeper tasks. Returns once `HelloAck`
    /// has been received and the session is `Ready`.
    pub async fn connect<S>(
        mut stream: S,
        client_name: impl Into<String>,
        client_version: impl Into<String>,
    ) -> Result<Self, SessionError>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let state = Arc::new(RwLock::new(SessionState::Connecting));
        let pending = Arc::new(PendingRequests::default());
        let session_id = Arc::new(RwLock::new(None));

        *state.write().await = SessionState::Negotiating;

        let hello = HelloPayload::new(client_name, client_version);
        let hello_frame = super::frame_message(MessageType::Hello, &hello)?;

        let mut write_buf = BytesMut::new();
        hello_frame.encode(&mut write_buf)?;
        stream
            .write_all(&write_buf)
            .await
            .map_err(ProtocolError::Io)?;

        let mut read_buf = BytesMut::with_capacity(4096);
        // Pre-handshake: spec.md:99 caps untrusted allocation at 1 MiB until
        // Hello/HelloAck completes. This parser is only ever used for the
        // handshake exchange below.
        let mut parser = StreamingFrameParser::with_cap(MAX_UNTRUSTED_ALLOCATION as usize);
        let await_ack = async {
            loop {
                let frame = loop {
                    if let Some(frame) =
                        parser.parse(&mut read_buf).map_err(ProtocolError::from)?
                    {
                        break frame;
                    }
                    let mut chunk = [0u8; 4096];
                    let n = stream.read(&mut chunk).await.map_err(ProtocolError::Io)?;
                    if n == 0 {
                        return Err(SessionError::ChannelDropped);
                    }
                    read_buf.extend_from_slice(&chunk[..n]);
                };
                if frame.msg_type != MessageType::HelloAck {
                    continue;
                }
                return Ok::<HelloAckPayload, SessionError>(deserialize_message(frame.payload())?);
            }
        };
        let ack = tokio::time::timeout(HANDSHAKE_TIMEOUT, await_ack)
            .await
            .map_err(|_| SessionError::HandshakeRejected("handshake timed out".to_string()))??;

        if !hello.supports_version(ack.selected_version.0, ack.selected_version.1) {
            *state.write().await = SessionState::Error;
            return Err(SessionError::HandshakeRejected(format!(
                "selected_version {:?} outside advertised range {:?}..={:?}",
                ack.selected_version, hello.min_version, hello.max_version
            )));
        }
        if ack.hash_version != EXPECTED_HASH_VERSION {
            *state.write().await = SessionState::Error;
            return Err(SessionError::HandshakeRejected(format!(
                "unexpected hash_version {:?}, expected {EXPECTED_HASH_VERSION:?}",
                ack.hash_version
            )));
        }
        if !super::message::CapabilityFlags(ack.capabilities)
            .contains(super::message::CapabilityFlags::BINARY_PROTOCOL)
        {
            *state.write().await = SessionState::Error;
            return Err(SessionError::HandshakeRejected(
                "server did not advertise BINARY_PROTOCOL capability".to_string(),
            ));
        }

        *session_id.write().await = Some(ack.session_id.clone());
        *state.write().await = SessionState::Ready;

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(256);
        let (mut read_half, mut write_half) = tokio::io::split(stream);

        let writer_state = state.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let mut buf = BytesMut::new();
                if frame.encode(&mut buf).is_err() {
                    continue;
                }
                if write_half.write_all(&buf).await.is_err() {
                    *writer_state.write().await = SessionState::Error;
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_state = state.clone();
        tokio::spawn(async move {
            let mut buf = BytesMut::with_capacity(8192);
            // Session is already `Ready` (Hello/HelloAck succeeded) by the
            // time this task is spawned, so the full streaming cap applies
            // from the start; constructed via the tight cap first and
            // widened immediately to mirror the pre-handshake/post-handshake
            // split used on the accept side in server.rs.
            let mut parser = StreamingFrameParser::with_cap(MAX_UNTRUSTED_ALLOCATION as usize);
            parser.set_cap(DEFAULT_STREAM_BUFFER_CAP);
            loop {
                loop {
                    match parser.parse(&mut buf) {
                        Ok(Some(frame)) => {
                            if frame.correlation_id != 0 {
                                reader_pending.complete(frame.correlation_id, frame).await;
                            }
                            continue;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "frame parse error on session read loop");
                            *reader_state.write().await = SessionState::Error;
                            return;
                        }
                    }
                }
                let mut chunk = [0u8; 4096];
                match read_half.read(&mut chunk).await {
                    Ok(0) | Err(_) => {
                        *reader_state.write().await = SessionState::Disconnected;
                        return;
                    }
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }
        });

        let heartbeat_tx = outbound_tx.clone();
        let heartbeat_state = state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                if *heartbeat_state.read().await != SessionState::Ready {
                    continue;
                }
                if let Ok(frame) = Frame::new(MessageType::Heartbeat, vec![]) {
                    if heartbeat_tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        });

        let sweep_pending = pending.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let swept = sweep_pending.sweep(DEFAULT_REQUEST_TIMEOUT * 2).await;
                if swept > 0 {
                    debug!(count = swept, "swept stale pending requests");
                }
            }
        });

        Ok(Self {
            state,
            pending,
            outbound: outbound_tx,
            session_id,
        })
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// Sends `msg_type`/`payload` and awaits the correlated reply, or
    /// `SessionError::Timeout` after [`DEFAULT_REQUEST_TIMEOUT`].
    pub async fn call<Req: serde::Serialize, Resp: for<'de> serde::Deserialize<'de>>(
        &self,
        msg_type: MessageType,
        payload: &Req,
    ) -> Result<Resp, SessionError> {
        if self.state().await != SessionState::Ready {
            return Err(SessionError::NotReady(self.state().await));
        }

        let (correlation_id, rx) = self.pending.register().await?;
        let bytes = serialize_message(payload)?;
        let frame = Frame::new(msg_type, bytes)?.with_correlation_id(correlation_id);

        self.outbound
            .send(frame)
            .await
            .map_err(|_| SessionError::ChannelDropped)?;

        let frame = tokio::time::timeout(DEFAULT_REQUEST_TIMEOUT, rx)
            .await
            .map_err(|_| SessionError::Timeout)?
            .map_err(|_| SessionError::ChannelDropped)?;

        Ok(deserialize_message(frame.payload())?)
    }
}

/// Exponential reconnect backoff, capped at [`RECONNECT_MAX_BACKOFF`].
/// Resets to [`RECONNECT_INITIAL_BACKOFF`] after a successful connection.
pub struct ReconnectBackoff {
    current: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            current: RECONNECT_INITIAL_BACKOFF,
        }
    }
}

impl ReconnectBackoff {
    pub fn reset(&mut self) {
        self.current = RECONNECT_INITIAL_BACKOFF;
    }

    /// Returns the delay to wait before the next attempt and advances the
    /// backoff state.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, RECONNECT_MAX_BACKOFF);
        delay
    }
}

#[allow(dead_code)]
fn default_encoding() -> Encoding {
    Encoding::Cbor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_skip_zero() {
        let pending = PendingRequests::default();
        for _ in 0..5 {
            let id = pending.next_correlation_id();
            assert_ne!(id, 0);
            assert_eq!(id & 0x8000_0000, 0);
        }
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let mut backoff = ReconnectBackoff::default();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), RECONNECT_MAX_BACKOFF);
    }

    #[test]
    fn backoff_resets() {
        let mut backoff = ReconnectBackoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), RECONNECT_INITIAL_BACKOFF);
    }

    #[tokio::test]
    async fn pending_table_completes_registered_request() {
        let pending = PendingRequests::default();
        let (id, rx) = pending.register().await.unwrap();
        let frame = Frame::new(MessageType::Heartbeat, vec![]).unwrap();
        pending.complete(id, frame.clone()).await;
        let received = rx.await.unwrap();
        assert_eq!(received.msg_type, frame.msg_type);
    }

    #[tokio::test]
    async fn sweep_removes_stale_entries() {
        let pending = PendingRequests::default();
        let _ = pending.register().await.unwrap();
        let swept = pending.sweep(Duration::from_secs(0)).await;
        assert_eq!(swept, 1);
    }

    async fn drive_handshake(mut ack: HelloAckPayload) -> Result<(), SessionError> {
        let (client_io, mut server_io) = tokio::io::duplex(8192);

        let server = tokio::spawn(async move {
            let mut buf = BytesMut::with_capacity(4096);
            let mut parser = StreamingFrameParser::default();
            let frame = loop {
                if let Some(frame) = parser.parse(&mut buf).unwrap() {
                    break frame;
                }
                let mut chunk = [0u8; 4096];
                let n = server_io.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
            };
            assert_eq!(frame.msg_type, MessageType::Hello);

            ack.session_id = "sess-handshake-test".to_string();
            let ack_frame = super::super::frame_message(MessageType::HelloAck, &ack).unwrap();
            let mut out = BytesMut::new();
            ack_frame.encode(&mut out).unwrap();
            server_io.write_all(&out).await.unwrap();
            // keep the pipe open so the reader task on the client side
            // doesn't observe EOF mid-assertion
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        let result = ReachClient::connect(client_io, "test-client", "0.0.0").await;
        server.abort();
        result.map(|_| ())
    }

    #[tokio::test]
    async fn handshake_rejects_wrong_hash_version() {
        let mut ack = HelloAckPayload::new("placeholder");
        ack.hash_version = "sha256".to_string();
        let err = drive_handshake(ack).await.unwrap_err();
        assert!(matches!(err, SessionError::HandshakeRejected(_)));
    }

    #[tokio::test]
    async fn handshake_rejects_missing_binary_protocol_capability() {
        let mut ack = HelloAckPayload::new("placeholder");
        ack.capabilities = 0;
        let err = drive_handshake(ack).await.unwrap_err();
        assert!(matches!(err, SessionError::HandshakeRejected(_)));
    }

    #[tokio::test]
    async fn handshake_rejects_out_of_range_version() {
        let mut ack = HelloAckPayload::new("placeholder");
        ack.selected_version = (9, 9);
        let err = drive_handshake(ack).await.unwrap_err();
        assert!(matches!(err, SessionError::HandshakeRejected(_)));
    }

    #[tokio::test]
    async fn handshake_accepts_well_formed_ack() {
        let ack = HelloAckPayload::new("placeholder");
        assert!(drive_handshake(ack).await.is_ok());
    }
}
