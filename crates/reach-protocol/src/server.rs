//! Daemon-side accept loop: TCP and Unix-domain-socket listeners that
//! decode frames, dispatch `ExecRequest`/`HealthRequest`/`Hello` traffic,
//! and write back correlated responses.
//!
//! Generalizes the reference daemon's connection handler: where that
//! handler computed a stub digest and returned immediately, this one
//! hands the decoded request to an injected [`ExecutionDispatcher`] so the
//! execution core stays decoupled from the transport.

use crate::protocol::message::{
    ErrorCode, ErrorPayload, ExecRequestPayload, ExecResultPayload, HealthRequestPayload,
    HealthResultPayload, HealthStatus, HelloAckPayload, HelloPayload,
};
use crate::protocol::{
    deserialize_message, frame_message, Frame, FrameError, MessageType, ProtocolError,
    ProtocolStats, StreamingFrameParser, DEFAULT_STREAM_BUFFER_CAP, MAX_UNTRUSTED_ALLOCATION,
};

use async_trait::async_trait;
use bytes::BytesMut;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

#[cfg(unix)]
use tokio::net::UnixListener;

/// Executes an admitted run and produces its result. Implemented by the
/// engine crate; the protocol layer never constructs run state itself.
#[async_trait]
pub trait ExecutionDispatcher: Send + Sync {
    async fn execute(&self, request: ExecRequestPayload) -> ExecResultPayload;
    async fn health(&self, detailed: bool) -> HealthResultPayload;
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tcp_bind: Option<String>,
    pub socket_path: Option<String>,
    pub max_connections: usize,
    pub max_concurrent_runs: usize,
    pub connection_timeout_secs: u64,
    pub max_request_size: usize,
    pub require_crc: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let concurrency = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4)
            .min(32);

        Self {
            tcp_bind: None,
            socket_path: default_socket_path(),
            max_concurrent_runs: concurrency,
            max_connections: concurrency,
            connection_timeout_secs: 300,
            max_request_size: crate::protocol::frame::MAX_PAYLOAD_BYTES as usize,
            require_crc: true,
        }
    }
}

#[cfg(unix)]
fn default_socket_path() -> Option<String> {
    Some("/tmp/reach.sock".to_string())
}

#[cfg(windows)]
fn default_socket_path() -> Option<String> {
    None
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no transport configured: set tcp_bind or socket_path")]
    NoTransportConfigured,

    #[error("failed to bind TCP listener at {addr}: {source}")]
    TcpBindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[cfg(unix)]
    #[error("failed to bind Unix socket at {path}: {source}")]
    UnixBindFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

struct ConnectionInfo {
    #[allow(dead_code)]
    session_id: String,
    client_name: String,
    client_version: String,
    connected_at: Instant,
}

#[derive(Default)]
struct ServerState {
    connections: HashMap<String, ConnectionInfo>,
    next_session_id: u64,
}

pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<dyn ExecutionDispatcher>,
    state: Arc<RwLock<ServerState>>,
    stats: Arc<RwLock<ProtocolStats>>,
    shutdown: broadcast::Sender<()>,
    started_at: Instant,
}

impl Server {
    #[must_use]
    pub fn new(config: ServerConfig, dispatcher: Arc<dyn ExecutionDispatcher>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            dispatcher,
            state: Arc::new(RwLock::new(ServerState::default())),
            stats: Arc::new(RwLock::new(ProtocolStats::default())),
            shutdown,
            started_at: Instant::now(),
        }
    }

    pub async fn run(&self) -> Result<(), ServerError> {
        if self.config.tcp_bind.is_none() && self.config.socket_path.is_none() {
            return Err(ServerError::NoTransportConfigured);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        // Gates admission into `dispatcher.execute`, independent of the
        // connection-accept semaphore above: a connection may sit idle or
        // heartbeat-only while many others are mid-run, so runs (not
        // sockets) are what the backpressure contract bounds.
        let run_semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_runs));
        let mut handles = Vec::new();

        if let Some(addr) = self.config.tcp_bind.clone() {
            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|source| ServerError::TcpBindFailed { addr: addr.clone(), source })?;
            info!(%addr, "listening on TCP");
            let dispatcher = self.dispatcher.clone();
            let state = self.state.clone();
            let stats = self.stats.clone();
            let sem = semaphore.clone();
            let run_sem = run_semaphore.clone();
            let mut shutdown_rx = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                run_tcp_server(listener, dispatcher, state, stats, sem, run_sem, &mut shutdown_rx).await;
            }));
        }

        #[cfg(unix)]
        if let Some(path) = self.config.socket_path.clone() {
            let _ = std::fs::remove_file(&path);
            let listener = UnixListener::bind(&path)
                .map_err(|source| ServerError::UnixBindFailed { path: path.clone(), source })?;
            info!(%path, "listening on Unix socket");
            let dispatcher = self.dispatcher.clone();
            let state = self.state.clone();
            let stats = self.stats.clone();
            let sem = semaphore.clone();
            let run_sem = run_semaphore.clone();
            let mut shutdown_rx = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                run_unix_server(listener, dispatcher, state, stats, sem, run_sem, &mut shutdown_rx).await;
            }));
        }

        let mut shutdown_rx = self.shutdown.subscribe();
        let _ = shutdown_rx.recv().await;

        for handle in handles {
            handle.abort();
        }

        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub async fn stats(&self) -> ProtocolStats {
        self.stats.read().await.clone()
    }

    pub async fn active_connections(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_tcp_server(
    listener: TcpListener,
    dispatcher: Arc<dyn ExecutionDispatcher>,
    state: Arc<RwLock<ServerState>>,
    stats: Arc<RwLock<ProtocolStats>>,
    semaphore: Arc<Semaphore>,
    run_semaphore: Arc<Semaphore>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let permit = semaphore.clone().acquire_owned().await.ok();
                        if permit.is_none() {
                            continue;
                        }
                        debug!(%addr, "accepted TCP connection");
                        let dispatcher = dispatcher.clone();
                        let state = state.clone();
                        let stats = stats.clone();
                        let run_semaphore = run_semaphore.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            handle_connection(stream, dispatcher, state, stats, run_semaphore).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "TCP accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("TCP server shutting down");
                return;
            }
        }
    }
}

#[cfg(unix)]
#[allow(clippy::too_many_arguments)]
async fn run_unix_server(
    listener: UnixListener,
    dispatcher: Arc<dyn ExecutionDispatcher>,
    state: Arc<RwLock<ServerState>>,
    stats: Arc<RwLock<ProtocolStats>>,
    semaphore: Arc<Semaphore>,
    run_semaphore: Arc<Semaphore>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let permit = semaphore.clone().acquire_owned().await.ok();
                        if permit.is_none() {
                            continue;
                        }
                        debug!("accepted Unix socket connection");
                        let dispatcher = dispatcher.clone();
                        let state = state.clone();
                        let stats = stats.clone();
                        let run_semaphore = run_semaphore.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            handle_connection(stream, dispatcher, state, stats, run_semaphore).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Unix accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Unix server shutting down");
                return;
            }
        }
    }
}

async fn handle_connection<S: AsyncRead + AsyncWrite + Unpin>(
    mut stream: S,
    dispatcher: Arc<dyn ExecutionDispatcher>,
    state: Arc<RwLock<ServerState>>,
    stats: Arc<RwLock<ProtocolStats>>,
    run_semaphore: Arc<Semaphore>,
) {
    let mut read_buf = BytesMut::with_capacity(8192);
    // Pre-handshake: spec.md:99 caps untrusted allocation at 1 MiB. Widened
    // to the full streaming cap only once Hello/HelloAck completes below.
    let mut parser = StreamingFrameParser::with_cap(MAX_UNTRUSTED_ALLOCATION as usize);
    let mut session_id: Option<String> = None;

    loop {
        loop {
            match parser.parse(&mut read_buf) {
                Ok(Some(frame)) => {
                    stats.write().await.frames_received += 1;
                    let response = handle_frame(
                        frame,
                        &dispatcher,
                        &state,
                        &mut session_id,
                        &run_semaphore,
                    )
                    .await;

                    if session_id.is_some() {
                        parser.set_cap(DEFAULT_STREAM_BUFFER_CAP);
                    }

                    if let Some(response) = response {
                        let mut out = BytesMut::new();
                        if response.encode(&mut out).is_ok() {
                            if stream.write_all(&out).await.is_err() {
                                return;
                            }
                            let mut s = stats.write().await;
                            s.frames_sent += 1;
                            s.bytes_sent += out.len() as u64;
                        }
                    }
                }
                Ok(None) => break,
                Err(FrameError::BufferOverflow { .. }) => {
                    warn!("streaming buffer overflow; closing connection");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "frame error; closing connection");
                    return;
                }
            }
        }

        let mut chunk = [0u8; 8192];
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => {
                if let Some(id) = &session_id {
                    state.write().await.connections.remove(id);
                }
                return;
            }
            Ok(n) => {
                read_buf.extend_from_slice(&chunk[..n]);
                stats.write().await.bytes_received += n as u64;
            }
        }
    }
}

async fn handle_frame(
    frame: Frame,
    dispatcher: &Arc<dyn ExecutionDispatcher>,
    state: &Arc<RwLock<ServerState>>,
    session_id: &mut Option<String>,
    run_semaphore: &Arc<Semaphore>,
) -> Option<Frame> {
    let correlation_id = frame.correlation_id;

    let result: Result<Frame, ProtocolError> = async {
        match frame.msg_type {
            MessageType::Hello => {
                let hello: HelloPayload = deserialize_message(frame.payload())?;
                let mut s = state.write().await;
                s.next_session_id += 1;
                let id = format!("sess-{}", s.next_session_id);
                s.connections.insert(
                    id.clone(),
                    ConnectionInfo {
                        session_id: id.clone(),
                        client_name: hello.client_name,
                        client_version: hello.client_version,
                        connected_at: Instant::now(),
                    },
                );
                drop(s);
                *session_id = Some(id.clone());
                let ack = HelloAckPayload::new(id);
                frame_message(MessageType::HelloAck, &ack)
            }
            MessageType::ExecRequest => {
                if session_id.is_none() {
                    return Err(ProtocolError::NoSession);
                }
                // Admission is bounded, not queued: a saturated run
                // semaphore rejects outright with `ResourceExhausted`
                // rather than making the caller wait behind an unbounded
                // backlog of other runs.
                let Ok(_permit) = run_semaphore.try_acquire() else {
                    return Err(ProtocolError::ResourceExhausted);
                };
                let request: ExecRequestPayload = deserialize_message(frame.payload())?;
                let result = dispatcher.execute(request).await;
                frame_message(MessageType::ExecResult, &result)
            }
            MessageType::HealthRequest => {
                let request: HealthRequestPayload = deserialize_message(frame.payload())?;
                let result = dispatcher.health(request.detailed).await;
                frame_message(MessageType::HealthResult, &result)
            }
            MessageType::Heartbeat => {
                return Ok(Frame::new(MessageType::Heartbeat, vec![])?);
            }
            other => Err(ProtocolError::UnexpectedMessageType {
                expected: MessageType::Hello,
                got: other,
            }),
        }
    }
    .await;

    let frame = match result {
        Ok(frame) => frame,
        Err(e) => create_error_frame(&e, correlation_id),
    };

    Some(frame.with_correlation_id(correlation_id))
}

fn create_error_frame(error: &ProtocolError, correlation_id: u32) -> Frame {
    let code = match error {
        ProtocolError::Frame(FrameError::CrcMismatch { .. }) => ErrorCode::CrcMismatch,
        ProtocolError::Frame(FrameError::BufferOverflow { .. }) => ErrorCode::BufferOverflow,
        ProtocolError::Frame(FrameError::PayloadTooLarge { .. }) => ErrorCode::PayloadTooLarge,
        ProtocolError::Frame(FrameError::UnknownMessageType(_)) => ErrorCode::UnknownMsgType,
        ProtocolError::Frame(FrameError::UnsupportedVersion { .. }) => ErrorCode::UnsupportedVersion,
        ProtocolError::Frame(_) => ErrorCode::InvalidMessage,
        ProtocolError::Encoding(_) => ErrorCode::EncodingError,
        ProtocolError::VersionNegotiationFailed { .. } => ErrorCode::UnsupportedVersion,
        ProtocolError::CapabilityMismatch { .. } => ErrorCode::InvalidMessage,
        ProtocolError::UnexpectedMessageType { .. } => ErrorCode::InvalidMessage,
        ProtocolError::NoSession => ErrorCode::InvalidMessage,
        ProtocolError::Timeout => ErrorCode::ServiceUnavailable,
        ProtocolError::Shutdown => ErrorCode::ServiceUnavailable,
        ProtocolError::ResourceExhausted => ErrorCode::ResourceExhausted,
        ProtocolError::Io(_) => ErrorCode::ServiceUnavailable,
    };

    let payload = ErrorPayload {
        code,
        message: error.to_string(),
        details: std::collections::BTreeMap::new(),
        correlation_id,
    };

    frame_message(MessageType::Error, &payload)
        .unwrap_or_else(|_| Frame::new(MessageType::Error, vec![]).expect("empty payload always fits"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{Decision, ExecutionControls, Policy, RunStatus, Workflow};
    use crate::protocol::message::{ExecutionMetrics, Histogram};
    use reach_fixed::{FixedBps, FixedDuration, FixedQ32_32, FixedThroughput, SaturationFlags};
    use std::collections::BTreeMap;

    struct StubDispatcher;

    #[async_trait]
    impl ExecutionDispatcher for StubDispatcher {
        async fn execute(&self, request: ExecRequestPayload) -> ExecResultPayload {
            ExecResultPayload {
                run_id: request.run_id,
                status: RunStatus::Completed,
                result_digest: "blake3:stub".to_string(),
                events: vec![],
                final_action: None,
                metrics: ExecutionMetrics {
                    steps_executed: 0,
                    elapsed_us: FixedDuration::ZERO,
                    budget_spent_usd: FixedQ32_32::ZERO,
                    throughput: FixedThroughput::ZERO,
                    cas_hit_rate: FixedBps::ZERO,
                    latency_p50_us: FixedDuration::ZERO,
                    latency_p95_us: FixedDuration::ZERO,
                    latency_p99_us: FixedDuration::ZERO,
                    latency_histogram: Histogram { boundaries: vec![], counts: vec![] },
                    saturation: SaturationFlags::NONE,
                },
                session_id: "sess-test".to_string(),
            }
        }

        async fn health(&self, _detailed: bool) -> HealthResultPayload {
            HealthResultPayload {
                status: HealthStatus::Healthy,
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_us: FixedDuration::ZERO,
                load: None,
            }
        }
    }

    #[tokio::test]
    async fn hello_then_exec_roundtrip_through_handle_frame() {
        let dispatcher: Arc<dyn ExecutionDispatcher> = Arc::new(StubDispatcher);
        let state = Arc::new(RwLock::new(ServerState::default()));
        let run_semaphore = Arc::new(Semaphore::new(4));
        let mut session_id = None;

        let hello = HelloPayload::new("test-client", "0.1.0");
        let hello_frame = frame_message(MessageType::Hello, &hello).unwrap();
        let ack_frame = handle_frame(hello_frame, &dispatcher, &state, &mut session_id, &run_semaphore)
            .await
            .unwrap();
        assert_eq!(ack_frame.msg_type, MessageType::HelloAck);
        assert!(session_id.is_some());

        let request = ExecRequestPayload {
            run_id: "run-1".to_string(),
            workflow: Workflow { name: "wf".into(), version: "1.0".into(), steps: BTreeMap::new() },
            controls: ExecutionControls::default(),
            policy: Policy { rules: vec![], default_decision: Decision::Allow },
            metadata: BTreeMap::new(),
        };
        let exec_frame = frame_message(MessageType::ExecRequest, &request).unwrap();
        let result_frame = handle_frame(exec_frame, &dispatcher, &state, &mut session_id, &run_semaphore)
            .await
            .unwrap();
        assert_eq!(result_frame.msg_type, MessageType::ExecResult);
    }

    #[tokio::test]
    async fn exec_request_without_hello_is_rejected() {
        let dispatcher: Arc<dyn ExecutionDispatcher> = Arc::new(StubDispatcher);
        let state = Arc::new(RwLock::new(ServerState::default()));
        let run_semaphore = Arc::new(Semaphore::new(4));
        let mut session_id = None;

        let request = ExecRequestPayload {
            run_id: "run-1".to_string(),
            workflow: Workflow { name: "wf".into(), version: "1.0".into(), steps: BTreeMap::new() },
            controls: ExecutionControls::default(),
            policy: Policy { rules: vec![], default_decision: Decision::Allow },
            metadata: BTreeMap::new(),
        };
        let exec_frame = frame_message(MessageType::ExecRequest, &request).unwrap();
        let response = handle_frame(exec_frame, &dispatcher, &state, &mut session_id, &run_semaphore)
            .await
            .unwrap();
        assert_eq!(response.msg_type, MessageType::Error);
    }

    #[tokio::test]
    async fn exec_request_rejected_with_resource_exhausted_when_run_semaphore_saturated() {
        let dispatcher: Arc<dyn ExecutionDispatcher> = Arc::new(StubDispatcher);
        let state = Arc::new(RwLock::new(ServerState::default()));
        let run_semaphore = Arc::new(Semaphore::new(1));
        let mut session_id = None;

        let hello = HelloPayload::new("test-client", "0.1.0");
        let hello_frame = frame_message(MessageType::Hello, &hello).unwrap();
        handle_frame(hello_frame, &dispatcher, &state, &mut session_id, &run_semaphore).await;

        // Hold the only permit open across the next call.
        let _held = run_semaphore.clone().try_acquire_owned().unwrap();

        let request = ExecRequestPayload {
            run_id: "run-1".to_string(),
            workflow: Workflow { name: "wf".into(), version: "1.0".into(), steps: BTreeMap::new() },
            controls: ExecutionControls::default(),
            policy: Policy { rules: vec![], default_decision: Decision::Allow },
            metadata: BTreeMap::new(),
        };
        let exec_frame = frame_message(MessageType::ExecRequest, &request).unwrap();
        let response = handle_frame(exec_frame, &dispatcher, &state, &mut session_id, &run_semaphore)
            .await
            .unwrap();
        assert_eq!(response.msg_type, MessageType::Error);
        let payload: ErrorPayload = deserialize_message(response.payload()).unwrap();
        assert!(matches!(payload.code, ErrorCode::ResourceExhausted));
    }
}
