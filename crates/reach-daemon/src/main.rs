//! `reach-daemon`: binds the execution engine to the wire protocol over
//! TCP and/or a Unix domain socket.
//!
//! Exit codes: `0` normal shutdown, `2` configuration error, `3`
//! transport bind failure, `4` protocol-version floor breach.

mod env_filter;

use clap::{Parser, Subcommand};
use reach_engine::EngineDispatcher;
use reach_protocol::server::{Server, ServerConfig, ServerError};
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "reach-daemon", version = reach_protocol::VERSION, about = "Deterministic decision-execution daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon and accept connections until shut down.
    Serve {
        /// Unix domain socket path to bind.
        #[arg(long)]
        socket: Option<String>,

        /// TCP address to bind, e.g. `127.0.0.1:7878`.
        #[arg(long)]
        tcp: Option<String>,

        /// Maximum concurrent connections admitted before new ones block.
        #[arg(long)]
        max_connections: Option<usize>,

        /// Maximum concurrently-executing runs before new `ExecRequest`
        /// frames are rejected with `ResourceExhausted` instead of queued.
        #[arg(long)]
        max_concurrent_runs: Option<usize>,

        /// Lowest protocol major.minor this daemon will refuse to start
        /// below, e.g. `1.0`. Exists to catch a misconfigured deployment
        /// pinning a floor the running binary cannot actually satisfy.
        #[arg(long, default_value = "1.0")]
        min_protocol_version: String,

        /// Directory to persist each run's replay log to, as
        /// `<dir>/<run_id>.bin`. Omit to run with no replay persistence.
        #[arg(long)]
        replay_log_dir: Option<std::path::PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    log_startup_environment();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            socket,
            tcp,
            max_connections,
            max_concurrent_runs,
            min_protocol_version,
            replay_log_dir,
        } => run_serve(
            socket,
            tcp,
            max_connections,
            max_concurrent_runs,
            &min_protocol_version,
            replay_log_dir,
        ),
    }
}

fn log_startup_environment() {
    for (key, _value) in std::env::vars() {
        if env_filter::should_filter(&key) {
            continue;
        }
        tracing::debug!(env.key = %key, "startup environment variable present");
    }
}

fn parse_protocol_floor(spec: &str) -> Option<(u16, u16)> {
    let (major, minor) = spec.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

fn run_serve(
    socket: Option<String>,
    tcp: Option<String>,
    max_connections: Option<usize>,
    max_concurrent_runs: Option<usize>,
    min_protocol_version: &str,
    replay_log_dir: Option<std::path::PathBuf>,
) -> ExitCode {
    let Some((major, minor)) = parse_protocol_floor(min_protocol_version) else {
        error!(value = min_protocol_version, "invalid --min-protocol-version, expected MAJOR.MINOR");
        return ExitCode::from(2);
    };

    if !reach_protocol::is_supported(major, minor) {
        error!(
            requested = min_protocol_version,
            running = reach_protocol::VERSION,
            "this daemon build does not support the requested protocol floor"
        );
        return ExitCode::from(4);
    }

    let mut config = ServerConfig::default();
    if socket.is_some() || tcp.is_some() {
        config.socket_path = socket;
        config.tcp_bind = tcp;
    }
    if let Some(max) = max_connections {
        config.max_connections = max;
    }
    if let Some(max) = max_concurrent_runs {
        config.max_concurrent_runs = max;
    }

    let dispatcher = match replay_log_dir {
        Some(dir) => {
            if let Err(err) = std::fs::create_dir_all(&dir) {
                error!(dir = %dir.display(), error = %err, "failed to create replay log directory");
                return ExitCode::from(2);
            }
            EngineDispatcher::with_replay_log_dir(dir)
        }
        None => EngineDispatcher::new(),
    };
    let server = Server::new(config, dispatcher);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            error!(error = %err, "failed to start tokio runtime");
            return ExitCode::from(2);
        }
    };

    let outcome = runtime.block_on(async {
        tokio::select! {
            result = server.run() => result,
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                server.shutdown();
                Ok(())
            }
        }
    });

    match outcome {
        Ok(()) => {
            info!("shut down normally");
            ExitCode::SUCCESS
        }
        Err(ServerError::NoTransportConfigured) => {
            error!("no transport configured: pass --socket or --tcp");
            ExitCode::from(2)
        }
        Err(err @ (ServerError::TcpBindFailed { .. } | ServerError::UnixBindFailed { .. })) => {
            error!(error = %err, "failed to bind transport");
            ExitCode::from(3)
        }
    }
}
