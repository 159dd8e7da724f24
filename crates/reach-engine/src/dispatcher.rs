//! Wires the execution engine into `reach_protocol::server::ExecutionDispatcher`
//! so the transport layer never touches run state directly.

use crate::cancel::CancellationToken;
use crate::engine;
use crate::observer::ObserverSet;
use crate::replay_log;
use async_trait::async_trait;
use reach_fixed::FixedDuration;
use reach_protocol::protocol::message::{
    ExecRequestPayload, ExecResultPayload, HealthResultPayload, HealthStatus, LoadMetrics,
};
use reach_protocol::server::ExecutionDispatcher;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// The engine crate's sole `ExecutionDispatcher` implementation. Holds no
/// run state of its own beyond in-flight/processed counters and a
/// cancellation-token registry keyed by `run_id`: every run's *output* is
/// computed fresh from its `ExecRequestPayload` by [`engine::execute`],
/// the registry only lets an embedder reach in and ask a specific
/// in-flight run to stop.
pub struct EngineDispatcher {
    started_at: Instant,
    active_runs: AtomicU32,
    completed_runs: AtomicU64,
    replay_log_dir: Option<PathBuf>,
    cancellations: RwLock<HashMap<String, CancellationToken>>,
    observers: ObserverSet,
}

impl EngineDispatcher {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started_at: Instant::now(),
            active_runs: AtomicU32::new(0),
            completed_runs: AtomicU64::new(0),
            replay_log_dir: None,
            cancellations: RwLock::new(HashMap::new()),
            observers: ObserverSet::new(),
        })
    }

    /// Same as [`Self::new`], but persists every run's events to
    /// `<dir>/<run_id>.bin` after it finishes. A write failure is logged
    /// and does not affect the run's result: the replay log is an
    /// operational aid, not part of the protocol contract.
    #[must_use]
    pub fn with_replay_log_dir(dir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            started_at: Instant::now(),
            active_runs: AtomicU32::new(0),
            completed_runs: AtomicU64::new(0),
            replay_log_dir: Some(dir),
            cancellations: RwLock::new(HashMap::new()),
            observers: ObserverSet::new(),
        })
    }

    /// Same as [`Self::new`], but fans every completed run's
    /// request/result pair out to `observers` on a spawned task after the
    /// run's `ExecResultPayload` is already final. Observers run
    /// out-of-band per spec §9's ghost-comparison contract: they cannot
    /// delay or alter the result the caller already received.
    #[must_use]
    pub fn with_observers(observers: ObserverSet) -> Arc<Self> {
        Arc::new(Self {
            started_at: Instant::now(),
            active_runs: AtomicU32::new(0),
            completed_runs: AtomicU64::new(0),
            replay_log_dir: None,
            cancellations: RwLock::new(HashMap::new()),
            observers,
        })
    }

    /// Requests cancellation of the in-flight run named `run_id`. Honored
    /// at that run's next step boundary; returns `false` if no such run is
    /// currently registered (already finished, or never started).
    ///
    /// There is no wire frame for this — the `msg_type` table is closed
    /// and has no `Cancel` entry — so an embedder holding this
    /// `EngineDispatcher` directly calls this instead of going over the
    /// transport.
    pub async fn cancel(&self, run_id: &str) -> bool {
        match self.cancellations.read().await.get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ExecutionDispatcher for EngineDispatcher {
    async fn execute(&self, request: ExecRequestPayload) -> ExecResultPayload {
        self.active_runs.fetch_add(1, Ordering::SeqCst);
        info!(run_id = %request.run_id, "dispatching run");

        let token = CancellationToken::new();
        self.cancellations.write().await.insert(request.run_id.clone(), token.clone());

        // Execution is pure CPU-bound computation over in-memory data; it
        // never blocks on I/O, so it runs on the calling task rather than
        // a dedicated blocking pool.
        let result = engine::execute_cancellable(&request, Some(&token));

        self.cancellations.write().await.remove(&request.run_id);

        if let Some(dir) = &self.replay_log_dir {
            let path = dir.join(format!("{}.bin", request.run_id));
            if let Err(err) = replay_log::write_log(&path, &result.events) {
                warn!(run_id = %request.run_id, error = %err, "failed to persist replay log");
            }
        }

        if !self.observers.is_empty() {
            let observers = self.observers.clone();
            let observed_request = request.clone();
            let observed_result = result.clone();
            tokio::spawn(async move {
                observers.observe(&observed_request, &observed_result);
            });
        }

        self.active_runs.fetch_sub(1, Ordering::SeqCst);
        self.completed_runs.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn health(&self, detailed: bool) -> HealthResultPayload {
        let active = self.active_runs.load(Ordering::SeqCst);
        let load = detailed.then(|| LoadMetrics {
            active_runs: active,
            queued_runs: 0,
            cpu_bps: reach_fixed::FixedBps::ZERO,
            memory_bps: reach_fixed::FixedBps::ZERO,
        });
        HealthResultPayload {
            status: HealthStatus::Healthy,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_us: FixedDuration::from_micros(self.started_at.elapsed().as_micros() as u64),
            load,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_protocol::protocol::message::{Decision, ExecutionControls, Policy, RunStatus, Workflow};
    use std::collections::BTreeMap;

    fn request() -> ExecRequestPayload {
        ExecRequestPayload {
            run_id: "run-dispatch".to_string(),
            workflow: Workflow { name: "wf".to_string(), version: "1.0".to_string(), steps: BTreeMap::new() },
            controls: ExecutionControls::default(),
            policy: Policy { rules: vec![], default_decision: Decision::Allow },
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn execute_delegates_to_engine() {
        let dispatcher = EngineDispatcher::new();
        let result = dispatcher.execute(request()).await;
        assert!(matches!(result.status, RunStatus::Completed));
    }

    #[tokio::test]
    async fn cancel_unknown_run_id_returns_false() {
        let dispatcher = EngineDispatcher::new();
        assert!(!dispatcher.cancel("no-such-run").await);
    }

    #[tokio::test]
    async fn observer_runs_without_delaying_or_altering_the_result() {
        use crate::observer::Observer;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingObserver(Arc<AtomicUsize>);
        impl Observer for CountingObserver {
            fn observe(&self, _request: &ExecRequestPayload, _result: &ExecResultPayload) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(AtomicUsize::new(0));
        let mut observers = crate::observer::ObserverSet::new();
        observers.push(Arc::new(CountingObserver(counter.clone())));
        let dispatcher = EngineDispatcher::with_observers(observers);

        let result = dispatcher.execute(request()).await;
        assert!(matches!(result.status, RunStatus::Completed));

        // The observer is spawned fire-and-forget; yield once so the
        // spawned task gets a chance to run before asserting on it.
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn registry_does_not_leak_after_completion() {
        let dispatcher = EngineDispatcher::new();
        dispatcher.execute(request()).await;
        assert!(dispatcher.cancellations.read().await.is_empty());
    }

    #[tokio::test]
    async fn health_reports_healthy_with_no_active_runs() {
        let dispatcher = EngineDispatcher::new();
        let health = dispatcher.health(true).await;
        assert!(matches!(health.status, HealthStatus::Healthy));
        assert_eq!(health.load.unwrap().active_runs, 0);
    }
}
