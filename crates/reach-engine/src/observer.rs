//! Pluggable secondary-verification hook.
//!
//! Spec §9 REDESIGN FLAGS keeps the contract of the teacher's
//! fire-and-forget async ghost-comparison pattern — a secondary digest may
//! be computed and compared out of band — while making the primary path
//! fully synchronous. `Observer` is that secondary path: it runs after
//! [`ExecResultPayload`] is already final and cannot change it or the
//! run's reported status.

use reach_protocol::protocol::message::{ExecRequestPayload, ExecResultPayload};
use std::sync::Arc;

/// Receives a completed run's request/result pair for out-of-band
/// inspection.
///
/// Implementors must not block the caller for long; `EngineDispatcher`
/// invokes observers on a spawned task so a slow or panicking observer
/// cannot delay or fail the run that produced `result`.
pub trait Observer: Send + Sync {
    fn observe(&self, request: &ExecRequestPayload, result: &ExecResultPayload);
}

/// Re-derives `result_digest` via [`crate::engine::replay`] and logs a
/// warning on mismatch. Never returns an error to the caller and never
/// touches `ExecResultPayload` — a mismatch here means the engine itself
/// has a determinism bug, not that the run should be treated differently.
pub struct ReplayVerifyObserver;

impl Observer for ReplayVerifyObserver {
    fn observe(&self, request: &ExecRequestPayload, result: &ExecResultPayload) {
        let derived = crate::engine::replay(
            &request.workflow,
            &request.controls,
            &request.policy,
            &request.metadata,
            &result.events,
        );
        match derived {
            Ok(digest) if digest == result.result_digest => {
                tracing::trace!(run_id = %request.run_id, "replay-verify observer: digest confirmed");
            }
            Ok(digest) => {
                tracing::warn!(
                    run_id = %request.run_id,
                    stored = %result.result_digest,
                    derived = %digest,
                    "replay-verify observer: digest mismatch"
                );
            }
            Err(err) => {
                tracing::warn!(run_id = %request.run_id, error = %err, "replay-verify observer: replay failed");
            }
        }
    }
}

/// Fans a single observation out to every registered observer.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn Observer>>,
}

impl ObserverSet {
    #[must_use]
    pub fn new() -> Self {
        Self { observers: Vec::new() }
    }

    pub fn push(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn observe(&self, request: &ExecRequestPayload, result: &ExecResultPayload) {
        for observer in &self.observers {
            observer.observe(request, result);
        }
    }
}
