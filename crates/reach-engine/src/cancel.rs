//! Cooperative cancellation: a flag checked at step boundaries so an
//! in-flight run can be asked to stop without the engine polling any
//! external transport itself.
//!
//! Cancellation is honored at the next step boundary; any in-flight step
//! synthesis completes first. There is no standalone `Cancel` frame on
//! the wire, so this is exposed as an in-process API
//! (`EngineDispatcher::cancel`) for
//! an embedder to drive, not a new frame type.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared between the caller that requested cancellation and the run loop
/// that observes it. Cloning shares the same underlying flag.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
