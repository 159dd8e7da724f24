//! Virtual clock: the engine never reads the wall clock. Time advances
//! only by `min_step_interval` and by a synthetic per-step duration
//! derived from `blake3(run_id || step_id)`.

use reach_fixed::FixedDuration;

/// Synthetic step durations are mapped into this microsecond range so two
/// different steps rarely collide on timestamp while staying small enough
/// not to dominate `run_timeout` budgets in typical scenarios.
const SYNTHETIC_DURATION_FLOOR_US: u64 = 1;
const SYNTHETIC_DURATION_SPAN_US: u64 = 2_000;

#[derive(Debug, Clone, Copy)]
pub struct VirtualClock {
    now_us: u64,
}

impl VirtualClock {
    #[must_use]
    pub const fn new() -> Self {
        Self { now_us: 0 }
    }

    #[must_use]
    pub const fn now(self) -> FixedDuration {
        FixedDuration::from_micros(self.now_us)
    }

    /// Derives a deterministic synthetic duration for a step from
    /// `blake3(run_id || step_id)`, independent of wall-clock time or
    /// execution order.
    #[must_use]
    pub fn synthetic_step_duration(run_id: &str, step_id: &str) -> FixedDuration {
        let mut hasher = blake3::Hasher::new();
        hasher.update(run_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(step_id.as_bytes());
        let digest = hasher.finalize();
        let bytes = digest.as_bytes();
        let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let offset = u64::from(raw) % SYNTHETIC_DURATION_SPAN_US;
        FixedDuration::from_micros(SYNTHETIC_DURATION_FLOOR_US + offset)
    }

    /// Advances the clock to admit the next step start: at least
    /// `min_step_interval` after the previous step start, and always
    /// strictly forward by the step's synthetic duration. Returns the new
    /// "now" to use as the step's `timestamp_us`.
    pub fn advance_for_step(&mut self, min_step_interval: FixedDuration, synthetic_duration: FixedDuration) -> FixedDuration {
        let floor = self.now_us.saturating_add(min_step_interval.to_micros());
        let advanced = self.now_us.saturating_add(synthetic_duration.to_micros());
        self.now_us = floor.max(advanced);
        self.now()
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}
