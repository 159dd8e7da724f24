//! Per-run state machine: `Admitted -> Planning -> Stepping <-> Gated ->
//! {Completed, Paused, Cancelled, Failed}`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Admitted,
    Planning,
    Stepping { next_index: usize },
    Gated { next_index: usize },
    Completed,
    Paused { reason: String },
    Cancelled { reason: String },
    Failed { reason: String },
}

impl RunState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Paused { .. } | Self::Cancelled { .. } | Self::Failed { .. }
        )
    }
}
