//! Engine-level error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("run_id must be 1-64 bytes of [A-Za-z0-9._-]: {0:?}")]
    InvalidRunId(String),

    #[error("workflow graph is cyclic")]
    WorkflowCyclic,

    #[error("step {0:?} depends on unknown step {1:?}")]
    UnknownDependency(String, String),

    #[error("step map key {0:?} does not match step.id {1:?}")]
    StepIdKeyMismatch(String, String),

    #[error("step {0:?} is unreachable from the initial frontier")]
    UnreachableStep(String),

    #[error("policy condition tree exceeds maximum depth")]
    PolicyConditionTooDeep,

    #[error(transparent)]
    Codec(#[from] reach_codec::CodecError),

    #[error("engine-internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("replay mismatch: stored digest {stored} does not match re-derived digest {derived}")]
    ReplayMismatch { stored: String, derived: String },

    #[error("I/O error in replay log: {0}")]
    ReplayLogIo(#[from] std::io::Error),

    #[error("replay log entry is truncated or corrupt")]
    ReplayLogCorrupt,
}
