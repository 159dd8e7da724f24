//! Message payloads carried inside frames, and their CBOR/JSON encoding.

use reach_codec::CanonicalValue;
use reach_fixed::{FixedBps, FixedDuration, FixedQ32_32};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilityFlags(pub u64);

impl CapabilityFlags {
    pub const NONE: Self = Self(0);
    pub const BINARY_PROTOCOL: Self = Self(1 << 0);
    pub const CBOR_ENCODING: Self = Self(1 << 1);
    pub const COMPRESSION: Self = Self(1 << 2);
    pub const SANDBOX: Self = Self(1 << 3);
    pub const LLM: Self = Self(1 << 4);
    pub const FIXED_POINT: Self = Self(1 << 5);
    pub const STREAMING: Self = Self(1 << 6);

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    Cbor,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    pub client_name: String,
    pub client_version: String,
    pub min_version: (u16, u16),
    pub max_version: (u16, u16),
    pub capabilities: u64,
    pub preferred_encoding: Encoding,
}

impl HelloPayload {
    #[must_use]
    pub fn new(client_name: impl Into<String>, client_version: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            client_version: client_version.into(),
            min_version: (1, 0),
            max_version: (1, 0),
            capabilities: CapabilityFlags::BINARY_PROTOCOL.0
                | CapabilityFlags::CBOR_ENCODING.0
                | CapabilityFlags::FIXED_POINT.0,
            preferred_encoding: Encoding::Cbor,
        }
    }

    #[must_use]
    pub fn supports_version(&self, major: u16, minor: u16) -> bool {
        (major, minor) >= self.min_version && (major, minor) <= self.max_version
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloAckPayload {
    pub selected_version: (u16, u16),
    pub capabilities: u64,
    pub engine_version: String,
    pub contract_version: String,
    pub hash_version: String,
    pub cas_version: String,
    pub session_id: String,
}

impl HelloAckPayload {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            selected_version: (1, 0),
            capabilities: CapabilityFlags::BINARY_PROTOCOL.0
                | CapabilityFlags::CBOR_ENCODING.0
                | CapabilityFlags::FIXED_POINT.0,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            contract_version: "1.0".to_string(),
            // The core's sole digest algorithm. contract_version and
            // hash_version evolve independently: only a hash_version
            // mismatch forces an abort, since it means the two sides
            // cannot agree on what a fingerprint even is.
            hash_version: "blake3".to_string(),
            cas_version: "1.0".to_string(),
            session_id: session_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    ToolCall,
    EmitArtifact,
    Decision,
    Pause,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub kind: StepKind,
    pub config: BTreeMap<String, serde_json::Value>,
    pub depends_on: std::collections::BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub version: String,
    pub steps: BTreeMap<String, WorkflowStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionControls {
    pub max_steps: Option<u32>,
    pub step_timeout_us: FixedDuration,
    pub run_timeout_us: FixedDuration,
    pub budget_limit_usd: FixedQ32_32,
    pub min_step_interval_us: FixedDuration,
}

impl Default for ExecutionControls {
    fn default() -> Self {
        Self {
            max_steps: None,
            step_timeout_us: FixedDuration::ZERO,
            run_timeout_us: FixedDuration::ZERO,
            budget_limit_usd: FixedQ32_32::ZERO,
            min_step_interval_us: FixedDuration::ZERO,
        }
    }
}

/// Condition tree evaluated against a step/run before it is admitted.
/// Depth is capped at [`reach_codec::MAX_RECURSION_DEPTH`] by the
/// evaluator, mirroring the canonical-value recursion bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PolicyCondition {
    Capability { name: String },
    StepLimit { max: u32 },
    BudgetLimit { max_usd: FixedQ32_32 },
    ToolAllowed { tool_name: String },
    And { conditions: Vec<PolicyCondition> },
    Or { conditions: Vec<PolicyCondition> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Decision {
    Allow,
    Deny { reason: String },
    Prompt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub name: String,
    pub condition: PolicyCondition,
    pub decision: Decision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub rules: Vec<PolicyRule>,
    pub default_decision: Decision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequestPayload {
    pub run_id: String,
    pub workflow: Workflow,
    pub controls: ExecutionControls,
    pub policy: Policy,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    Paused { reason: String },
    Cancelled { reason: String },
    Failed { reason: String },
}

/// A single entry in a run's append-only event log. `event_id` is a
/// monotonically increasing sequence number, not a display label, so the
/// `(timestamp_us, event_id)` digest ordering rule is a pure integer sort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub event_id: u64,
    pub event_type: String,
    pub timestamp_us: u64,
    pub payload: BTreeMap<String, CanonicalValue>,
}

impl reach_codec::DigestOrderable for RunEvent {
    fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }
    fn event_id(&self) -> u64 {
        self.event_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    ToolCall {
        step_id: String,
        tool_name: String,
        input: BTreeMap<String, serde_json::Value>,
    },
    EmitArtifact {
        step_id: String,
        artifact_id: String,
    },
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Histogram {
    pub boundaries: Vec<FixedDuration>,
    pub counts: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub steps_executed: u32,
    pub elapsed_us: FixedDuration,
    pub budget_spent_usd: FixedQ32_32,
    pub throughput: reach_fixed::FixedThroughput,
    pub cas_hit_rate: FixedBps,
    pub latency_p50_us: FixedDuration,
    pub latency_p95_us: FixedDuration,
    pub latency_p99_us: FixedDuration,
    pub latency_histogram: Histogram,
    pub saturation: reach_fixed::SaturationFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResultPayload {
    pub run_id: String,
    pub status: RunStatus,
    pub result_digest: String,
    pub events: Vec<RunEvent>,
    pub final_action: Option<Action>,
    pub metrics: ExecutionMetrics,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRequestPayload {
    pub detailed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded { reason: String },
    Unhealthy { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadMetrics {
    pub active_runs: u32,
    pub queued_runs: u32,
    pub cpu_bps: FixedBps,
    pub memory_bps: FixedBps,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResultPayload {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_us: FixedDuration,
    pub load: Option<LoadMetrics>,
}

/// Error taxonomy in three ranges exactly as specified: 100-199 protocol,
/// 200-299 execution, 300-399 system. Values are stable across releases
/// once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorCode {
    InvalidMessage = 100,
    UnsupportedVersion = 101,
    EncodingError = 102,
    CrcMismatch = 103,
    PayloadTooLarge = 104,
    UnknownMsgType = 105,
    BufferOverflow = 106,

    ExecutionFailed = 200,
    BudgetExceeded = 201,
    StepTimeoutExceeded = 202,
    RunTimeoutExceeded = 203,
    MaxStepsExceeded = 204,
    PolicyDenied = 205,
    WorkflowCyclic = 206,
    FloatingPointForbidden = 207,
    InvalidRunId = 208,
    ReplayMismatch = 209,

    InternalInvariant = 300,
    ResourceExhausted = 301,
    ServiceUnavailable = 302,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    pub details: BTreeMap<String, String>,
    pub correlation_id: u32,
}

pub mod encoding {
    use super::*;

    pub fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, String> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(value, &mut buf).map_err(|e| e.to_string())?;
        Ok(buf)
    }

    pub fn decode_cbor<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, String> {
        ciborium::de::from_reader(bytes).map_err(|e| e.to_string())
    }

    pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, String> {
        serde_json::to_vec(value).map_err(|e| e.to_string())
    }

    pub fn decode_json<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }
}
