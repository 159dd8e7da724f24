//! Execution engine: accepts an `ExecRequestPayload`, runs its `Workflow`
//! under `ExecutionControls`/`Policy`, emits an ordered `RunEvent` log,
//! computes `result_digest`, returns an `ExecResultPayload`.
//!
//! Admits the workflow as a DAG, then steps it under the full
//! `PolicyCondition` tree with budget/time/step controls and digest
//! emission.

use crate::cancel::CancellationToken;
use crate::clock::VirtualClock;
use crate::cost::modeled_cost;
use crate::dag::{self, AdmittedWorkflow};
use crate::error::EngineError;
use crate::events::EventLog;
use crate::policy_eval::{self, PolicyContext};
use crate::rng::Lcg64;
use crate::run_id::RunId;
use crate::state::RunState;
use reach_fixed::{FixedBps, FixedDuration, FixedQ32_32, FixedThroughput, SaturationFlags};
use reach_protocol::protocol::message::{
    Action, Decision, ExecRequestPayload, ExecResultPayload, ExecutionControls, ExecutionMetrics,
    Histogram, Policy, RunEvent, RunStatus, StepKind, Workflow, WorkflowStep,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Everything fed to [`reach_codec::compute_fingerprint`] to produce
/// `result_digest`. Metrics are deliberately absent: they are
/// observational and must never affect the digest.
#[derive(Serialize)]
struct DigestInput<'a> {
    workflow: &'a Workflow,
    controls: &'a ExecutionControls,
    policy: &'a Policy,
    metadata: &'a BTreeMap<String, String>,
    events: &'a [RunEvent],
}

/// Computes `result_digest` over the already-canonically-ordered `events`.
/// Callers are responsible for having passed events through
/// [`reach_codec::sort_for_digest`] first.
fn digest_of(
    workflow: &Workflow,
    controls: &ExecutionControls,
    policy: &Policy,
    metadata: &BTreeMap<String, String>,
    sorted_events: &[RunEvent],
) -> Result<String, EngineError> {
    let input = DigestInput { workflow, controls, policy, metadata, events: sorted_events };
    Ok(reach_codec::compute_fingerprint(&input)?)
}

fn capabilities_from_metadata(metadata: &BTreeMap<String, String>) -> BTreeSet<String> {
    metadata
        .get("capabilities")
        .map(|csv| csv.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

fn step_output_digest(step_id: &str, step: &WorkflowStep, prior_digest: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(step_id.as_bytes());
    hasher.update(b"\0");
    if let Ok(config_bytes) = reach_codec::to_canonical_cbor(&step.config) {
        hasher.update(&config_bytes);
    }
    hasher.update(b"\0");
    hasher.update(prior_digest.as_bytes());
    format!("blake3:{}", hasher.finalize().to_hex())
}

struct Terminal {
    status: RunStatus,
}

/// Maps a terminal wire `RunStatus` onto the corresponding internal
/// `RunState`, purely for state-transition tracing.
fn run_state_for(status: &RunStatus) -> RunState {
    match status {
        RunStatus::Completed => RunState::Completed,
        RunStatus::Paused { reason } => RunState::Paused { reason: reason.clone() },
        RunStatus::Cancelled { reason } => RunState::Cancelled { reason: reason.clone() },
        RunStatus::Failed { reason } => RunState::Failed { reason: reason.clone() },
    }
}

/// Runs `request` to completion (or to whatever control/policy breach ends
/// it first) and returns the full result.
pub fn execute(request: &ExecRequestPayload) -> ExecResultPayload {
    execute_cancellable(request, None)
}

/// Same as [`execute`], but honors `cancellation` at the next step
/// boundary: in-flight step synthesis completes first, then the run
/// transitions to `Cancelled` and emits `run_cancelled` as its terminal
/// event instead of continuing.
pub fn execute_cancellable(
    request: &ExecRequestPayload,
    cancellation: Option<&CancellationToken>,
) -> ExecResultPayload {
    match execute_inner(request, cancellation) {
        Ok(result) => result,
        Err(err) => {
            // Only genuine engine bugs reach here: every named
            // client-input-validation failure (`client_input_reason`) and
            // every control breach/policy deny is handled inside
            // `execute_inner` and returns a well-formed `ExecResultPayload`
            // with `status = Failed` naming itself. This arm is reserved
            // for spec.md:162's `InternalInvariant` — event_id
            // non-monotonic, workflow graph corruption — not for rejected
            // requests.
            let reason = client_input_reason(&err)
                .map_or_else(|| format!("InternalInvariant: {err}"), ToString::to_string);
            ExecResultPayload {
                run_id: request.run_id.clone(),
                status: RunStatus::Failed { reason },
                result_digest: "blake3:0".to_string(),
                events: vec![],
                final_action: None,
                metrics: empty_metrics(),
                session_id: String::new(),
            }
        }
    }
}

/// PascalCase reason for an `EngineError` that names one of spec.md's
/// client-input-validation failure modes, as opposed to a genuine
/// engine-internal invariant violation. These surface as themselves in
/// `RunStatus::Failed { reason }`, matching the control-breach reasons set
/// throughout `run_steps` (`MaxStepsExceeded`, `BudgetExceeded`, ...).
fn client_input_reason(err: &EngineError) -> Option<&'static str> {
    match err {
        EngineError::InvalidRunId(_) => Some("InvalidRunId"),
        EngineError::WorkflowCyclic => Some("WorkflowCyclic"),
        EngineError::UnknownDependency(_, _) => Some("UnknownDependency"),
        EngineError::StepIdKeyMismatch(_, _) => Some("StepIdKeyMismatch"),
        EngineError::UnreachableStep(_) => Some("UnreachableStep"),
        EngineError::Codec(reach_codec::CodecError::FloatingPointForbidden) => Some("FloatingPointForbidden"),
        EngineError::Codec(reach_codec::CodecError::CanonicalRecursionDepth) => Some("CanonicalRecursionDepth"),
        EngineError::Codec(reach_codec::CodecError::NonUtf8Key) => Some("NonUtf8Key"),
        EngineError::Codec(reach_codec::CodecError::UnsortableKeyType) => Some("UnsortableKeyType"),
        _ => None,
    }
}

fn empty_metrics() -> ExecutionMetrics {
    ExecutionMetrics {
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
    }
}

fn execute_inner(
    request: &ExecRequestPayload,
    cancellation: Option<&CancellationToken>,
) -> Result<ExecResultPayload, EngineError> {
    let run_id = RunId::try_from(request.run_id.clone())?;

    // Float rejection must happen before any event is emitted. Probe the
    // full digest-eligible tuple with an empty event log first.
    digest_of(&request.workflow, &request.controls, &request.policy, &request.metadata, &[])?;

    let mut log = EventLog::new();
    let mut clock = VirtualClock::new();
    let capabilities = capabilities_from_metadata(&request.metadata);
    let mut saturation = SaturationFlags::NONE;
    let mut step_durations: Vec<FixedDuration> = Vec::new();

    tracing::trace!(run_id = run_id.as_str(), state = ?RunState::Admitted, "run state transition");

    let admitted = match dag::admit(&request.workflow) {
        Ok(admitted) => admitted,
        Err(err) => {
            let Some(reason) = client_input_reason(&err) else { return Err(err) };
            log.run_failed(0, reason, &err.to_string());
            let state = RunState::Failed { reason: reason.to_string() };
            tracing::trace!(run_id = run_id.as_str(), ?state, "run state transition");
            return finish(
                request,
                run_id.as_str(),
                &mut log,
                RunStatus::Failed { reason: reason.to_string() },
                None,
                0,
                FixedQ32_32::ZERO,
                saturation,
                &step_durations,
            );
        }
    };

    tracing::trace!(run_id = run_id.as_str(), state = ?RunState::Planning, "run state transition");
    log.run_started(clock.now().to_micros());

    let mut budget_spent = FixedQ32_32::ZERO;
    let mut steps_executed: u32 = 0;

    let terminal = run_steps(
        request,
        &admitted,
        &mut log,
        &mut clock,
        &capabilities,
        &mut budget_spent,
        &mut steps_executed,
        &mut saturation,
        &mut step_durations,
        cancellation,
    )?;

    let status = terminal.map_or(RunStatus::Completed, |t| t.status);
    tracing::trace!(run_id = run_id.as_str(), state = ?run_state_for(&status), "run state transition");
    if matches!(status, RunStatus::Completed) {
        log.run_completed(clock.now().to_micros());
    }

    let final_action = matches!(status, RunStatus::Completed).then_some(Action::Done);

    finish(request, run_id.as_str(), &mut log, status, final_action, steps_executed, budget_spent, saturation, &step_durations)
}

#[allow(clippy::too_many_arguments)]
fn run_steps(
    request: &ExecRequestPayload,
    admitted: &AdmittedWorkflow<'_>,
    log: &mut EventLog,
    clock: &mut VirtualClock,
    capabilities: &BTreeSet<String>,
    budget_spent: &mut FixedQ32_32,
    steps_executed: &mut u32,
    saturation: &mut SaturationFlags,
    step_durations: &mut Vec<FixedDuration>,
    cancellation: Option<&CancellationToken>,
) -> Result<Option<Terminal>, EngineError> {
    let controls = &request.controls;

    for (index, step_id) in admitted.order.iter().enumerate() {
        let step = admitted.step(step_id).ok_or_else(|| {
            EngineError::InternalInvariant(format!("admitted order references missing step {step_id:?}"))
        })?;

        if cancellation.is_some_and(CancellationToken::is_cancelled) {
            let reason = format!("cancelled before step {step_id:?}");
            log.run_cancelled(clock.now().to_micros(), &reason);
            return Ok(Some(Terminal { status: RunStatus::Cancelled { reason } }));
        }

        tracing::trace!(step_id = %step_id, state = ?RunState::Stepping { next_index: index }, "run state transition");

        if let Some(max_steps) = controls.max_steps {
            if (index as u32) >= max_steps {
                log.run_failed(clock.now().to_micros(), "MaxStepsExceeded", "max_steps control breached");
                return Ok(Some(Terminal { status: RunStatus::Failed { reason: "MaxStepsExceeded".to_string() } }));
            }
        }

        if controls.run_timeout_us != FixedDuration::ZERO && clock.now() >= controls.run_timeout_us {
            log.run_failed(clock.now().to_micros(), "RunTimeoutExceeded", "run_timeout control breached");
            return Ok(Some(Terminal { status: RunStatus::Failed { reason: "RunTimeoutExceeded".to_string() } }));
        }

        let synthetic_duration = VirtualClock::synthetic_step_duration(request.run_id.as_str(), step_id);
        if controls.step_timeout_us != FixedDuration::ZERO && synthetic_duration > controls.step_timeout_us {
            log.run_failed(clock.now().to_micros(), "StepTimeoutExceeded", "step_timeout control breached");
            return Ok(Some(Terminal { status: RunStatus::Failed { reason: "StepTimeoutExceeded".to_string() } }));
        }

        let cost = modeled_cost(step);
        let (prospective_spent, step_saturated) = budget_spent.saturating_add(cost);
        if step_saturated {
            saturation.insert(SaturationFlags::Q32_32);
        }
        if controls.budget_limit_usd != FixedQ32_32::ZERO && prospective_spent > controls.budget_limit_usd {
            log.run_failed(clock.now().to_micros(), "BudgetExceeded", "budget_limit control breached");
            return Ok(Some(Terminal { status: RunStatus::Failed { reason: "BudgetExceeded".to_string() } }));
        }
        *budget_spent = prospective_spent;

        let timestamp = clock.advance_for_step(controls.min_step_interval_us, synthetic_duration).to_micros();
        step_durations.push(synthetic_duration);

        tracing::trace!(step_id = %step_id, state = ?RunState::Gated { next_index: index }, "run state transition");
        let ctx = PolicyContext {
            step: Some(step),
            capabilities,
            steps_executed: *steps_executed,
            budget_spent: *budget_spent,
        };
        let decision = policy_eval::evaluate(&request.policy, &ctx)?;

        match decision {
            Decision::Deny { reason } => {
                log.policy_denied(timestamp, step_id, "policy", &reason);
                return Ok(Some(Terminal { status: RunStatus::Failed { reason } }));
            }
            Decision::Prompt => {
                let reason = format!("awaiting prompt decision for step {step_id:?}");
                log.run_paused(timestamp, &reason);
                return Ok(Some(Terminal { status: RunStatus::Paused { reason } }));
            }
            Decision::Allow => {}
        }

        if matches!(step.kind, StepKind::Pause) {
            let reason = format!("paused at step {step_id:?}");
            log.run_paused(timestamp, &reason);
            return Ok(Some(Terminal { status: RunStatus::Paused { reason } }));
        }

        let prior_digest = log.prior_digest();
        log.step_started(timestamp, step_id);
        let output_digest = step_output_digest(step_id, step, &prior_digest);
        log.step_completed(timestamp, step_id, &output_digest);
        *steps_executed += 1;
    }

    Ok(None)
}

#[allow(clippy::too_many_arguments)]
fn finish(
    request: &ExecRequestPayload,
    run_id: &str,
    log: &mut EventLog,
    status: RunStatus,
    final_action: Option<Action>,
    steps_executed: u32,
    budget_spent: FixedQ32_32,
    saturation: SaturationFlags,
    step_durations: &[FixedDuration],
) -> Result<ExecResultPayload, EngineError> {
    let events = std::mem::take(log).into_events();
    let ordered = reach_codec::sort_for_digest(&events);
    let digest = digest_of(&request.workflow, &request.controls, &request.policy, &request.metadata, &ordered)?;

    let elapsed_us = ordered.last().map_or(FixedDuration::ZERO, |e| FixedDuration::from_micros(e.timestamp_us));
    let metrics = build_metrics(run_id, steps_executed, elapsed_us, budget_spent, saturation, step_durations);

    Ok(ExecResultPayload {
        run_id: request.run_id.clone(),
        status,
        result_digest: digest,
        events: ordered,
        final_action,
        metrics,
        session_id: String::new(),
    })
}

fn build_metrics(
    run_id: &str,
    steps_executed: u32,
    elapsed_us: FixedDuration,
    budget_spent: FixedQ32_32,
    saturation: SaturationFlags,
    step_durations: &[FixedDuration],
) -> ExecutionMetrics {
    let throughput = if elapsed_us == FixedDuration::ZERO || steps_executed == 0 {
        FixedThroughput::ZERO
    } else {
        let micro_ops = u64::from(steps_executed).saturating_mul(1_000_000);
        FixedThroughput::from_micro_ops_per_sec(micro_ops / elapsed_us.to_micros().max(1))
    };

    let mut sorted_durations: Vec<u64> = step_durations.iter().map(|d| d.to_micros()).collect();
    sorted_durations.sort_unstable();
    let percentile = |p: f64| -> FixedDuration {
        if sorted_durations.is_empty() {
            return FixedDuration::ZERO;
        }
        let rank = ((sorted_durations.len() as f64 - 1.0) * p).round() as usize;
        FixedDuration::from_micros(sorted_durations[rank.min(sorted_durations.len() - 1)])
    };

    let mut rng = Lcg64::from_run_id(run_id);
    let cas_hit_rate = FixedBps::from_raw(u16::try_from(rng.next_below(10_001)).unwrap_or(0));

    let boundaries: Vec<FixedDuration> = [100u64, 500, 1_000, 5_000, 10_000].into_iter().map(FixedDuration::from_micros).collect();
    let counts: Vec<u64> = boundaries
        .iter()
        .map(|boundary| sorted_durations.iter().filter(|d| **d <= boundary.to_micros()).count() as u64)
        .collect();

    ExecutionMetrics {
        steps_executed,
        elapsed_us,
        budget_spent_usd: budget_spent,
        throughput,
        cas_hit_rate,
        latency_p50_us: percentile(0.50),
        latency_p95_us: percentile(0.95),
        latency_p99_us: percentile(0.99),
        latency_histogram: Histogram { boundaries, counts },
        saturation,
    }
}

/// Re-derives `result_digest` from a prior event log without re-executing
/// any step. A mismatch between this and the originally stored digest is
/// the canonical replay-failure signal.
pub fn replay(
    workflow: &Workflow,
    controls: &ExecutionControls,
    policy: &Policy,
    metadata: &BTreeMap<String, String>,
    events: &[RunEvent],
) -> Result<String, EngineError> {
    digest_of(workflow, controls, policy, metadata, events)
}

/// Verifies that replaying `events` reproduces `stored_digest` exactly.
pub fn verify_replay(
    workflow: &Workflow,
    controls: &ExecutionControls,
    policy: &Policy,
    metadata: &BTreeMap<String, String>,
    events: &[RunEvent],
    stored_digest: &str,
) -> Result<(), EngineError> {
    let derived = replay(workflow, controls, policy, metadata, events)?;
    if derived == stored_digest {
        Ok(())
    } else {
        Err(EngineError::ReplayMismatch { stored: stored_digest.to_string(), derived })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_fixed::FixedQ32_32;
    use reach_protocol::protocol::message::{ExecutionControls, Policy, StepKind, WorkflowStep};
    use std::collections::BTreeMap;

    fn base_request() -> ExecRequestPayload {
        ExecRequestPayload {
            run_id: "run-base".to_string(),
            workflow: Workflow { name: "empty".to_string(), version: "1.0".to_string(), steps: BTreeMap::new() },
            controls: ExecutionControls::default(),
            policy: Policy { rules: vec![], default_decision: Decision::Allow },
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn s1_empty_workflow_completes_deterministically() {
        let request = base_request();
        let first = execute(&request);
        let second = execute(&request);
        assert!(matches!(first.status, RunStatus::Completed));
        assert_eq!(first.result_digest, second.result_digest);
        assert_eq!(first.events.len(), 2);
        assert_eq!(first.events[0].event_type, "run_started");
        assert_eq!(first.events[1].event_type, "run_completed");
    }

    #[test]
    fn s2_cyclic_workflow_fails_without_step_started() {
        let mut request = base_request();
        request.workflow.steps.insert(
            "a".to_string(),
            WorkflowStep { id: "a".to_string(), kind: StepKind::ToolCall, config: BTreeMap::new(), depends_on: ["b".to_string()].into() },
        );
        request.workflow.steps.insert(
            "b".to_string(),
            WorkflowStep { id: "b".to_string(), kind: StepKind::ToolCall, config: BTreeMap::new(), depends_on: ["a".to_string()].into() },
        );
        let result = execute(&request);
        assert!(matches!(result.status, RunStatus::Failed { ref reason } if reason == "WorkflowCyclic"));
        assert!(result.events.iter().all(|e| e.event_type != "step_started"));
    }

    #[test]
    fn s3_budget_breach_fails_run() {
        let mut request = base_request();
        let mut config = BTreeMap::new();
        config.insert("cost_usd".to_string(), serde_json::json!(2));
        request.workflow.steps.insert(
            "a".to_string(),
            WorkflowStep { id: "a".to_string(), kind: StepKind::ToolCall, config, depends_on: Default::default() },
        );
        request.controls.budget_limit_usd = FixedQ32_32::from_i64(1).unwrap();
        let result = execute(&request);
        assert!(matches!(result.status, RunStatus::Failed { ref reason } if reason == "BudgetExceeded"));
        assert_eq!(result.events[0].event_type, "run_started");
    }

    #[test]
    fn s4_policy_deny_fails_with_reason() {
        let mut request = base_request();
        let mut config = BTreeMap::new();
        config.insert("tool_name".to_string(), serde_json::json!("net.send"));
        request.workflow.steps.insert(
            "a".to_string(),
            WorkflowStep { id: "a".to_string(), kind: StepKind::ToolCall, config, depends_on: Default::default() },
        );
        request.policy.rules.push(reach_protocol::protocol::message::PolicyRule {
            name: "deny-net".to_string(),
            condition: reach_protocol::protocol::message::PolicyCondition::ToolAllowed { tool_name: "net.send".to_string() },
            decision: Decision::Deny { reason: "disallowed".to_string() },
        });
        let result = execute(&request);
        assert!(matches!(result.status, RunStatus::Failed { ref reason } if reason == "disallowed"));
        let denied = result.events.iter().find(|e| e.event_type == "policy_denied").unwrap();
        match denied.payload.get("reason") {
            Some(reach_codec::CanonicalValue::Text(reason)) => assert_eq!(reason, "disallowed"),
            _ => panic!("expected reason text"),
        }
    }

    #[test]
    fn float_in_step_config_is_rejected_before_any_event() {
        let mut request = base_request();
        let mut config = BTreeMap::new();
        config.insert("weight".to_string(), serde_json::json!(1.5));
        request.workflow.steps.insert(
            "a".to_string(),
            WorkflowStep { id: "a".to_string(), kind: StepKind::ToolCall, config, depends_on: Default::default() },
        );
        let result = execute(&request);
        assert!(matches!(result.status, RunStatus::Failed { ref reason } if reason == "FloatingPointForbidden"));
        assert!(result.events.is_empty());
    }

    #[test]
    fn invalid_run_id_is_reported_as_itself_not_internal_invariant() {
        let mut request = base_request();
        request.run_id = "has spaces".to_string();
        let result = execute(&request);
        assert!(matches!(result.status, RunStatus::Failed { ref reason } if reason == "InvalidRunId"));
    }

    #[test]
    fn unknown_dependency_is_reported_as_itself_not_internal_invariant() {
        let mut request = base_request();
        request.workflow.steps.insert(
            "a".to_string(),
            WorkflowStep {
                id: "a".to_string(),
                kind: StepKind::ToolCall,
                config: BTreeMap::new(),
                depends_on: ["missing".to_string()].into(),
            },
        );
        let result = execute(&request);
        assert!(matches!(result.status, RunStatus::Failed { ref reason } if reason == "UnknownDependency"));
    }

    #[test]
    fn replay_matches_original_digest() {
        let request = base_request();
        let result = execute(&request);
        let verified = verify_replay(
            &request.workflow,
            &request.controls,
            &request.policy,
            &request.metadata,
            &result.events,
            &result.result_digest,
        );
        assert!(verified.is_ok());
    }

    #[test]
    fn replay_detects_tampered_events() {
        let request = base_request();
        let mut result = execute(&request);
        result.events.push(RunEvent {
            event_id: 999,
            event_type: "tampered".to_string(),
            timestamp_us: 0,
            payload: BTreeMap::new(),
        });
        let verified = verify_replay(
            &request.workflow,
            &request.controls,
            &request.policy,
            &request.metadata,
            &result.events,
            &result.result_digest,
        );
        assert!(matches!(verified, Err(EngineError::ReplayMismatch { .. })));
    }

    #[test]
    fn cancellation_before_first_step_yields_cancelled_status() {
        let mut request = base_request();
        request.workflow.steps.insert(
            "a".to_string(),
            WorkflowStep { id: "a".to_string(), kind: StepKind::ToolCall, config: BTreeMap::new(), depends_on: Default::default() },
        );
        let token = crate::cancel::CancellationToken::new();
        token.cancel();
        let result = execute_cancellable(&request, Some(&token));
        assert!(matches!(result.status, RunStatus::Cancelled { .. }));
        assert_eq!(result.events.last().unwrap().event_type, "run_cancelled");
        assert!(result.events.iter().all(|e| e.event_type != "step_started"));
    }

    #[test]
    fn uncancelled_token_does_not_affect_execution() {
        let request = base_request();
        let token = crate::cancel::CancellationToken::new();
        let result = execute_cancellable(&request, Some(&token));
        assert!(matches!(result.status, RunStatus::Completed));
    }

    #[test]
    fn tightening_budget_never_turns_failure_into_success() {
        let mut request = base_request();
        let mut config = BTreeMap::new();
        config.insert("cost_usd".to_string(), serde_json::json!(5));
        request.workflow.steps.insert(
            "a".to_string(),
            WorkflowStep { id: "a".to_string(), kind: StepKind::ToolCall, config, depends_on: Default::default() },
        );
        request.controls.budget_limit_usd = FixedQ32_32::from_i64(10).unwrap();
        let loose = execute(&request);
        request.controls.budget_limit_usd = FixedQ32_32::from_i64(1).unwrap();
        let tight = execute(&request);
        if matches!(tight.status, RunStatus::Completed) {
            assert!(matches!(loose.status, RunStatus::Completed));
        }
    }
}
