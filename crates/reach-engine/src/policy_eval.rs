//! Policy gate evaluation: first-match-wins over an ordered rule list,
//! falling back to `default_decision`.
//!
//! Evaluates the closed `PolicyCondition` sum carried over the wire
//! (`reach_protocol::protocol::message`), with a bounded recursion depth
//! so a pathologically nested `And`/`Or` tree cannot blow the stack.

use crate::error::EngineError;
use reach_fixed::FixedQ32_32;
use reach_protocol::protocol::message::{Decision, Policy, PolicyCondition, WorkflowStep};
use std::collections::BTreeSet;

/// Everything a `PolicyCondition` tree may be evaluated against. The
/// `capabilities` set is read from the run's `metadata["capabilities"]`
/// entry (comma-separated), since neither `ExecRequestPayload` nor
/// `Workflow` carries a dedicated capability list (Open Question,
/// resolved in DESIGN.md).
pub struct PolicyContext<'a> {
    pub step: Option<&'a WorkflowStep>,
    pub capabilities: &'a BTreeSet<String>,
    pub steps_executed: u32,
    pub budget_spent: FixedQ32_32,
}

fn tool_name(step: Option<&WorkflowStep>) -> Option<&str> {
    step.and_then(|s| s.config.get("tool_name")).and_then(|v| v.as_str())
}

fn eval_condition(condition: &PolicyCondition, ctx: &PolicyContext<'_>, depth: usize) -> Result<bool, EngineError> {
    if depth > reach_codec::MAX_RECURSION_DEPTH {
        return Err(EngineError::PolicyConditionTooDeep);
    }
    let result = match condition {
        PolicyCondition::Capability { name } => ctx.capabilities.contains(name),
        PolicyCondition::StepLimit { max } => ctx.steps_executed < *max,
        PolicyCondition::BudgetLimit { max_usd } => ctx.budget_spent <= *max_usd,
        PolicyCondition::ToolAllowed { tool_name: allowed } => tool_name(ctx.step) == Some(allowed.as_str()),
        PolicyCondition::And { conditions } => {
            let mut all = true;
            for c in conditions {
                all &= eval_condition(c, ctx, depth + 1)?;
            }
            all
        }
        PolicyCondition::Or { conditions } => {
            let mut any = false;
            for c in conditions {
                any |= eval_condition(c, ctx, depth + 1)?;
            }
            any
        }
    };
    Ok(result)
}

/// Evaluates `policy` against `ctx`, returning the first matching rule's
/// decision or `default_decision` if none match.
pub fn evaluate(policy: &Policy, ctx: &PolicyContext<'_>) -> Result<Decision, EngineError> {
    for rule in &policy.rules {
        if eval_condition(&rule.condition, ctx, 0)? {
            return Ok(rule.decision.clone());
        }
    }
    Ok(policy.default_decision.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_protocol::protocol::message::{PolicyRule, StepKind};
    use std::collections::BTreeMap;

    fn tool_step(tool: &str) -> WorkflowStep {
        let mut config = BTreeMap::new();
        config.insert("tool_name".to_string(), serde_json::json!(tool));
        WorkflowStep {
            id: "s1".to_string(),
            kind: StepKind::ToolCall,
            config,
            depends_on: Default::default(),
        }
    }

    #[test]
    fn first_match_wins() {
        let step = tool_step("net.send");
        let caps = BTreeSet::new();
        let ctx = PolicyContext {
            step: Some(&step),
            capabilities: &caps,
            steps_executed: 0,
            budget_spent: FixedQ32_32::ZERO,
        };
        let policy = Policy {
            rules: vec![
                PolicyRule {
                    name: "deny-net".to_string(),
                    condition: PolicyCondition::ToolAllowed { tool_name: "net.send".to_string() },
                    decision: Decision::Deny { reason: "disallowed".to_string() },
                },
                PolicyRule {
                    name: "allow-all".to_string(),
                    condition: PolicyCondition::ToolAllowed { tool_name: "net.send".to_string() },
                    decision: Decision::Allow,
                },
            ],
            default_decision: Decision::Allow,
        };
        let decision = evaluate(&policy, &ctx).unwrap();
        assert!(matches!(decision, Decision::Deny { reason } if reason == "disallowed"));
    }

    #[test]
    fn falls_back_to_default_when_nothing_matches() {
        let step = tool_step("fs.read");
        let caps = BTreeSet::new();
        let ctx = PolicyContext {
            step: Some(&step),
            capabilities: &caps,
            steps_executed: 0,
            budget_spent: FixedQ32_32::ZERO,
        };
        let policy = Policy {
            rules: vec![PolicyRule {
                name: "deny-net".to_string(),
                condition: PolicyCondition::ToolAllowed { tool_name: "net.send".to_string() },
                decision: Decision::Deny { reason: "disallowed".to_string() },
            }],
            default_decision: Decision::Allow,
        };
        assert!(matches!(evaluate(&policy, &ctx).unwrap(), Decision::Allow));
    }

    #[test]
    fn and_or_combinators_evaluate_recursively() {
        let step = tool_step("net.send");
        let mut caps = BTreeSet::new();
        caps.insert("net".to_string());
        let ctx = PolicyContext {
            step: Some(&step),
            capabilities: &caps,
            steps_executed: 0,
            budget_spent: FixedQ32_32::ZERO,
        };
        let condition = PolicyCondition::And {
            conditions: vec![
                PolicyCondition::Capability { name: "net".to_string() },
                PolicyCondition::ToolAllowed { tool_name: "net.send".to_string() },
            ],
        };
        assert!(eval_condition(&condition, &ctx, 0).unwrap());
    }

    #[test]
    fn depth_beyond_bound_is_rejected() {
        let step = tool_step("x");
        let caps = BTreeSet::new();
        let ctx = PolicyContext {
            step: Some(&step),
            capabilities: &caps,
            steps_executed: 0,
            budget_spent: FixedQ32_32::ZERO,
        };
        let mut condition = PolicyCondition::Capability { name: "x".to_string() };
        for _ in 0..(reach_codec::MAX_RECURSION_DEPTH + 5) {
            condition = PolicyCondition::And { conditions: vec![condition] };
        }
        assert!(matches!(eval_condition(&condition, &ctx, 0), Err(EngineError::PolicyConditionTooDeep)));
    }
}
