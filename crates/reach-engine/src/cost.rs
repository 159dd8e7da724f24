//! Deterministic per-step cost model.
//!
//! A step's modeled cost against `budget_limit` comes from its own
//! `config` map, never from a live price lookup: `cost_usd` (whole
//! dollars) or `cost_usd_raw` (a raw Q32.32 integer, for sub-dollar
//! precision) if present, zero otherwise. Floats are never accepted here;
//! `reach-codec`'s canonicalization pass already rejects any float
//! reaching a step's config before execution begins.

use reach_fixed::FixedQ32_32;
use reach_protocol::protocol::message::WorkflowStep;

#[must_use]
pub fn modeled_cost(step: &WorkflowStep) -> FixedQ32_32 {
    if let Some(raw) = step.config.get("cost_usd_raw").and_then(serde_json::Value::as_i64) {
        return FixedQ32_32::from_raw(raw);
    }
    if let Some(dollars) = step.config.get("cost_usd").and_then(serde_json::Value::as_i64) {
        if let Some(cost) = FixedQ32_32::from_i64(dollars) {
            return cost;
        }
    }
    FixedQ32_32::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_protocol::protocol::message::StepKind;
    use std::collections::BTreeMap;

    fn step_with_config(config: BTreeMap<String, serde_json::Value>) -> WorkflowStep {
        WorkflowStep {
            id: "s".to_string(),
            kind: StepKind::ToolCall,
            config,
            depends_on: Default::default(),
        }
    }

    #[test]
    fn defaults_to_zero() {
        let step = step_with_config(BTreeMap::new());
        assert_eq!(modeled_cost(&step), FixedQ32_32::ZERO);
    }

    #[test]
    fn reads_whole_dollar_cost() {
        let mut config = BTreeMap::new();
        config.insert("cost_usd".to_string(), serde_json::json!(2));
        let step = step_with_config(config);
        assert_eq!(modeled_cost(&step), FixedQ32_32::from_i64(2).unwrap());
    }

    #[test]
    fn raw_cost_takes_precedence() {
        let mut config = BTreeMap::new();
        config.insert("cost_usd".to_string(), serde_json::json!(2));
        config.insert("cost_usd_raw".to_string(), serde_json::json!(12345));
        let step = step_with_config(config);
        assert_eq!(modeled_cost(&step), FixedQ32_32::from_raw(12345));
    }
}
