//! Event log vocabulary: `run_started, step_started, step_completed,
//! policy_denied, run_paused, run_completed, run_cancelled, run_failed`.
//!
//! Each constructor appends a `RunEvent`
//! (`reach_protocol::protocol::message::RunEvent`) with a monotonic
//! event id and a typed payload.

use reach_codec::CanonicalValue;
use reach_protocol::protocol::message::RunEvent;
use std::collections::BTreeMap;

pub struct EventLog {
    events: Vec<RunEvent>,
    next_id: u64,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self { events: Vec::new(), next_id: 0 }
    }

    #[must_use]
    pub fn events(&self) -> &[RunEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<RunEvent> {
        self.events
    }

    /// `blake3` over the canonical encoding of everything appended so far,
    /// used to bind a step's synthesized output to (step.id, step.config,
    /// prior-event-digest) rather than just the step itself.
    #[must_use]
    pub fn prior_digest(&self) -> String {
        reach_codec::compute_fingerprint(&self.events).unwrap_or_else(|_| "blake3:0".to_string())
    }

    fn push(&mut self, timestamp_us: u64, event_type: &str, payload: BTreeMap<String, CanonicalValue>) -> u64 {
        let event_id = self.next_id;
        self.next_id += 1;
        self.events.push(RunEvent {
            event_id,
            event_type: event_type.to_string(),
            timestamp_us,
            payload,
        });
        event_id
    }

    pub fn run_started(&mut self, timestamp_us: u64) -> u64 {
        self.push(timestamp_us, "run_started", BTreeMap::new())
    }

    pub fn step_started(&mut self, timestamp_us: u64, step_id: &str) -> u64 {
        let mut payload = BTreeMap::new();
        payload.insert("step_id".to_string(), CanonicalValue::Text(step_id.to_string()));
        self.push(timestamp_us, "step_started", payload)
    }

    pub fn step_completed(&mut self, timestamp_us: u64, step_id: &str, output_digest: &str) -> u64 {
        let mut payload = BTreeMap::new();
        payload.insert("step_id".to_string(), CanonicalValue::Text(step_id.to_string()));
        payload.insert("output_digest".to_string(), CanonicalValue::Text(output_digest.to_string()));
        self.push(timestamp_us, "step_completed", payload)
    }

    pub fn policy_denied(&mut self, timestamp_us: u64, step_id: &str, rule_name: &str, reason: &str) -> u64 {
        let mut payload = BTreeMap::new();
        payload.insert("step_id".to_string(), CanonicalValue::Text(step_id.to_string()));
        payload.insert("rule".to_string(), CanonicalValue::Text(rule_name.to_string()));
        payload.insert("reason".to_string(), CanonicalValue::Text(reason.to_string()));
        self.push(timestamp_us, "policy_denied", payload)
    }

    pub fn run_paused(&mut self, timestamp_us: u64, reason: &str) -> u64 {
        let mut payload = BTreeMap::new();
        payload.insert("reason".to_string(), CanonicalValue::Text(reason.to_string()));
        self.push(timestamp_us, "run_paused", payload)
    }

    pub fn run_completed(&mut self, timestamp_us: u64) -> u64 {
        self.push(timestamp_us, "run_completed", BTreeMap::new())
    }

    pub fn run_cancelled(&mut self, timestamp_us: u64, reason: &str) -> u64 {
        let mut payload = BTreeMap::new();
        payload.insert("reason".to_string(), CanonicalValue::Text(reason.to_string()));
        self.push(timestamp_us, "run_cancelled", payload)
    }

    pub fn run_failed(&mut self, timestamp_us: u64, control: &str, reason: &str) -> u64 {
        let mut payload = BTreeMap::new();
        payload.insert("control".to_string(), CanonicalValue::Text(control.to_string()));
        payload.insert("reason".to_string(), CanonicalValue::Text(reason.to_string()));
        self.push(timestamp_us, "run_failed", payload)
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_increase_monotonically() {
        let mut log = EventLog::new();
        let a = log.run_started(0);
        let b = log.step_started(5, "s1");
        let c = log.run_completed(10);
        assert_eq!((a, b, c), (0, 1, 2));
    }

    #[test]
    fn prior_digest_changes_as_events_accumulate() {
        let mut log = EventLog::new();
        let empty_digest = log.prior_digest();
        log.run_started(0);
        let after_one = log.prior_digest();
        assert_ne!(empty_digest, after_one);
    }
}
