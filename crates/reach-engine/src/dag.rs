//! Workflow DAG admission: cycle detection and topological ordering.
//!
//! Runs Kahn's algorithm over the `depends_on` edges, with deterministic
//! tie-breaking so the same workflow always admits in the same order.

use crate::error::EngineError;
use reach_protocol::protocol::message::{Workflow, WorkflowStep};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A workflow admitted for execution: its steps in a valid topological
/// order, ready to be stepped one at a time.
pub struct AdmittedWorkflow<'a> {
    pub order: Vec<String>,
    pub steps: &'a BTreeMap<String, WorkflowStep>,
}

impl<'a> AdmittedWorkflow<'a> {
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&'a WorkflowStep> {
        self.steps.get(id)
    }
}

/// Validates and topologically sorts a workflow's step graph.
///
/// Checks, in order: step map keys match `step.id`; every `depends_on`
/// target exists; the graph is acyclic; every step is reachable from the
/// zero-dependency frontier (spec invariant: "the set of steps reachable
/// from the initial frontier covers all steps").
pub fn admit(workflow: &Workflow) -> Result<AdmittedWorkflow<'_>, EngineError> {
    for (key, step) in &workflow.steps {
        if key != &step.id {
            return Err(EngineError::StepIdKeyMismatch(key.clone(), step.id.clone()));
        }
        for dep in &step.depends_on {
            if !workflow.steps.contains_key(dep) {
                return Err(EngineError::UnknownDependency(step.id.clone(), dep.clone()));
            }
        }
    }

    let mut in_degree: BTreeMap<String, usize> = workflow
        .steps
        .keys()
        .map(|id| (id.clone(), 0usize))
        .collect();
    // successors[dep] = steps that depend on `dep`
    let mut successors: BTreeMap<String, Vec<String>> =
        workflow.steps.keys().map(|id| (id.clone(), Vec::new())).collect();

    for step in workflow.steps.values() {
        *in_degree.get_mut(&step.id).expect("step present") += step.depends_on.len();
        for dep in &step.depends_on {
            successors.get_mut(dep).expect("dep present").push(step.id.clone());
        }
    }

    // Frontier: all zero-in-degree steps, visited in deterministic
    // (BTreeMap) order so the admitted order is stable across hosts.
    let mut frontier: VecDeque<String> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| id.clone())
        .collect();

    let mut order = Vec::with_capacity(workflow.steps.len());
    let mut remaining = in_degree.clone();
    let mut visited: BTreeSet<String> = BTreeSet::new();

    while let Some(id) = frontier.pop_front() {
        if !visited.insert(id.clone()) {
            continue;
        }
        order.push(id.clone());
        if let Some(succs) = successors.get(&id) {
            let mut next_ready: Vec<String> = Vec::new();
            for succ in succs {
                let deg = remaining.get_mut(succ).expect("successor present");
                *deg -= 1;
                if *deg == 0 {
                    next_ready.push(succ.clone());
                }
            }
            next_ready.sort();
            for s in next_ready {
                frontier.push_back(s);
            }
        }
    }

    if order.len() != workflow.steps.len() {
        // Either a cycle, or a step unreachable from the zero-dependency
        // frontier (e.g. every predecessor of an island is itself
        // unreachable). Distinguish: if some step has in_degree 0 in the
        // original graph but was never visited, the graph had a cycle
        // elsewhere; otherwise report the first unreachable step.
        let has_cycle = workflow
            .steps
            .keys()
            .any(|id| !visited.contains(id) && remaining.get(id).copied().unwrap_or(0) > 0);
        if has_cycle {
            return Err(EngineError::WorkflowCyclic);
        }
        let unreachable = workflow
            .steps
            .keys()
            .find(|id| !visited.contains(*id))
            .expect("order shorter than steps implies an unvisited step");
        return Err(EngineError::UnreachableStep(unreachable.clone()));
    }

    Ok(AdmittedWorkflow {
        order,
        steps: &workflow.steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_protocol::protocol::message::StepKind;
    use std::collections::BTreeMap;

    fn step(id: &str, depends_on: &[&str]) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            kind: StepKind::ToolCall,
            config: BTreeMap::new(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn workflow(steps: Vec<WorkflowStep>) -> Workflow {
        Workflow {
            name: "wf".to_string(),
            version: "1.0".to_string(),
            steps: steps.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    #[test]
    fn empty_workflow_admits_trivially() {
        let wf = workflow(vec![]);
        let admitted = admit(&wf).unwrap();
        assert!(admitted.order.is_empty());
    }

    #[test]
    fn linear_chain_orders_by_dependency() {
        let wf = workflow(vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])]);
        let admitted = admit(&wf).unwrap();
        assert_eq!(admitted.order, vec!["a", "b", "c"]);
    }

    #[test]
    fn diamond_dependency_orders_deterministically() {
        let wf = workflow(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ]);
        let admitted = admit(&wf).unwrap();
        assert_eq!(admitted.order[0], "a");
        assert_eq!(admitted.order[3], "d");
        assert!(admitted.order[1..3].contains(&"b".to_string()));
        assert!(admitted.order[1..3].contains(&"c".to_string()));
    }

    #[test]
    fn two_cycle_is_rejected() {
        let wf = workflow(vec![step("a", &["b"]), step("b", &["a"])]);
        assert!(matches!(admit(&wf), Err(EngineError::WorkflowCyclic)));
    }

    #[test]
    fn self_cycle_is_rejected() {
        let wf = workflow(vec![step("a", &["a"])]);
        assert!(matches!(admit(&wf), Err(EngineError::WorkflowCyclic)));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let wf = workflow(vec![step("a", &["missing"])]);
        assert!(matches!(admit(&wf), Err(EngineError::UnknownDependency(_, _))));
    }

    #[test]
    fn admission_order_is_deterministic_across_calls() {
        let wf = workflow(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ]);
        let first = admit(&wf).unwrap().order;
        let second = admit(&wf).unwrap().order;
        assert_eq!(first, second);
    }
}
