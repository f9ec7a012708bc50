//! Test case planning: resolves declared test cases and names their
//! generation targets.

use bpmndt_types::{TestCaseSpec, WorkflowGraph};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::{
    model::{PathActivity, PathResolutionError, PathResult},
    resolve::resolve,
};

static NON_IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("identifier pattern should compile"));

/// A resolved test case ready to be generated or run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCasePlan {
    /// Generation target name; doubles as the `TEST` record case id.
    pub target_name: String,
    pub spec: TestCaseSpec,
    pub path: PathResult,
    /// The end activity terminates the process.
    pub process_end: bool,
}

impl TestCasePlan {
    pub fn is_runnable(&self) -> bool {
        self.path.is_valid()
    }

    pub fn activities(&self) -> Result<&[PathActivity], PathResolutionError> {
        match self.path.error() {
            Some(error) => Err(error),
            None => Ok(self.path.activities().unwrap_or_default()),
        }
    }
}

/// Replaces every character that cannot appear in an identifier with `_`.
pub fn sanitize_identifier(raw: &str) -> String {
    NON_IDENTIFIER.replace_all(raw.trim(), "_").into_owned()
}

/// Target name of a test case: `TC_<process>__<name>` for named cases,
/// `TC_<process>__<start>__<end>` otherwise.
pub fn test_case_target_name(process_id: &str, spec: &TestCaseSpec) -> String {
    let process = sanitize_identifier(process_id);
    match spec.name.as_deref().map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => format!("TC_{}__{}", process, sanitize_identifier(name)),
        None => format!(
            "TC_{}__{}__{}",
            process,
            sanitize_identifier(&spec.start),
            sanitize_identifier(&spec.end)
        ),
    }
}

/// Resolves every test case of `specs` against `graph`.
///
/// Test cases whose target names collide are deduplicated: the first one
/// declared wins and later ones are dropped.
pub fn plan_test_cases(graph: &WorkflowGraph, specs: &[TestCaseSpec]) -> Vec<TestCasePlan> {
    let mut plans: IndexMap<String, TestCasePlan> = IndexMap::new();

    for spec in specs {
        let target_name = test_case_target_name(graph.process_id(), spec);
        if plans.contains_key(&target_name) {
            debug!(target_name = %target_name, start = %spec.start, end = %spec.end, "dropping duplicate test case");
            continue;
        }

        let path = resolve(graph, &spec.start, &spec.end);
        let plan = TestCasePlan {
            target_name: target_name.clone(),
            spec: spec.clone(),
            process_end: graph.is_process_end(&spec.end),
            path,
        };
        plans.insert(target_name, plan);
    }

    plans.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpmndt_types::{ActivityKind, FlowNode};

    fn spec(name: Option<&str>, start: &str, end: &str) -> TestCaseSpec {
        TestCaseSpec {
            name: name.map(str::to_string),
            description: None,
            start: start.into(),
            end: end.into(),
        }
    }

    fn graph() -> WorkflowGraph {
        WorkflowGraph::from_nodes(
            "order-process",
            [
                FlowNode::new("start", ActivityKind::Event).with_outgoing(["approve"]),
                FlowNode::new("approve", ActivityKind::UserTask).with_outgoing(["end"]),
                FlowNode::new("end", ActivityKind::Event),
            ],
        )
    }

    #[test]
    fn names_follow_the_target_convention() {
        assert_eq!(
            test_case_target_name("order-process", &spec(None, "start", "end")),
            "TC_order_process__start__end"
        );
        assert_eq!(
            test_case_target_name("order", &spec(Some("Happy Path"), "start", "end")),
            "TC_order__Happy_Path"
        );
        assert_eq!(test_case_target_name("order", &spec(Some("  "), "a", "b")), "TC_order__a__b");
    }

    #[test]
    fn first_duplicate_wins() {
        let specs = vec![
            spec(Some("Happy Path"), "start", "end"),
            spec(Some("Happy-Path"), "start", "approve"),
            spec(None, "start", "approve"),
        ];
        let plans = plan_test_cases(&graph(), &specs);

        let names: Vec<&str> = plans.iter().map(|plan| plan.target_name.as_str()).collect();
        assert_eq!(names, vec!["TC_order_process__Happy_Path", "TC_order_process__start__approve"]);
        assert_eq!(plans[0].spec.end, "end");
        assert!(plans[0].process_end);
        assert!(!plans[1].process_end);
    }

    #[test]
    fn unresolvable_cases_are_kept_but_not_runnable() {
        let plans = plan_test_cases(&graph(), &[spec(None, "start", "missing")]);
        assert!(!plans[0].is_runnable());
        assert_eq!(
            plans[0].activities(),
            Err(PathResolutionError::Invalid(vec!["missing".into()]))
        );
    }
}
