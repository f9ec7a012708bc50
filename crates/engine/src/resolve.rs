//! # Path Resolution
//!
//! Finds the activities a process instance visits between two flow nodes.
//!
//! The search is a depth-first walk over [`WorkflowGraph::successors`],
//! following outgoing flows in declaration order and never revisiting a
//! node, so the first path found is deterministic. The visited ids are then
//! folded into a nested structure: every repeating region on the path becomes
//! a scope activity holding the members visited inside it. Regions the walk
//! starts inside of are opened implicitly. Embedded subprocesses that do not
//! repeat stay flat.
//!
//! ## Usage
//!
//! ```rust
//! use bpmndt_engine::resolve::resolve;
//! use bpmndt_types::{ActivityKind, FlowNode, WorkflowGraph};
//!
//! let graph = WorkflowGraph::from_nodes(
//!     "order",
//!     [
//!         FlowNode::new("start", ActivityKind::Event).with_outgoing(["approve"]),
//!         FlowNode::new("approve", ActivityKind::UserTask).with_outgoing(["end"]),
//!         FlowNode::new("end", ActivityKind::Event),
//!     ],
//! );
//!
//! let result = resolve(&graph, "start", "end");
//! let ids: Vec<&str> = result.activities().unwrap().iter().map(|a| a.id.as_str()).collect();
//! assert_eq!(ids, vec!["start", "approve", "end"]);
//! ```

use std::collections::HashSet;

use bpmndt_types::WorkflowGraph;
use tracing::debug;

use crate::model::{PathActivity, PathResult};

/// Resolves the path from `start_id` to `end_id`.
pub fn resolve(graph: &WorkflowGraph, start_id: &str, end_id: &str) -> PathResult {
    if start_id == end_id {
        debug!(start = %start_id, end = %end_id, "path is empty");
        return PathResult::Empty;
    }

    let unresolved: Vec<String> = [start_id, end_id]
        .into_iter()
        .filter(|id| !graph.contains(id))
        .map(str::to_string)
        .collect();
    if !unresolved.is_empty() {
        debug!(start = %start_id, end = %end_id, unresolved = ?unresolved, "path references unknown flow nodes");
        return PathResult::Invalid { unresolved };
    }

    let mut visited = HashSet::new();
    let mut trail = Vec::new();
    if !search(graph, start_id, end_id, &mut visited, &mut trail) {
        debug!(start = %start_id, end = %end_id, "no path connects the flow nodes");
        return PathResult::Incomplete;
    }

    let activities = nest(graph, &trail);
    debug!(start = %start_id, end = %end_id, length = trail.len(), "path resolved");
    PathResult::Valid { activities }
}

fn search<'g>(graph: &'g WorkflowGraph, current: &'g str, end_id: &str, visited: &mut HashSet<&'g str>, trail: &mut Vec<&'g str>) -> bool {
    visited.insert(current);
    trail.push(current);

    if current == end_id {
        return true;
    }

    for next in graph.successors(current) {
        if !visited.contains(next) && search(graph, next, end_id, visited, trail) {
            return true;
        }
    }

    trail.pop();
    false
}

fn nest(graph: &WorkflowGraph, trail: &[&str]) -> Vec<PathActivity> {
    let mut root = Vec::new();
    let mut open: Vec<PathActivity> = Vec::new();

    for id in trail {
        let Some(node) = graph.node(id) else {
            continue;
        };
        let regions = enclosing_regions(graph, id);

        while !is_prefix(&open, &regions) {
            close_scope(&mut open, &mut root);
        }

        for region_id in &regions[open.len()..] {
            if let Some(region) = graph.node(region_id) {
                open.push(PathActivity::scope_from_node(region));
            }
        }

        if graph.is_repeating_region(id) {
            open.push(PathActivity::scope_from_node(node));
        } else {
            let activity = PathActivity::from_node(node);
            match open.last_mut() {
                Some(scope) => scope.push_child(activity),
                None => root.push(activity),
            }
        }
    }

    while !open.is_empty() {
        close_scope(&mut open, &mut root);
    }

    root
}

/// Repeating regions enclosing `id`, outermost first.
fn enclosing_regions<'g>(graph: &'g WorkflowGraph, id: &str) -> Vec<&'g str> {
    let mut regions: Vec<&str> = graph
        .ancestors(id)
        .into_iter()
        .filter(|ancestor| graph.is_repeating_region(ancestor))
        .collect();
    regions.reverse();
    regions
}

fn is_prefix(open: &[PathActivity], regions: &[&str]) -> bool {
    open.len() <= regions.len() && open.iter().zip(regions).all(|(scope, region)| scope.id == *region)
}

fn close_scope(open: &mut Vec<PathActivity>, root: &mut Vec<PathActivity>) {
    if let Some(scope) = open.pop() {
        match open.last_mut() {
            Some(parent) => parent.push_child(scope),
            None => root.push(scope),
        }
    }
}
