//! # Path Model
//!
//! Resolved execution paths between two flow nodes of a workflow graph.
//!
//! A [`PathResult`] is computed once per (start, end) pair by
//! [`resolve`](crate::resolve::resolve) and never changes afterwards. Valid
//! paths list their activities in visitation order; the members of a
//! repeating region are nested under one scope activity instead of being
//! flattened, so that a loop driver can iterate the region as one unit.
//!
//! Scopes are transparent for navigation: [`activity_links`] reports the
//! first child's predecessor as the scope's predecessor and the last child's
//! successor as the scope's successor.

use bpmndt_types::{ActivityCategory, ActivityKind, FlowNode, LoopMode, multi_instance_body_id};
use serde::Serialize;
use thiserror::Error;

/// One activity of a resolved path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathActivity {
    pub id: String,
    pub kind: ActivityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_instance: Option<LoopMode>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub async_before: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub async_after: bool,
    /// Members of a repeating region, in visitation order. Only scopes have children.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PathActivity>,
    scope: bool,
}

impl PathActivity {
    pub fn from_node(node: &FlowNode) -> Self {
        Self {
            id: node.id.clone(),
            kind: node.kind,
            multi_instance: node.multi_instance,
            async_before: node.async_before,
            async_after: node.async_after,
            children: Vec::new(),
            scope: false,
        }
    }

    /// Creates the scope for a repeating region.
    pub fn scope_from_node(node: &FlowNode) -> Self {
        Self {
            scope: true,
            ..Self::from_node(node)
        }
    }

    pub fn is_scope(&self) -> bool {
        self.scope
    }

    pub fn category(&self) -> ActivityCategory {
        self.kind.category()
    }

    pub fn is_event_based_gateway(&self) -> bool {
        self.kind == ActivityKind::EventBasedGateway
    }

    /// Identifier used when asking the runtime about this activity; scopes
    /// are addressed through their multi-instance body.
    pub fn runtime_id(&self) -> String {
        if self.scope {
            multi_instance_body_id(&self.id)
        } else {
            self.id.clone()
        }
    }

    pub fn push_child(&mut self, child: PathActivity) {
        self.children.push(child);
    }
}

/// Classification of a path resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PathResult {
    /// Start and end are the same node.
    Empty,
    /// Both nodes exist but no path connects them.
    Incomplete,
    /// At least one node does not exist.
    Invalid { unresolved: Vec<String> },
    Valid { activities: Vec<PathActivity> },
}

impl PathResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, PathResult::Valid { .. })
    }

    pub fn activities(&self) -> Option<&[PathActivity]> {
        match self {
            PathResult::Valid { activities } => Some(activities),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<PathResolutionError> {
        match self {
            PathResult::Empty => Some(PathResolutionError::Empty),
            PathResult::Incomplete => Some(PathResolutionError::Incomplete),
            PathResult::Invalid { unresolved } => Some(PathResolutionError::Invalid(unresolved.clone())),
            PathResult::Valid { .. } => None,
        }
    }

    pub fn into_activities(self) -> Result<Vec<PathActivity>, PathResolutionError> {
        match self {
            PathResult::Valid { activities } => Ok(activities),
            PathResult::Empty => Err(PathResolutionError::Empty),
            PathResult::Incomplete => Err(PathResolutionError::Incomplete),
            PathResult::Invalid { unresolved } => Err(PathResolutionError::Invalid(unresolved)),
        }
    }

    /// Navigation links of a valid path; empty otherwise.
    pub fn links(&self) -> Vec<ActivityLink<'_>> {
        self.activities().map(activity_links).unwrap_or_default()
    }
}

/// Reason a path cannot back a runnable test.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathResolutionError {
    #[error("Path is empty")]
    Empty,
    #[error("Path is incomplete")]
    Incomplete,
    #[error("Path is invalid: flow nodes [{}] do not exist", .0.join(", "))]
    Invalid(Vec<String>),
}

/// Neighbours of one activity of a resolved path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityLink<'a> {
    pub id: &'a str,
    pub prev: Option<&'a str>,
    pub next: Option<&'a str>,
    /// Enclosing scope, if the activity is nested.
    pub parent: Option<&'a str>,
    pub depth: usize,
}

/// Flattens `activities` depth-first, linking each to its neighbours.
pub fn activity_links(activities: &[PathActivity]) -> Vec<ActivityLink<'_>> {
    let mut links = Vec::new();
    collect_links(activities, None, None, None, 0, &mut links);
    links
}

fn collect_links<'a>(
    activities: &'a [PathActivity],
    parent: Option<&'a str>,
    outer_prev: Option<&'a str>,
    outer_next: Option<&'a str>,
    depth: usize,
    links: &mut Vec<ActivityLink<'a>>,
) {
    for (index, activity) in activities.iter().enumerate() {
        let prev = match index {
            0 => outer_prev,
            _ => Some(activities[index - 1].id.as_str()),
        };
        let next = activities.get(index + 1).map(|next| next.id.as_str()).or(outer_next);

        links.push(ActivityLink {
            id: &activity.id,
            prev,
            next,
            parent,
            depth,
        });

        if activity.is_scope() {
            collect_links(&activity.children, Some(&activity.id), prev, next, depth + 1, links);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(id: &str) -> PathActivity {
        PathActivity::from_node(&FlowNode::new(id, ActivityKind::Task))
    }

    #[test]
    fn scope_children_inherit_scope_neighbours() {
        let mut scope = PathActivity::scope_from_node(&FlowNode::new("region", ActivityKind::SubProcess).multi_instance(LoopMode::Parallel));
        scope.push_child(activity("inner1"));
        scope.push_child(activity("inner2"));
        let activities = vec![activity("before"), scope, activity("after")];

        let links = activity_links(&activities);
        let ids: Vec<&str> = links.iter().map(|link| link.id).collect();
        assert_eq!(ids, vec!["before", "region", "inner1", "inner2", "after"]);

        let first = &links[2];
        assert_eq!(first.prev, Some("before"));
        assert_eq!(first.next, Some("inner2"));
        assert_eq!(first.parent, Some("region"));
        assert_eq!(first.depth, 1);

        let last = &links[3];
        assert_eq!(last.prev, Some("inner1"));
        assert_eq!(last.next, Some("after"));
    }

    #[test]
    fn scopes_are_addressed_through_their_body() {
        let scope = PathActivity::scope_from_node(&FlowNode::new("region", ActivityKind::SubProcess));
        assert_eq!(scope.runtime_id(), "region#multiInstanceBody");
        assert_eq!(activity("task").runtime_id(), "task");
    }

    #[test]
    fn invalid_error_lists_unresolved_ids() {
        let result = PathResult::Invalid {
            unresolved: vec!["a".into(), "b".into()],
        };
        assert!(result.links().is_empty());
        let error = result.into_activities().expect_err("invalid path");
        assert_eq!(error.to_string(), "Path is invalid: flow nodes [a, b] do not exist");
    }
}
