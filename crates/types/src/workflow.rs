//! Workflow graph model shared by the path resolver, the planner and the CLI.
//!
//! The graph is the in-memory view of an already-parsed process definition:
//! flow nodes keyed by identifier in declaration order, each carrying its
//! outgoing sequence flows and an optional enclosing node. Nodes that own
//! children are embedded subprocesses; when they also carry multi-instance
//! loop characteristics they form a repeating region (a *scope*).

use std::{collections::HashSet, fmt};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub mod validation;

/// Suffix the runtime appends to a multi-instance activity id to address its
/// loop body.
pub const MULTI_INSTANCE_BODY_SUFFIX: &str = "#multiInstanceBody";

/// Returns the runtime identifier of the multi-instance body for `activity_id`.
pub fn multi_instance_body_id(activity_id: &str) -> String {
    format!("{activity_id}{MULTI_INSTANCE_BODY_SUFFIX}")
}

/// Element type of a flow node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Task,
    UserTask,
    ExternalTask,
    Event,
    Gateway,
    EventBasedGateway,
    CallActivity,
    SubProcess,
    #[default]
    Other,
}

/// Coarse classification used when reporting activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCategory {
    Task,
    Event,
    Gateway,
    CallActivity,
    Other,
}

impl ActivityKind {
    pub fn category(self) -> ActivityCategory {
        match self {
            ActivityKind::Task | ActivityKind::UserTask | ActivityKind::ExternalTask => ActivityCategory::Task,
            ActivityKind::Event => ActivityCategory::Event,
            ActivityKind::Gateway | ActivityKind::EventBasedGateway => ActivityCategory::Gateway,
            ActivityKind::CallActivity => ActivityCategory::CallActivity,
            ActivityKind::SubProcess | ActivityKind::Other => ActivityCategory::Other,
        }
    }
}

/// Ordering mode of a multi-instance activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    Sequential,
    Parallel,
}

impl LoopMode {
    pub fn is_sequential(self) -> bool {
        matches!(self, LoopMode::Sequential)
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopMode::Sequential => f.write_str("sequential"),
            LoopMode::Parallel => f.write_str("parallel"),
        }
    }
}

/// A single node of the workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    #[serde(default)]
    pub kind: ActivityKind,
    /// Targets of outgoing sequence flows, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outgoing: Vec<String>,
    /// Enclosing subprocess, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_instance: Option<LoopMode>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub async_before: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub async_after: bool,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, kind: ActivityKind) -> Self {
        Self {
            id: id.into(),
            kind,
            outgoing: Vec::new(),
            parent: None,
            multi_instance: None,
            async_before: false,
            async_after: false,
        }
    }

    pub fn with_outgoing<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outgoing.extend(targets.into_iter().map(Into::into));
        self
    }

    pub fn within(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn multi_instance(mut self, mode: LoopMode) -> Self {
        self.multi_instance = Some(mode);
        self
    }
}

/// Flow nodes of one process, keyed by id in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    process_id: String,
    nodes: IndexMap<String, FlowNode>,
}

impl WorkflowGraph {
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            nodes: IndexMap::new(),
        }
    }

    /// Builds a graph from nodes in declaration order. Later duplicates replace
    /// earlier ones; use [`validation::validate_document`] to reject them.
    pub fn from_nodes(process_id: impl Into<String>, nodes: impl IntoIterator<Item = FlowNode>) -> Self {
        let mut graph = Self::new(process_id);
        for node in nodes {
            graph.insert(node);
        }
        graph
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn insert(&mut self, node: FlowNode) -> Option<FlowNode> {
        self.nodes.insert(node.id.clone(), node)
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FlowNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a FlowNode> + use<'a> {
        let id = id.to_string();
        self.nodes.values().filter(move |node| node.parent.as_deref() == Some(id.as_str()))
    }

    pub fn has_children(&self, id: &str) -> bool {
        self.children(id).next().is_some()
    }

    /// True when `id` is a multi-instance node that owns children.
    pub fn is_repeating_region(&self, id: &str) -> bool {
        self.node(id).is_some_and(|node| node.multi_instance.is_some()) && self.has_children(id)
    }

    /// Children of `id` that no sibling flows into.
    pub fn entry_children(&self, id: &str) -> Vec<&FlowNode> {
        let children: Vec<&FlowNode> = self.children(id).collect();
        children
            .iter()
            .copied()
            .filter(|candidate| {
                !children
                    .iter()
                    .any(|sibling| sibling.outgoing.iter().any(|target| target == &candidate.id))
            })
            .collect()
    }

    /// Successor relation used for traversal.
    ///
    /// Entering a node that owns children continues with its entry children.
    /// A child without outgoing flows leaves its enclosing node, continuing
    /// with whatever that node flows to.
    pub fn successors(&self, id: &str) -> Vec<&str> {
        let Some(node) = self.node(id) else {
            return Vec::new();
        };

        if self.has_children(id) {
            return self.entry_children(id).into_iter().map(|child| child.id.as_str()).collect();
        }

        if !node.outgoing.is_empty() {
            return node.outgoing.iter().map(String::as_str).collect();
        }

        self.exit_successors(node)
    }

    fn exit_successors(&self, node: &FlowNode) -> Vec<&str> {
        let mut seen = HashSet::from([node.id.as_str()]);
        let mut current = node;
        while let Some(parent) = current.parent.as_deref().and_then(|parent_id| self.node(parent_id)) {
            if !seen.insert(parent.id.as_str()) {
                break;
            }
            if !parent.outgoing.is_empty() {
                return parent.outgoing.iter().map(String::as_str).collect();
            }
            current = parent;
        }
        Vec::new()
    }

    /// Chain of enclosing node ids, innermost first.
    pub fn ancestors(&self, id: &str) -> Vec<&str> {
        let mut ancestors = Vec::new();
        let mut current = self.node(id).and_then(|node| node.parent.as_deref());
        while let Some(parent_id) = current {
            if ancestors.contains(&parent_id) {
                break;
            }
            ancestors.push(parent_id);
            current = self.node(parent_id).and_then(|node| node.parent.as_deref());
        }
        ancestors
    }

    /// True when `id` is a top-level event without outgoing flows.
    pub fn is_process_end(&self, id: &str) -> bool {
        self.node(id)
            .is_some_and(|node| node.kind == ActivityKind::Event && node.outgoing.is_empty() && node.parent.is_none())
    }
}

/// Start/end pair (optionally named) for which a test case is planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start: String,
    pub end: String,
}

/// Serialized form of a parsed process: its nodes and the test cases
/// declared against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub process_id: String,
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub test_cases: Vec<TestCaseSpec>,
}

impl WorkflowDocument {
    pub fn graph(&self) -> WorkflowGraph {
        WorkflowGraph::from_nodes(self.process_id.clone(), self.nodes.iter().cloned())
    }
}
