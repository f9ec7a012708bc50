//! Structural checks for workflow documents.
//!
//! These run before a document is turned into a [`WorkflowGraph`](super::WorkflowGraph)
//! so that dangling references are reported up front instead of surfacing
//! as incomplete paths later.

use std::collections::{HashMap, HashSet};

use super::{FlowNode, WorkflowDocument};

/// Collects every structural problem found in `document`, in node order.
pub fn collect_document_issues(document: &WorkflowDocument) -> Vec<String> {
    let mut issues = Vec::new();

    if document.process_id.trim().is_empty() {
        issues.push("process id must not be empty".to_string());
    }

    let mut known = HashSet::new();
    let mut by_id: HashMap<&str, &FlowNode> = HashMap::new();
    for node in &document.nodes {
        by_id.entry(node.id.as_str()).or_insert(node);
        if node.id.trim().is_empty() {
            issues.push("flow node id must not be empty".to_string());
        }
        if !known.insert(node.id.as_str()) {
            issues.push(format!("duplicate flow node id '{}'", node.id));
        }
    }

    for node in &document.nodes {
        for target in &node.outgoing {
            if !known.contains(target.as_str()) {
                issues.push(format!("flow node '{}' flows to unknown node '{}'", node.id, target));
            }
        }

        if let Some(parent) = &node.parent {
            if parent == &node.id {
                issues.push(format!("flow node '{}' cannot enclose itself", node.id));
            } else if !known.contains(parent.as_str()) {
                issues.push(format!("flow node '{}' is enclosed by unknown node '{}'", node.id, parent));
            } else if encloses_itself(&by_id, node) {
                issues.push(format!("flow node '{}' encloses itself through its parents", node.id));
            }
        }
    }

    issues
}

/// True when following parents from `node` leads back to `node`.
fn encloses_itself(by_id: &HashMap<&str, &FlowNode>, node: &FlowNode) -> bool {
    let mut seen = HashSet::new();
    let mut current = node.parent.as_deref();
    while let Some(parent_id) = current {
        if parent_id == node.id {
            return true;
        }
        if !seen.insert(parent_id) {
            return false;
        }
        current = by_id.get(parent_id).and_then(|parent| parent.parent.as_deref());
    }
    false
}

/// Validates `document`, joining all problems into one message.
pub fn validate_document(document: &WorkflowDocument) -> Result<(), String> {
    let issues = collect_document_issues(document);
    if issues.is_empty() { Ok(()) } else { Err(issues.join("; ")) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ActivityKind, FlowNode};

    fn document(nodes: Vec<FlowNode>) -> WorkflowDocument {
        WorkflowDocument {
            process_id: "order".into(),
            nodes,
            test_cases: Vec::new(),
        }
    }

    #[test]
    fn well_formed_document_passes() {
        let document = document(vec![
            FlowNode::new("start", ActivityKind::Event).with_outgoing(["end"]),
            FlowNode::new("end", ActivityKind::Event),
        ]);
        assert!(validate_document(&document).is_ok());
    }

    #[test]
    fn dangling_references_are_reported() {
        let document = document(vec![
            FlowNode::new("start", ActivityKind::Event).with_outgoing(["missing"]),
            FlowNode::new("task", ActivityKind::Task).within("ghost"),
        ]);
        let issues = collect_document_issues(&document);
        assert_eq!(
            issues,
            vec![
                "flow node 'start' flows to unknown node 'missing'".to_string(),
                "flow node 'task' is enclosed by unknown node 'ghost'".to_string(),
            ]
        );
    }

    #[test]
    fn parent_cycles_are_reported() {
        let document = document(vec![
            FlowNode::new("a", ActivityKind::SubProcess).within("b"),
            FlowNode::new("b", ActivityKind::SubProcess).within("a"),
            FlowNode::new("c", ActivityKind::Task).within("a"),
            FlowNode::new("d", ActivityKind::Event),
        ]);
        assert_eq!(
            collect_document_issues(&document),
            vec![
                "flow node 'a' encloses itself through its parents".to_string(),
                "flow node 'b' encloses itself through its parents".to_string(),
            ]
        );
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let document = document(vec![
            FlowNode::new("task", ActivityKind::Task),
            FlowNode::new("task", ActivityKind::UserTask),
        ]);
        let error = validate_document(&document).expect_err("duplicates should fail");
        assert!(error.contains("duplicate flow node id 'task'"));
    }
}
