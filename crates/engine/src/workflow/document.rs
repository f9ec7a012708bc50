//! Workflow document loading.
//!
//! A workflow document is the serialized form of an already-parsed process:
//! its flow nodes plus the test cases declared against it. Documents are read
//! as JSON when the file extension says so and as YAML otherwise, then checked
//! for dangling references before a graph is built from them.

use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use bpmndt_types::{WorkflowDocument, WorkflowGraph, workflow::validation::collect_document_issues};

/// Parses a document from text, using JSON when `is_json` is set and YAML otherwise.
pub fn parse_workflow_document(content: &str, is_json: bool) -> Result<WorkflowDocument> {
    if is_json {
        serde_json::from_str(content).context("workflow document is not valid JSON")
    } else {
        serde_yaml::from_str(content).context("workflow document is not valid YAML")
    }
}

/// Loads and validates a document from the filesystem.
pub fn load_workflow_document(file_path: impl AsRef<Path>) -> Result<WorkflowDocument> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("failed to read workflow document: {}", file_path.display()))?;

    let is_json = file_path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));

    let document = parse_workflow_document(&content, is_json).with_context(|| format!("failed to parse {}", file_path.display()))?;
    validate(&document)?;
    Ok(document)
}

/// Builds the graph of a validated document.
pub fn graph_from_document(document: &WorkflowDocument) -> Result<WorkflowGraph> {
    validate(document)?;
    Ok(document.graph())
}

fn validate(document: &WorkflowDocument) -> Result<()> {
    let issues = collect_document_issues(document);
    if !issues.is_empty() {
        bail!("workflow document '{}' is malformed:\n- {}", document.process_id, issues.join("\n- "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_yaml_documents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("order.yaml");
        fs::write(
            &path,
            r#"
process_id: order
nodes:
  - id: start
    kind: event
    outgoing: [end]
  - id: end
    kind: event
test_cases:
  - name: Happy Path
    start: start
    end: end
"#,
        )
        .unwrap();

        let document = load_workflow_document(&path).expect("document should load");
        assert_eq!(document.process_id, "order");
        assert_eq!(document.nodes.len(), 2);
        assert_eq!(document.test_cases[0].name.as_deref(), Some("Happy Path"));
    }

    #[test]
    fn loads_json_documents_by_extension() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("order.JSON");
        fs::write(&path, r#"{"process_id":"order","nodes":[{"id":"start","kind":"event"}]}"#).unwrap();

        let graph = graph_from_document(&load_workflow_document(&path).unwrap()).unwrap();
        assert!(graph.contains("start"));
    }

    #[test]
    fn rejects_dangling_references() {
        let document = parse_workflow_document(
            r#"
process_id: order
nodes:
  - id: start
    outgoing: [nowhere]
"#,
            false,
        )
        .unwrap();

        let error = graph_from_document(&document).expect_err("dangling flow");
        assert!(error.to_string().contains("flows to unknown node 'nowhere'"));
    }
}
