//! Workflow definition parsing.
//!
//! Converts YAML or JSON documents into the `WorkflowDefinition` the engine
//! consumes. Parsing is purely syntactic; graph validation happens in
//! [`super::dag::validate`].

use std::path::{Path, PathBuf};

use stepflow_types::workflow::WorkflowDefinition;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid workflow YAML: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("invalid workflow JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse a YAML document. JSON is valid YAML, so this accepts both.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, DefinitionError> {
    Ok(serde_yaml_ng::from_str(yaml)?)
}

pub fn parse_workflow_json(json: &str) -> Result<WorkflowDefinition, DefinitionError> {
    Ok(serde_json::from_str(json)?)
}

pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, DefinitionError> {
    Ok(serde_yaml_ng::to_string(def)?)
}

/// Load a definition from disk. `.json` files are parsed as JSON, anything
/// else as YAML.
pub async fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let def = if is_json {
        parse_workflow_json(&content)?
    } else {
        parse_workflow_yaml(&content)?
    };
    tracing::debug!(path = %path.display(), workflow = %def.name, nodes = def.nodes.len(), "loaded workflow definition");
    Ok(def)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARIZE: &str = r#"
name: summarize
nodes:
  - id: start
    type: input
  - id: summarize
    type: ai
    timeout_secs: 30
    retry:
      max_attempts: 2
    config:
      prompt: "Summarize: {{ input.text }}"
  - id: out
    type: output
    optional: false
edges:
  - source: start
    target: summarize
  - source: summarize
    target: out
    condition: "output.text != ''"
"#;

    #[test]
    fn test_parse_yaml() {
        let def = parse_workflow_yaml(SUMMARIZE).unwrap();
        assert_eq!(def.name, "summarize");
        assert_eq!(def.version, "1.0.0");
        assert_eq!(def.nodes.len(), 3);
        assert_eq!(def.nodes[1].step_type, "ai");
        assert_eq!(def.nodes[1].timeout_secs, Some(30));
        let retry = def.nodes[1].retry.as_ref().unwrap();
        assert_eq!(retry.max_attempts, 2);
        assert_eq!(retry.base_delay_ms, 200);
        assert_eq!(def.edges[1].condition.as_deref(), Some("output.text != ''"));
    }

    #[test]
    fn test_parse_json_ignores_layout_fields() {
        let json = r#"{
            "name": "layout",
            "nodes": [
                { "id": "a", "type": "input", "position": { "x": 10, "y": 20 } },
                { "id": "b", "type": "output" }
            ],
            "edges": [{ "source": "a", "target": "b" }]
        }"#;
        let def = parse_workflow_json(json).unwrap();
        assert_eq!(def.nodes.len(), 2);
        assert!(def.edges[0].condition.is_none());
    }

    #[test]
    fn test_missing_type_is_rejected() {
        let err = parse_workflow_yaml("name: x\nnodes:\n  - id: a\n").unwrap_err();
        assert!(matches!(err, DefinitionError::Yaml(_)));
    }

    #[test]
    fn test_yaml_serialization_preserves_structure() {
        let def = parse_workflow_yaml(SUMMARIZE).unwrap();
        let yaml = serialize_workflow_yaml(&def).unwrap();
        let reparsed = parse_workflow_yaml(&yaml).unwrap();
        assert_eq!(reparsed.id, def.id);
        assert_eq!(reparsed.edges.len(), def.edges.len());
    }

    #[tokio::test]
    async fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("flow.yaml");
        tokio::fs::write(&yaml_path, SUMMARIZE).await.unwrap();
        assert_eq!(load_workflow_file(&yaml_path).await.unwrap().name, "summarize");

        let json_path = dir.path().join("flow.JSON");
        tokio::fs::write(&json_path, r#"{"name":"j","nodes":[]}"#)
            .await
            .unwrap();
        assert_eq!(load_workflow_file(&json_path).await.unwrap().name, "j");
    }

    #[tokio::test]
    async fn test_missing_file_reports_path() {
        let err = load_workflow_file(Path::new("/nonexistent/flow.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, DefinitionError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/flow.yaml"));
    }
}
