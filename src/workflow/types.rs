//! Core workflow type definitions
//!
//! Workflows, nodes, connections and operator templates as read from a
//! definition store. All of them are plain serde types so they can be loaded
//! from JSON bundles as well as from SQLite rows.

use crate::runtime::result::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A workflow header; nodes and edges are listed separately by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-orders")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// Free-form lifecycle status ("ACTIVE", "DRAFT", ...)
    #[serde(default)]
    pub status: Option<String>,
}

/// What a node does when its operator fails
///
/// Runs are test runs: STOP is recorded on the node but the run carries on
/// exactly as with CONTINUE. RETRY re-dispatches up to `retry_count` more
/// times, capped by the engine's `MAX_ATTEMPTS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorPolicy {
    Stop,
    #[default]
    Continue,
    Retry,
}

impl ErrorPolicy {
    /// Parse a stored policy string; unknown values fall back to CONTINUE
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "STOP" => ErrorPolicy::Stop,
            "RETRY" => ErrorPolicy::Retry,
            _ => ErrorPolicy::Continue,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorPolicy::Stop => "STOP",
            ErrorPolicy::Continue => "CONTINUE",
            ErrorPolicy::Retry => "RETRY",
        }
    }
}

/// Canvas position of a node; carried for round-tripping only
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

fn enabled_by_default() -> bool {
    true
}

/// One step of a workflow, bound to an operator template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow
    pub id: String,
    /// Display name
    pub name: String,
    /// Operator template backing this node
    pub template_id: Option<String>,
    #[serde(default)]
    pub position: Position,
    /// Disabled nodes are reported as SKIPPED and never dispatched
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Declared ordering hint; the scheduler does not use it
    #[serde(default)]
    pub execution_order: Option<i32>,
    #[serde(default)]
    pub on_error: ErrorPolicy,
    /// Extra attempts when `on_error` is RETRY
    #[serde(default)]
    pub retry_count: u32,
}

impl Node {
    pub fn new(id: impl Into<String>, name: impl Into<String>, template_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            template_id,
            position: Position::default(),
            enabled: true,
            execution_order: None,
            on_error: ErrorPolicy::default(),
            retry_count: 0,
        }
    }
}

/// Kind of a connection between two nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionKind {
    #[default]
    Data,
    Control,
    Error,
}

impl ConnectionKind {
    /// Parse a stored kind; unknown values are treated as DATA
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CONTROL" => ConnectionKind::Control,
            "ERROR" => ConnectionKind::Error,
            _ => ConnectionKind::Data,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::Data => "DATA",
            ConnectionKind::Control => "CONTROL",
            ConnectionKind::Error => "ERROR",
        }
    }
}

/// Directed connection between two nodes
///
/// `condition` and `data_mapping` are stored for the designer; the scheduler
/// never evaluates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node ID
    pub from: String,
    /// Target node ID
    pub to: String,
    #[serde(default)]
    pub kind: ConnectionKind,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub data_mapping: Option<Value>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: ConnectionKind::Data,
            condition: None,
            data_mapping: None,
        }
    }

    pub fn with_kind(mut self, kind: ConnectionKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Stored definition identifying which operator backs a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorTemplate {
    pub id: String,
    pub name: String,
    /// Registry identifier of the operator implementation (e.g., "sql")
    pub implementation: String,
    /// Entry point on that implementation (e.g., "query")
    pub method: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Declared parameters: key -> default value (e.g., "datasource", "table")
    #[serde(default)]
    pub params: Payload,
}

impl OperatorTemplate {
    /// Whether this template may be dispatched at all
    pub fn is_dispatchable(&self) -> bool {
        self.enabled && !self.implementation.trim().is_empty() && !self.method.trim().is_empty()
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }
}

/// A workflow with everything needed to run it, as found in JSON bundles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow: Workflow,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// A definitions file: workflows plus the templates they reference
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionBundle {
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
    #[serde(default)]
    pub templates: Vec<OperatorTemplate>,
}

impl DefinitionBundle {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("Invalid definition bundle: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(implementation: &str, method: &str, enabled: bool) -> OperatorTemplate {
        OperatorTemplate {
            id: "t1".into(),
            name: "tpl".into(),
            implementation: implementation.into(),
            method: method.into(),
            enabled,
            params: Payload::new(),
        }
    }

    #[test]
    fn template_dispatch_eligibility() {
        assert!(template("sql", "query", true).is_dispatchable());
        assert!(!template("sql", "query", false).is_dispatchable());
        assert!(!template("  ", "query", true).is_dispatchable());
        assert!(!template("sql", "", true).is_dispatchable());
    }

    #[test]
    fn edge_kinds_parse() {
        assert_eq!(ConnectionKind::parse("CONTROL"), ConnectionKind::Control);
        assert_eq!(ConnectionKind::parse("error"), ConnectionKind::Error);
        assert_eq!(ConnectionKind::parse("whatever"), ConnectionKind::Data);
    }

    #[test]
    fn bundle_defaults_fill_missing_fields() {
        let bundle = DefinitionBundle::from_json(
            &json!({
                "workflows": [{
                    "workflow": {"id": "wf", "name": "Demo"},
                    "nodes": [{"id": "a", "name": "A", "template_id": "t1"}],
                    "edges": [{"from": "a", "to": "b"}]
                }],
                "templates": [{"id": "t1", "name": "T", "implementation": "sql", "method": "query"}]
            })
            .to_string(),
        )
        .unwrap();

        let definition = &bundle.workflows[0];
        assert!(definition.nodes[0].enabled);
        assert_eq!(definition.nodes[0].on_error, ErrorPolicy::Continue);
        assert_eq!(definition.edges[0].kind, ConnectionKind::Data);
        assert!(bundle.templates[0].enabled);
        assert!(bundle.templates[0].params.is_empty());
    }

    #[test]
    fn error_policy_parse() {
        assert_eq!(ErrorPolicy::parse("retry"), ErrorPolicy::Retry);
        assert_eq!(ErrorPolicy::parse("STOP"), ErrorPolicy::Stop);
        assert_eq!(ErrorPolicy::parse(""), ErrorPolicy::Continue);
    }
}
