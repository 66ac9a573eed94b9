//! Workflow run orchestrator
//!
//! Loads a workflow from the definition store, orders its nodes with
//! `build_execution_order` and dispatches them one by one against a shared
//! context. A successful node replaces the context's `inputData` slot with
//! its output; a failed node leaves the context alone and the run goes on.
//!
//! Only lookup problems fail a run (unknown workflow, no nodes, storage
//! errors). Node failures are recorded in the report, never raised.

use crate::error::ChoreoError;
use crate::runtime::executor::OperatorDispatcher;
use crate::runtime::result::{OperatorResult, Payload};
use crate::runtime::scheduler::build_execution_order;
use crate::workflow::storage::WorkflowStore;
use crate::workflow::types::{Edge, ErrorPolicy, Node, OperatorTemplate, Workflow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Context key that carries the flowing payload between nodes
pub const INPUT_DATA_KEY: &str = "inputData";

/// Upper bound on attempts for a RETRY node, whatever its `retry_count`
pub const MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Failed,
}

/// Entry of the execution order as reported
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledNode {
    pub id: String,
    pub name: String,
    pub template_id: Option<String>,
}

/// Aggregated outcome of one workflow run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub workflow_id: String,
    pub workflow_name: Option<String>,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub input: Payload,
    pub node_count: usize,
    pub edge_count: usize,
    pub execution_order: Vec<ScheduledNode>,
    pub node_results: Vec<OperatorResult>,
    pub final_context: Payload,
    pub error: Option<String>,
    pub error_kind: Option<String>,
}

impl RunReport {
    fn started(workflow_id: &str, input: &Payload) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            workflow_name: None,
            status: RunStatus::Success,
            start_time: now,
            end_time: now,
            duration_ms: 0,
            input: input.clone(),
            node_count: 0,
            edge_count: 0,
            execution_order: Vec::new(),
            node_results: Vec::new(),
            final_context: input.clone(),
            error: None,
            error_kind: None,
        }
    }

    fn fail(mut self, error: ChoreoError) -> Self {
        tracing::error!("❌ Run {} of {} failed: {}", self.run_id, self.workflow_id, error);
        self.status = RunStatus::Failed;
        self.error_kind = Some(error.kind().to_string());
        self.error = Some(error.to_string());
        self.finish()
    }

    fn finish(mut self) -> Self {
        self.end_time = Utc::now();
        self.duration_ms = (self.end_time - self.start_time).num_milliseconds().max(0);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// Results of nodes that did not succeed
    pub fn failed_nodes(&self) -> impl Iterator<Item = &OperatorResult> {
        self.node_results.iter().filter(|result| result.status().is_failure())
    }
}

/// Drives workflow runs; cheap to share behind an `Arc`
#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    dispatcher: Arc<OperatorDispatcher>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn WorkflowStore>, dispatcher: Arc<OperatorDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<OperatorDispatcher> {
        &self.dispatcher
    }

    /// Run a workflow end to end and report on every node
    pub async fn run_workflow(&self, workflow_id: &str, input: Payload) -> RunReport {
        let mut report = RunReport::started(workflow_id, &input);
        tracing::info!("🚀 Starting run {} of workflow {}", report.run_id, workflow_id);

        let workflow = match self.store.get_workflow(workflow_id).await {
            Ok(Some(workflow)) => workflow,
            Ok(None) => return report.fail(ChoreoError::WorkflowNotFound(workflow_id.to_string())),
            Err(e) => return report.fail(ChoreoError::Storage(format!("{:#}", e))),
        };
        report.workflow_name = Some(workflow.name.clone());

        let (nodes, edges) = match self.load_graph(&workflow).await {
            Ok(graph) => graph,
            Err(e) => return report.fail(e),
        };
        report.node_count = nodes.len();
        report.edge_count = edges.len();

        if nodes.is_empty() {
            return report.fail(ChoreoError::EmptyWorkflow(workflow.id.clone()));
        }

        let order = build_execution_order(&nodes, &edges);
        report.execution_order = order
            .iter()
            .map(|node| ScheduledNode {
                id: node.id.clone(),
                name: node.name.clone(),
                template_id: node.template_id.clone(),
            })
            .collect();

        let mut context = input;
        for (step, node) in order.iter().enumerate() {
            tracing::info!(
                "📍 Step {}/{}: node '{}' ({})",
                step + 1,
                order.len(),
                node.name,
                node.id
            );

            let result = self.run_node(node, &context).await;
            if result.is_success() {
                context.insert(INPUT_DATA_KEY.to_string(), Value::Object(result.output_data.clone()));
            }
            report.node_results.push(result);
        }

        report.final_context = context;
        let report = report.finish();

        tracing::info!(
            "🎉 Run {} finished in {}ms ({} nodes, {} failed)",
            report.run_id,
            report.duration_ms,
            report.node_results.len(),
            report.failed_nodes().count()
        );
        report
    }

    async fn load_graph(
        &self,
        workflow: &Workflow,
    ) -> Result<(Vec<Node>, Vec<Edge>), ChoreoError> {
        let nodes = self
            .store
            .list_nodes(&workflow.id)
            .await
            .map_err(|e| ChoreoError::Storage(format!("{:#}", e)))?;
        let edges = self
            .store
            .list_edges(&workflow.id)
            .await
            .map_err(|e| ChoreoError::Storage(format!("{:#}", e)))?;
        Ok((nodes, edges))
    }

    /// Dispatch one node, applying its enabled flag and error policy
    async fn run_node(&self, node: &Node, context: &Payload) -> OperatorResult {
        if !node.enabled {
            tracing::debug!("⏭️ Node '{}' disabled", node.id);
            return OperatorResult::skipped("node disabled")
                .with_node_info(&node.id, &node.name)
                .with_template_info(node.template_id.clone(), None);
        }

        let template = match self.resolve_template(node).await {
            Ok(template) => template,
            Err(result) => return *result,
        };

        let attempts_allowed = match node.on_error {
            ErrorPolicy::Retry => node.retry_count.saturating_add(1).min(MAX_ATTEMPTS),
            _ => 1,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .dispatcher
                .execute(
                    &template.implementation,
                    &template.method,
                    context.clone(),
                    Some(&template.id),
                )
                .await
                .with_node_info(&node.id, &node.name)
                .with_template_info(Some(template.id.clone()), Some(template.name.clone()));

            if result.is_success() || attempt >= attempts_allowed {
                return if attempts_allowed > 1 {
                    result.with_metadata("attempts", attempt)
                } else {
                    result
                };
            }

            tracing::warn!(
                "🔁 Node '{}' failed (attempt {}/{}), retrying",
                node.id,
                attempt,
                attempts_allowed
            );
        }
    }

    /// The node's template when it can be dispatched, else a ready FAILED result
    async fn resolve_template(&self, node: &Node) -> Result<OperatorTemplate, Box<OperatorResult>> {
        let not_configured = |detail: String| {
            tracing::warn!("⚠️ Node '{}': operator not configured ({})", node.id, detail);
            Box::new(
                OperatorResult::failure_with_code("OperatorNotConfigured", format!("operator not configured: {}", detail))
                    .with_node_info(&node.id, &node.name)
                    .with_template_info(node.template_id.clone(), None),
            )
        };

        let Some(template_id) = node.template_id.as_deref() else {
            return Err(not_configured("node has no template".to_string()));
        };

        let template = match self.store.get_template(template_id).await {
            Ok(Some(template)) => template,
            Ok(None) => return Err(not_configured(format!("template {} not found", template_id))),
            Err(e) => {
                let error = anyhow::Error::new(ChoreoError::Storage(format!("{:#}", e)));
                return Err(Box::new(
                    OperatorResult::failure_with_error("Template lookup failed", &error)
                        .with_node_info(&node.id, &node.name)
                        .with_template_info(node.template_id.clone(), None),
                ));
            }
        };

        if !template.is_dispatchable() {
            return Err(not_configured(format!("template {} is disabled or incomplete", template.id)));
        }

        Ok(template)
    }
}
