//! Definition store seam and its SQLite implementation
//!
//! The orchestrator only ever reads definitions: a workflow header, its nodes
//! and edges in stored order, and the operator templates the nodes point at.
//! Writing happens out of band; `SqliteWorkflowStore::import_bundle` exists to
//! seed a database from a JSON definitions file.

use crate::runtime::result::Payload;
use crate::workflow::types::{
    ConnectionKind, DefinitionBundle, Edge, ErrorPolicy, Node, OperatorTemplate, Position, Workflow,
};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

/// Read side of the workflow definition store
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>>;

    /// Nodes of a workflow in stored order
    async fn list_nodes(&self, workflow_id: &str) -> Result<Vec<Node>>;

    /// Edges of a workflow in stored order
    async fn list_edges(&self, workflow_id: &str) -> Result<Vec<Edge>>;

    async fn get_template(&self, id: &str) -> Result<Option<OperatorTemplate>>;
}

/// SQLite-backed definition store
///
/// Nodes and edges keep a `seq` column so they come back in the order they
/// were imported; the scheduler's tie-breaking depends on it.
#[derive(Debug, Clone)]
pub struct SqliteWorkflowStore {
    pool: SqlitePool,
}

impl SqliteWorkflowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url` and initialize the schema
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| anyhow::anyhow!("Invalid store url '{}': {}", url, e))?
            .create_if_missing(true);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    anyhow::anyhow!("Failed to create store directory '{}': {}", parent.display(), e)
                })?;
            }
        }

        tracing::info!("🗄️ Opening definition store: {}", url);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Create the definition tables; safe to call repeatedly
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_nodes (
                id TEXT NOT NULL,
                workflow_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                name TEXT NOT NULL,
                template_id TEXT,
                position_x REAL NOT NULL DEFAULT 0,
                position_y REAL NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1,
                execution_order INTEGER,
                on_error TEXT NOT NULL DEFAULT 'CONTINUE',
                retry_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (workflow_id, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_edges (
                workflow_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'DATA',
                condition TEXT,
                data_mapping JSON,
                PRIMARY KEY (workflow_id, seq)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS operator_templates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                implementation TEXT NOT NULL,
                method TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                params JSON NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Write every workflow and template of a bundle
    ///
    /// Templates and workflow headers are upserted; a workflow's nodes and
    /// edges are replaced wholesale. Runs in a single transaction.
    pub async fn import_bundle(&self, bundle: &DefinitionBundle) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for template in &bundle.templates {
            sqlx::query(
                r#"
                INSERT INTO operator_templates (id, name, implementation, method, enabled, params)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    implementation = excluded.implementation,
                    method = excluded.method,
                    enabled = excluded.enabled,
                    params = excluded.params
                "#,
            )
            .bind(&template.id)
            .bind(&template.name)
            .bind(&template.implementation)
            .bind(&template.method)
            .bind(template.enabled)
            .bind(serde_json::to_string(&template.params)?)
            .execute(&mut *tx)
            .await?;
        }

        for definition in &bundle.workflows {
            let workflow = &definition.workflow;
            sqlx::query(
                r#"
                INSERT INTO workflows (id, name, status, updated_at)
                VALUES (?, ?, ?, CURRENT_TIMESTAMP)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    status = excluded.status,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(&workflow.id)
            .bind(&workflow.name)
            .bind(&workflow.status)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM workflow_nodes WHERE workflow_id = ?")
                .bind(&workflow.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM workflow_edges WHERE workflow_id = ?")
                .bind(&workflow.id)
                .execute(&mut *tx)
                .await?;

            for (seq, node) in definition.nodes.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO workflow_nodes (
                        id, workflow_id, seq, name, template_id, position_x, position_y,
                        enabled, execution_order, on_error, retry_count
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&node.id)
                .bind(&workflow.id)
                .bind(seq as i64)
                .bind(&node.name)
                .bind(&node.template_id)
                .bind(node.position.x)
                .bind(node.position.y)
                .bind(node.enabled)
                .bind(node.execution_order)
                .bind(node.on_error.as_str())
                .bind(node.retry_count as i64)
                .execute(&mut *tx)
                .await?;
            }

            for (seq, edge) in definition.edges.iter().enumerate() {
                let mapping = edge
                    .data_mapping
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                sqlx::query(
                    r#"
                    INSERT INTO workflow_edges (
                        workflow_id, seq, source_id, target_id, kind, condition, data_mapping
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&workflow.id)
                .bind(seq as i64)
                .bind(&edge.from)
                .bind(&edge.to)
                .bind(edge.kind.as_str())
                .bind(&edge.condition)
                .bind(mapping)
                .execute(&mut *tx)
                .await?;
            }

            tracing::debug!(
                "Imported workflow {} ({} nodes, {} edges)",
                workflow.id,
                definition.nodes.len(),
                definition.edges.len()
            );
        }

        tx.commit().await?;

        tracing::info!(
            "📥 Imported {} workflows and {} templates",
            bundle.workflows.len(),
            bundle.templates.len()
        );
        Ok(())
    }

    /// All workflow headers, by id
    pub async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let rows = sqlx::query("SELECT id, name, status FROM workflows ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(workflow_from_row).collect()
    }
}

fn workflow_from_row(row: &SqliteRow) -> Result<Workflow> {
    Ok(Workflow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status: row.try_get("status")?,
    })
}

fn node_from_row(row: &SqliteRow) -> Result<Node> {
    let on_error: String = row.try_get("on_error")?;
    let retry_count: i64 = row.try_get("retry_count")?;

    Ok(Node {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        template_id: row.try_get("template_id")?,
        position: Position {
            x: row.try_get("position_x")?,
            y: row.try_get("position_y")?,
        },
        enabled: row.try_get("enabled")?,
        execution_order: row.try_get("execution_order")?,
        on_error: ErrorPolicy::parse(&on_error),
        retry_count: u32::try_from(retry_count).unwrap_or(0),
    })
}

fn edge_from_row(row: &SqliteRow) -> Result<Edge> {
    let kind: String = row.try_get("kind")?;
    let mapping: Option<String> = row.try_get("data_mapping")?;

    Ok(Edge {
        from: row.try_get("source_id")?,
        to: row.try_get("target_id")?,
        kind: ConnectionKind::parse(&kind),
        condition: row.try_get("condition")?,
        data_mapping: mapping.map(|raw| serde_json::from_str(&raw)).transpose()?,
    })
}

fn template_from_row(row: &SqliteRow) -> Result<OperatorTemplate> {
    let params: String = row.try_get("params")?;
    let params: Payload = serde_json::from_str(&params)
        .map_err(|e| anyhow::anyhow!("Template params are not a JSON object: {}", e))?;

    Ok(OperatorTemplate {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        implementation: row.try_get("implementation")?,
        method: row.try_get("method")?,
        enabled: row.try_get("enabled")?,
        params,
    })
}

#[async_trait]
impl WorkflowStore for SqliteWorkflowStore {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT id, name, status FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn list_nodes(&self, workflow_id: &str) -> Result<Vec<Node>> {
        let rows = sqlx::query("SELECT * FROM workflow_nodes WHERE workflow_id = ? ORDER BY seq")
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(node_from_row).collect()
    }

    async fn list_edges(&self, workflow_id: &str) -> Result<Vec<Edge>> {
        let rows = sqlx::query("SELECT * FROM workflow_edges WHERE workflow_id = ? ORDER BY seq")
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(edge_from_row).collect()
    }

    async fn get_template(&self, id: &str) -> Result<Option<OperatorTemplate>> {
        let row = sqlx::query("SELECT * FROM operator_templates WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(template_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::WorkflowDefinition;
    use serde_json::json;

    fn bundle() -> DefinitionBundle {
        let mut params = Payload::new();
        params.insert("table".into(), json!("orders"));

        let mut retrying = Node::new("b", "Load", Some("t-load".into()));
        retrying.on_error = ErrorPolicy::Retry;
        retrying.retry_count = 2;

        DefinitionBundle {
            workflows: vec![WorkflowDefinition {
                workflow: Workflow {
                    id: "wf".into(),
                    name: "Orders".into(),
                    status: Some("ACTIVE".into()),
                },
                nodes: vec![
                    Node::new("c", "Report", None),
                    Node::new("a", "Extract", Some("t-load".into())),
                    retrying,
                ],
                edges: vec![
                    Edge::new("a", "b"),
                    Edge::new("b", "c").with_kind(ConnectionKind::Error),
                ],
            }],
            templates: vec![OperatorTemplate {
                id: "t-load".into(),
                name: "Load".into(),
                implementation: "sql".into(),
                method: "insert".into(),
                enabled: true,
                params,
            }],
        }
    }

    #[tokio::test]
    async fn import_then_read_back_in_stored_order() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("defs.db").display());
        let store = SqliteWorkflowStore::connect(&url).await.unwrap();

        store.import_bundle(&bundle()).await.unwrap();

        let workflow = store.get_workflow("wf").await.unwrap().unwrap();
        assert_eq!(workflow.name, "Orders");

        let ids: Vec<String> = store
            .list_nodes("wf")
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);

        let nodes = store.list_nodes("wf").await.unwrap();
        assert_eq!(nodes[2].on_error, ErrorPolicy::Retry);
        assert_eq!(nodes[2].retry_count, 2);
        assert_eq!(nodes[0].template_id, None);

        let edges = store.list_edges("wf").await.unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[1].kind, ConnectionKind::Error);

        let template = store.get_template("t-load").await.unwrap().unwrap();
        assert_eq!(template.param("table"), Some(&json!("orders")));
        assert!(store.get_template("missing").await.unwrap().is_none());
        assert!(store.get_workflow("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reimport_replaces_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("defs.db").display());
        let store = SqliteWorkflowStore::connect(&url).await.unwrap();

        let mut defs = bundle();
        store.import_bundle(&defs).await.unwrap();

        defs.workflows[0].nodes.truncate(1);
        defs.workflows[0].edges.clear();
        store.import_bundle(&defs).await.unwrap();

        assert_eq!(store.list_nodes("wf").await.unwrap().len(), 1);
        assert!(store.list_edges("wf").await.unwrap().is_empty());
        assert_eq!(store.list_workflows().await.unwrap().len(), 1);
    }
}
