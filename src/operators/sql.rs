//! Data-access operator
//!
//! Runs queries and simple row writes against the datasource configured for
//! the calling template. An invocation may carry its own `datasource` object,
//! which then takes precedence over the template's.
//!
//! Generated statements only ever interpolate validated identifiers; all
//! values are bound as parameters.

use crate::datasource::{DatasourceConfig, Dialect, PoolManager, QueryHandle};
use crate::error::ChoreoError;
use crate::operators::{json_or_text, template_params, Invocation, Operator, OperatorReturn};
use crate::runtime::result::{OperatorResult, Payload};
use crate::workflow::storage::WorkflowStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

pub const SQL_OPERATOR_ID: &str = "sql";

const ENTRY_POINTS: &[&str] = &["query", "insert", "update", "delete"];

/// Deletes above this many rows are flagged in the output
const MASS_DELETE_THRESHOLD: u64 = 1000;

pub struct SqlOperator {
    pools: Arc<PoolManager>,
    store: Arc<dyn WorkflowStore>,
}

/// Everything a statement needs: the handle plus the merged parameters
struct SqlContext {
    handle: QueryHandle,
    params: Payload,
    custom_datasource: bool,
}

impl SqlContext {
    /// Input value first, then the template's declared default
    fn string(&self, invocation: &Invocation, key: &str) -> Option<String> {
        invocation
            .str(key)
            .or_else(|| {
                self.params
                    .get(key)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
            })
            .map(str::to_string)
    }
}

impl SqlOperator {
    pub fn new(pools: Arc<PoolManager>, store: Arc<dyn WorkflowStore>) -> Self {
        Self { pools, store }
    }

    async fn context(&self, invocation: &Invocation) -> Result<SqlContext> {
        let params = template_params(self.store.as_ref(), invocation.template_id.as_deref()).await?;

        let custom = invocation
            .get("datasource")
            .map(json_or_text)
            .filter(|value| value.as_object().is_some_and(|map| !map.is_empty()));

        let (config, custom_datasource) = match custom {
            Some(value) => (DatasourceConfig::from_value(&value)?, true),
            None => {
                let configured = params.get("datasource").ok_or_else(|| {
                    ChoreoError::InvalidDatasource("no datasource configured for this template".into())
                })?;
                (DatasourceConfig::from_value(configured)?, false)
            }
        };

        if custom_datasource {
            tracing::info!(
                "🔀 Using invocation datasource for template {:?}",
                invocation.template_id
            );
        }

        let handle = self.pools.query_handle(&config).await?;
        Ok(SqlContext {
            handle,
            params,
            custom_datasource,
        })
    }

    async fn query(&self, invocation: Invocation) -> Result<OperatorReturn> {
        let start = Utc::now();
        let ctx = self.context(&invocation).await?;

        let sql = ctx
            .string(&invocation, "sql_statement")
            .ok_or_else(|| anyhow::anyhow!("sql_statement must not be empty"))?;
        let values = positional_values(invocation.get("query_params"));

        tracing::info!("🔍 Executing query for template {:?}: {}", invocation.template_id, sql);
        let rows = ctx.handle.query_for_list(&sql, &values).await?;
        let row_count = rows.len();

        let mut output = Payload::new();
        output.insert("queryResult".into(), Value::Array(rows.into_iter().map(Value::Object).collect()));
        output.insert("rowCount".into(), Value::from(row_count));
        output.insert("sql".into(), Value::from(sql.as_str()));
        output.insert("templateId".into(), template_value(&invocation));
        output.insert("message".into(), Value::from("query executed"));

        Ok(OperatorResult::success_between(output, start, Utc::now())
            .with_log("query executed")
            .with_metadata("rowCount", row_count)
            .with_metadata("sqlLength", sql.len())
            .with_metadata("hasParameters", !values.is_empty())
            .with_metadata("parameterCount", values.len())
            .with_metadata("useCustomDataSource", ctx.custom_datasource)
            .into())
    }

    async fn insert(&self, invocation: Invocation) -> Result<OperatorReturn> {
        let start = Utc::now();
        let ctx = self.context(&invocation).await?;
        let dialect = ctx.handle.dialect();

        let table = ctx
            .string(&invocation, "table")
            .ok_or_else(|| anyhow::anyhow!("table must not be empty"))?;
        validate_identifier(&table)?;

        let row = object_input(&invocation, "insertData")
            .or_else(|| object_input(&invocation, "inputData"))
            .filter(|row| !row.is_empty())
            .ok_or_else(|| anyhow::anyhow!("insert data must not be empty"))?;

        let mut columns = Vec::with_capacity(row.len());
        let mut placeholders = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());
        for (index, (column, value)) in row.iter().enumerate() {
            validate_identifier(column)?;
            columns.push(dialect.quote(column));
            placeholders.push(dialect.placeholder(index + 1));
            values.push(value.clone());
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            dialect.quote(&table),
            columns.join(", "),
            placeholders.join(", ")
        );

        tracing::info!("➕ Inserting into {}: {}", table, sql);
        let affected = ctx.handle.update(&sql, &values).await?;

        let mut output = Payload::new();
        output.insert("affectedRows".into(), Value::from(affected));
        output.insert("table".into(), Value::from(table.as_str()));
        output.insert("sql".into(), Value::from(sql.as_str()));
        output.insert("templateId".into(), template_value(&invocation));
        output.insert("message".into(), Value::from("insert executed"));

        Ok(OperatorResult::success_between(output, start, Utc::now())
            .with_log("insert executed")
            .with_metadata("affectedRows", affected)
            .with_metadata("useCustomDataSource", ctx.custom_datasource)
            .into())
    }

    async fn update(&self, invocation: Invocation) -> Result<OperatorReturn> {
        let start = Utc::now();
        let ctx = self.context(&invocation).await?;
        let dialect = ctx.handle.dialect();

        let table = ctx.string(&invocation, "table");
        let update_data = object_input(&invocation, "updateData").unwrap_or_default();
        let where_condition = object_input(&invocation, "whereCondition").unwrap_or_default();
        let custom_sql = invocation.str("sql_statement").map(str::to_string);

        let (sql, values) = match (&custom_sql, &table) {
            (Some(sql), _) => {
                let values = update_data
                    .values()
                    .chain(where_condition.values())
                    .cloned()
                    .collect::<Vec<_>>();
                (sql.clone(), values)
            }
            (None, Some(table)) => {
                validate_identifier(table)?;
                if update_data.is_empty() {
                    anyhow::bail!("updateData must not be empty");
                }
                if where_condition.is_empty() {
                    anyhow::bail!("update requires a whereCondition");
                }

                let mut values = Vec::new();
                let mut assignments = Vec::new();
                for (column, value) in &update_data {
                    validate_identifier(column)?;
                    values.push(value.clone());
                    assignments.push(format!("{} = {}", dialect.quote(column), dialect.placeholder(values.len())));
                }
                let conditions = where_clause(&where_condition, dialect, &mut values)?;

                let sql = format!(
                    "UPDATE {} SET {} WHERE {}",
                    dialect.quote(table),
                    assignments.join(", "),
                    conditions
                );
                (sql, values)
            }
            (None, None) => anyhow::bail!("either table or sql_statement is required"),
        };

        tracing::info!("✏️ Updating via: {}", sql);
        let affected = ctx.handle.update(&sql, &values).await?;

        let mut output = Payload::new();
        output.insert("affectedRows".into(), Value::from(affected));
        output.insert("table".into(), table.map(Value::from).unwrap_or(Value::Null));
        output.insert("sql".into(), Value::from(sql.as_str()));
        output.insert("updateData".into(), Value::Object(update_data));
        output.insert("whereCondition".into(), Value::Object(where_condition));
        output.insert("templateId".into(), template_value(&invocation));
        output.insert("message".into(), Value::from("update executed"));

        Ok(OperatorResult::success_between(output, start, Utc::now())
            .with_log("update executed")
            .with_metadata("affectedRows", affected)
            .with_metadata("isCustomSql", custom_sql.is_some())
            .with_metadata("useCustomDataSource", ctx.custom_datasource)
            .into())
    }

    async fn delete(&self, invocation: Invocation) -> Result<OperatorReturn> {
        let start = Utc::now();
        let ctx = self.context(&invocation).await?;
        let dialect = ctx.handle.dialect();

        let table = ctx.string(&invocation, "table");
        let custom_sql = invocation.str("sql_statement").map(str::to_string);

        // deleteParams win over whereCondition on the same column
        let mut conditions = object_input(&invocation, "whereCondition").unwrap_or_default();
        if let Some(extra) = object_input(&invocation, "deleteParams") {
            conditions.extend(extra);
        }

        let (sql, values) = match (&custom_sql, &table) {
            (Some(sql), _) => (sql.clone(), conditions.values().cloned().collect::<Vec<_>>()),
            (None, Some(table)) => {
                validate_identifier(table)?;
                if conditions.is_empty() {
                    anyhow::bail!("delete requires whereCondition or deleteParams");
                }
                let mut values = Vec::new();
                let clause = where_clause(&conditions, dialect, &mut values)?;
                (format!("DELETE FROM {} WHERE {}", dialect.quote(table), clause), values)
            }
            (None, None) => anyhow::bail!("either table or sql_statement is required"),
        };

        if is_unbounded_delete(&sql) {
            anyhow::bail!("refusing to run a DELETE without a WHERE clause");
        }

        tracing::info!("🗑️ Deleting via: {}", sql);
        let deleted = ctx.handle.update(&sql, &values).await?;
        let mass_delete = deleted > MASS_DELETE_THRESHOLD;

        let mut output = Payload::new();
        output.insert("deletedRows".into(), Value::from(deleted));
        output.insert("table".into(), table.map(Value::from).unwrap_or(Value::Null));
        output.insert("sql".into(), Value::from(sql.as_str()));
        output.insert("conditions".into(), Value::Object(conditions.clone()));
        output.insert("templateId".into(), template_value(&invocation));
        output.insert("message".into(), Value::from("delete executed"));
        if mass_delete {
            tracing::warn!("⚠️ Deleted {} rows in one call (template {:?})", deleted, invocation.template_id);
            output.insert(
                "warning".into(),
                Value::from(format!("deleted more than {} rows; verify the conditions", MASS_DELETE_THRESHOLD)),
            );
        }

        Ok(OperatorResult::success_between(output, start, Utc::now())
            .with_log("delete executed")
            .with_metadata("deletedRows", deleted)
            .with_metadata("conditionsCount", conditions.len())
            .with_metadata("parameterCount", values.len())
            .with_metadata("isCustomSql", custom_sql.is_some())
            .with_metadata("useCustomDataSource", ctx.custom_datasource)
            .with_metadata("massDelete", mass_delete)
            .into())
    }
}

#[async_trait]
impl Operator for SqlOperator {
    async fn execute(&self, invocation: Invocation) -> Result<OperatorReturn> {
        self.query(invocation).await
    }

    fn entry_points(&self) -> &'static [&'static str] {
        ENTRY_POINTS
    }

    async fn call(&self, method: &str, invocation: Invocation) -> Result<OperatorReturn> {
        match method {
            "execute" | "query" => self.query(invocation).await,
            "insert" => self.insert(invocation).await.context("insert failed"),
            "update" => self.update(invocation).await.context("update failed"),
            "delete" => self.delete(invocation).await.context("delete failed"),
            other => Err(ChoreoError::MethodNotFound {
                implementation: SQL_OPERATOR_ID.to_string(),
                method: other.to_string(),
            }
            .into()),
        }
    }
}

/// Table and column names: ASCII letters, digits and underscores only
fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty()
        || !identifier.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        anyhow::bail!("invalid identifier '{}': only [A-Za-z0-9_] allowed", identifier);
    }
    Ok(())
}

/// `a = ? AND b = ?`, appending the bound values to `values`
fn where_clause(
    conditions: &Payload,
    dialect: Dialect,
    values: &mut Vec<Value>,
) -> Result<String> {
    let mut parts = Vec::with_capacity(conditions.len());
    for (column, value) in conditions {
        validate_identifier(column)?;
        values.push(value.clone());
        parts.push(format!("{} = {}", dialect.quote(column), dialect.placeholder(values.len())));
    }
    Ok(parts.join(" AND "))
}

fn is_unbounded_delete(sql: &str) -> bool {
    let mut tokens = sql
        .lines()
        .map(|line| line.split("--").next().unwrap_or_default())
        .flat_map(|line| line.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_')))
        .filter(|token| !token.is_empty());

    let is_delete = tokens
        .next()
        .is_some_and(|first| first.eq_ignore_ascii_case("DELETE"));
    is_delete && !tokens.any(|token| token.eq_ignore_ascii_case("WHERE"))
}

/// Parameters given as an object (values in order) or as an array
fn positional_values(params: Option<&Value>) -> Vec<Value> {
    match params.map(json_or_text) {
        Some(Value::Object(map)) => map.into_iter().map(|(_, value)| value).collect(),
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(single) => vec![single],
    }
}

fn object_input(invocation: &Invocation, key: &str) -> Option<Payload> {
    match invocation.get(key).map(json_or_text) {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn template_value(invocation: &Invocation) -> Value {
    invocation
        .template_id
        .as_deref()
        .map(Value::from)
        .unwrap_or(Value::Null)
}
