//! Operator contract and the built-in operators
//!
//! An operator is a named implementation that turns an input payload into an
//! `OperatorResult`. Every operator answers to `execute`; it may also expose
//! extra named entry points that share the same signature (the SQL operator
//! has `query`, `insert`, `update` and `delete`). Implementations are looked
//! up at runtime through an `OperatorRegistry`.

pub mod registry;

pub mod sql;

pub mod http;

pub mod mapping;

pub use registry::OperatorRegistry;

use crate::datasource::PoolManager;
use crate::runtime::result::{OperatorResult, Payload};
use crate::workflow::storage::WorkflowStore;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Arguments of one operator call
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    /// Current run context (or caller-provided input)
    pub input: Payload,
    /// Template the calling node is bound to, if any
    pub template_id: Option<String>,
}

impl Invocation {
    pub fn new(input: Payload, template_id: Option<String>) -> Self {
        Self { input, template_id }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.input.get(key)
    }

    /// Non-blank string input
    pub fn str(&self, key: &str) -> Option<&str> {
        self.input
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// What an operator hands back to the dispatcher
#[derive(Debug, Clone)]
pub enum OperatorReturn {
    /// A fully formed result
    Native(OperatorResult),
    /// A bare payload; only JSON objects are accepted and become SUCCESS
    Legacy(Value),
}

impl From<OperatorResult> for OperatorReturn {
    fn from(result: OperatorResult) -> Self {
        OperatorReturn::Native(result)
    }
}

impl From<Payload> for OperatorReturn {
    fn from(map: Payload) -> Self {
        OperatorReturn::Legacy(Value::Object(map))
    }
}

/// A dispatchable operator implementation
#[async_trait]
pub trait Operator: Send + Sync {
    /// Default entry point
    async fn execute(&self, invocation: Invocation) -> Result<OperatorReturn>;

    /// Additional entry point names besides `execute`
    fn entry_points(&self) -> &'static [&'static str] {
        &[]
    }

    /// Invoke a named entry point
    ///
    /// The dispatcher only calls this with `execute` or a name listed in
    /// `entry_points`. Operators without extra entry points keep the default.
    async fn call(&self, method: &str, invocation: Invocation) -> Result<OperatorReturn> {
        let _ = method;
        self.execute(invocation).await
    }
}

/// Declared parameters of the invocation's template (empty without a template)
pub(crate) async fn template_params(
    store: &dyn WorkflowStore,
    template_id: Option<&str>,
) -> Result<Payload> {
    let Some(template_id) = template_id else {
        return Ok(Payload::new());
    };

    let template = store
        .get_template(template_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("No parameters configured for template {}", template_id))?;

    Ok(template.params)
}

/// Read a value that may be given either as JSON or as JSON-encoded text
pub(crate) fn json_or_text(value: &Value) -> Value {
    match value {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    }
}

/// Registry holding `sql`, `http` and `data-mapping`
pub fn builtin_registry(
    pools: Arc<PoolManager>,
    store: Arc<dyn WorkflowStore>,
    http_timeout: Duration,
) -> Result<OperatorRegistry> {
    let registry = OperatorRegistry::new();

    registry.register(
        sql::SQL_OPERATOR_ID,
        Arc::new(sql::SqlOperator::new(pools, Arc::clone(&store))),
    );
    registry.register(
        http::HTTP_OPERATOR_ID,
        Arc::new(http::HttpOperator::new(http_timeout)?),
    );
    registry.register(
        mapping::MAPPING_OPERATOR_ID,
        Arc::new(mapping::DataMappingOperator::new(store)),
    );

    tracing::info!("🧩 Registered built-in operators: {:?}", registry.ids());
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::memory::InMemoryWorkflowStore;
    use serde_json::json;

    #[test]
    fn json_or_text_decodes_embedded_json() {
        assert_eq!(json_or_text(&json!(r#"{"a": 1}"#)), json!({"a": 1}));
        assert_eq!(json_or_text(&json!("plain")), json!("plain"));
        assert_eq!(json_or_text(&json!([1])), json!([1]));
    }

    #[tokio::test]
    async fn builtins_are_registered() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryWorkflowStore::new());
        let registry = builtin_registry(
            Arc::new(PoolManager::new()),
            store,
            Duration::from_secs(5),
        )
        .unwrap();

        assert!(registry.has_operator("sql"));
        assert!(registry.has_operator("http"));
        assert!(registry.has_operator("data-mapping"));
        assert!(!registry.has_operator("jolt"));
    }

    #[tokio::test]
    async fn template_params_require_an_existing_template() {
        let store = InMemoryWorkflowStore::new();
        assert!(template_params(&store, None).await.unwrap().is_empty());
        assert!(template_params(&store, Some("ghost")).await.is_err());
    }
}
