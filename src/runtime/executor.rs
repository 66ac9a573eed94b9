//! Operator dispatch
//!
//! Resolves an (implementation, method) pair through the operator registry,
//! invokes it and folds every outcome into an `OperatorResult`:
//! - native results are kept as returned,
//! - legacy JSON objects become SUCCESS timed by the call,
//! - errors, unknown names and panics become FAILED results with a kind tag.
//!
//! Whatever happens, the result is stamped with the implementation, method
//! and template the caller asked for.

use crate::error::{error_kind, ChoreoError};
use crate::operators::{Invocation, OperatorRegistry, OperatorReturn};
use crate::runtime::result::{OperatorResult, Payload};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// Name every operator answers to
pub const DEFAULT_METHOD: &str = "execute";

#[derive(Debug, Clone)]
pub struct OperatorDispatcher {
    registry: Arc<OperatorRegistry>,
}

impl OperatorDispatcher {
    pub fn new(registry: Arc<OperatorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<OperatorRegistry> {
        &self.registry
    }

    /// Whether `implementation` resolves to a registered operator
    pub fn has_operator(&self, implementation: &str) -> bool {
        self.registry.has_operator(implementation)
    }

    /// Invoke `implementation.method` with `input`; never returns an error
    pub async fn execute(
        &self,
        implementation: &str,
        method: &str,
        input: Payload,
        template_id: Option<&str>,
    ) -> OperatorResult {
        tracing::info!(
            "🚀 Dispatching {}.{} (template: {:?})",
            implementation,
            method,
            template_id
        );
        tracing::debug!(
            "📥 Input: {}",
            serde_json::to_string(&input).unwrap_or_else(|_| "invalid_json".to_string())
        );

        let start = Utc::now();
        let result = self
            .dispatch(implementation, method, input, template_id, start)
            .await
            .with_executor_info(implementation, method)
            .with_template_info(template_id.map(str::to_string), None);

        if result.is_success() {
            tracing::info!(
                "✅ {}.{} completed in {}ms",
                implementation,
                method,
                result.execution_time_ms
            );
        } else {
            tracing::error!(
                "❌ {}.{} ended {}: {}",
                implementation,
                method,
                result.status(),
                result.error_message.as_deref().unwrap_or("no message")
            );
        }

        result
    }

    async fn dispatch(
        &self,
        implementation: &str,
        method: &str,
        input: Payload,
        template_id: Option<&str>,
        start: DateTime<Utc>,
    ) -> OperatorResult {
        let Some(operator) = self.registry.get(implementation) else {
            return failed(
                ChoreoError::ImplementationNotFound(implementation.to_string()).into(),
                start,
            );
        };

        if method != DEFAULT_METHOD && !operator.entry_points().contains(&method) {
            return failed(
                ChoreoError::MethodNotFound {
                    implementation: implementation.to_string(),
                    method: method.to_string(),
                }
                .into(),
                start,
            );
        }

        let invocation = Invocation::new(input, template_id.map(str::to_string));
        let method_name = method.to_string();

        // Run on its own task so a panicking operator cannot take the run down
        let call = tokio::spawn(async move { operator.call(&method_name, invocation).await });

        let outcome = match call.await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                let error = if join_error.is_panic() {
                    ChoreoError::OperatorPanicked {
                        implementation: implementation.to_string(),
                        method: method.to_string(),
                    }
                } else {
                    ChoreoError::NodeExecution {
                        node_id: implementation.to_string(),
                        message: format!("operator task did not complete: {}", join_error),
                    }
                };
                return failed(error.into(), start);
            }
        };
        let end = Utc::now();

        match outcome {
            Ok(OperatorReturn::Native(result)) => result,
            Ok(OperatorReturn::Legacy(Value::Object(map))) => {
                OperatorResult::success_between(map, start, end)
            }
            Ok(OperatorReturn::Legacy(other)) => failed(
                ChoreoError::InvalidReturnShape {
                    implementation: implementation.to_string(),
                    method: method.to_string(),
                    shape: shape_name(&other).to_string(),
                }
                .into(),
                start,
            ),
            Err(error) => {
                tracing::debug!("Operator error kind {}: {:#}", error_kind(&error), error);
                failed(error, start)
            }
        }
    }
}

fn failed(error: anyhow::Error, start: DateTime<Utc>) -> OperatorResult {
    OperatorResult::failure_with_error("Operator execution failed", &error).with_timing(start, Utc::now())
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
