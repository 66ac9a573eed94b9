//! JSONPath data-mapping operator
//!
//! `mapping_rules` is an object of output key -> JSONPath expression,
//! evaluated against the invocation's `inputData`. A path matching one value
//! yields that value, several matches yield an array and no match yields
//! null. Non-string rule values are copied to the output unchanged.
//!
//! Returns a bare payload; the dispatcher turns it into a SUCCESS result.

use crate::operators::{json_or_text, template_params, Invocation, Operator, OperatorReturn};
use crate::runtime::result::Payload;
use crate::workflow::storage::WorkflowStore;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub const MAPPING_OPERATOR_ID: &str = "data-mapping";

const ENTRY_POINTS: &[&str] = &["map"];

pub struct DataMappingOperator {
    store: Arc<dyn WorkflowStore>,
}

impl DataMappingOperator {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    async fn rules(&self, invocation: &Invocation) -> Result<Payload> {
        let raw = match invocation.get("mapping_rules") {
            Some(rules) => rules.clone(),
            None => template_params(self.store.as_ref(), invocation.template_id.as_deref())
                .await?
                .get("mapping_rules")
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("mapping_rules not configured"))?,
        };

        match json_or_text(&raw) {
            Value::Object(rules) => Ok(rules),
            _ => anyhow::bail!("mapping_rules must be an object of output key -> JSONPath"),
        }
    }
}

/// Apply every rule to `source`
pub fn apply_rules(source: &Value, rules: &Payload) -> Result<Payload> {
    let mut output = Payload::new();
    for (key, rule) in rules {
        let value = match rule {
            Value::String(path) => {
                let matches = jsonpath_lib::select(source, path)
                    .map_err(|e| anyhow::anyhow!("Invalid JSONPath '{}' for '{}': {:?}", path, key, e))?;
                match matches.as_slice() {
                    [] => Value::Null,
                    [single] => (*single).clone(),
                    many => Value::Array(many.iter().map(|v| (*v).clone()).collect()),
                }
            }
            literal => literal.clone(),
        };
        output.insert(key.clone(), value);
    }
    Ok(output)
}

#[async_trait]
impl Operator for DataMappingOperator {
    async fn execute(&self, invocation: Invocation) -> Result<OperatorReturn> {
        let rules = self.rules(&invocation).await?;
        let source = invocation
            .get("inputData")
            .ok_or_else(|| anyhow::anyhow!("inputData not found in input"))?;

        tracing::debug!("🗺️ Applying {} mapping rules", rules.len());
        Ok(apply_rules(source, &rules)?.into())
    }

    fn entry_points(&self) -> &'static [&'static str] {
        ENTRY_POINTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::memory::InMemoryWorkflowStore;
    use crate::workflow::types::OperatorTemplate;
    use serde_json::json;

    fn rules(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn single_many_and_missing_matches() {
        let source = json!({
            "order": {"id": 42, "lines": [{"sku": "a"}, {"sku": "b"}]}
        });
        let output = apply_rules(
            &source,
            &rules(json!({
                "orderId": "$.order.id",
                "skus": "$.order.lines[*].sku",
                "missing": "$.order.customer",
                "source": 7
            })),
        )
        .unwrap();

        assert_eq!(output["orderId"], json!(42));
        assert_eq!(output["skus"], json!(["a", "b"]));
        assert_eq!(output["missing"], Value::Null);
        assert_eq!(output["source"], json!(7));
    }

    #[tokio::test]
    async fn rules_from_template_as_text() {
        let store = InMemoryWorkflowStore::new();
        let mut params = Payload::new();
        params.insert("mapping_rules".into(), json!(r#"{"name": "$.user.name"}"#));
        store.put_template(OperatorTemplate {
            id: "t-map".into(),
            name: "Map".into(),
            implementation: MAPPING_OPERATOR_ID.into(),
            method: "map".into(),
            enabled: true,
            params,
        });
        let op = DataMappingOperator::new(Arc::new(store));

        let input = rules(json!({"inputData": {"user": {"name": "ada"}}}));
        match op.execute(Invocation::new(input, Some("t-map".into()))).await.unwrap() {
            OperatorReturn::Legacy(value) => assert_eq!(value, json!({"name": "ada"})),
            OperatorReturn::Native(_) => panic!("expected a plain map"),
        }
    }

    #[tokio::test]
    async fn missing_input_data_fails() {
        let op = DataMappingOperator::new(Arc::new(InMemoryWorkflowStore::new()));
        let input = rules(json!({"mapping_rules": {"x": "$.x"}}));
        assert!(op.execute(Invocation::new(input, None)).await.is_err());
    }
}
