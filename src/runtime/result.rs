//! Operator result model
//!
//! Uniform outcome of a single operator invocation. Every dispatch path, including
//! failures that never reached an operator, ends up as one of these.

use crate::error::error_kind;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Ordered, schema-less key/value payload used for operator input, output and metadata
pub type Payload = Map<String, Value>;

/// Terminal and intermediate states an operator invocation can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatorStatus {
    Success,
    Failed,
    Timeout,
    Cancelled,
    Running,
    Pending,
    Skipped,
    Unknown,
}

impl OperatorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorStatus::Success => "SUCCESS",
            OperatorStatus::Failed => "FAILED",
            OperatorStatus::Timeout => "TIMEOUT",
            OperatorStatus::Cancelled => "CANCELLED",
            OperatorStatus::Running => "RUNNING",
            OperatorStatus::Pending => "PENDING",
            OperatorStatus::Skipped => "SKIPPED",
            OperatorStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperatorStatus::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            OperatorStatus::Failed | OperatorStatus::Timeout | OperatorStatus::Cancelled
        )
    }

    /// Whether the invocation has finished (successfully or not)
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OperatorStatus::Success
                | OperatorStatus::Failed
                | OperatorStatus::Timeout
                | OperatorStatus::Cancelled
                | OperatorStatus::Skipped
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, OperatorStatus::Running | OperatorStatus::Pending)
    }
}

impl fmt::Display for OperatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(OperatorStatus::Success),
            "FAILED" => Ok(OperatorStatus::Failed),
            "TIMEOUT" => Ok(OperatorStatus::Timeout),
            "CANCELLED" => Ok(OperatorStatus::Cancelled),
            "RUNNING" => Ok(OperatorStatus::Running),
            "PENDING" => Ok(OperatorStatus::Pending),
            "SKIPPED" => Ok(OperatorStatus::Skipped),
            "UNKNOWN" => Ok(OperatorStatus::Unknown),
            other => Err(format!("unknown operator status: {}", other)),
        }
    }
}

/// Outcome of one operator invocation
///
/// `status` and `success` are kept private so they can only change together.
/// Identifying metadata (node, template, executor) is attached after the call
/// returns through the `with_*` builders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorResult {
    status: OperatorStatus,
    success: bool,
    /// Output payload handed to the next node
    pub output_data: Payload,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// `end_time - start_time` in milliseconds, never negative
    pub execution_time_ms: i64,
    pub node_id: Option<String>,
    pub node_name: Option<String>,
    pub template_id: Option<String>,
    pub template_name: Option<String>,
    /// Implementation identifier the dispatcher resolved
    pub executor_impl: Option<String>,
    /// Entry point the dispatcher invoked
    pub executor_method: Option<String>,
    pub execution_log: Option<String>,
    pub metadata: Payload,
}

fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds().max(0)
}

impl OperatorResult {
    fn base(status: OperatorStatus, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            status,
            success: status.is_success(),
            output_data: Payload::new(),
            error_message: None,
            error_code: None,
            start_time: start,
            end_time: end,
            execution_time_ms: elapsed_ms(start, end),
            node_id: None,
            node_name: None,
            template_id: None,
            template_name: None,
            executor_impl: None,
            executor_method: None,
            execution_log: None,
            metadata: Payload::new(),
        }
    }

    fn instant(status: OperatorStatus) -> Self {
        let now = Utc::now();
        Self::base(status, now, now)
    }

    /// Successful result without timing information (duration 0)
    pub fn success(output: Payload) -> Self {
        let mut result = Self::instant(OperatorStatus::Success);
        result.output_data = output;
        result
    }

    /// Successful result with measured timing
    pub fn success_between(output: Payload, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let mut result = Self::base(OperatorStatus::Success, start, end);
        result.output_data = output;
        result
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let mut result = Self::instant(OperatorStatus::Failed);
        result.error_message = Some(message.into());
        result
    }

    pub fn failure_with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let mut result = Self::failure(message);
        result.error_code = Some(code.into());
        result
    }

    pub fn failure_between(
        message: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        let mut result = Self::base(OperatorStatus::Failed, start, end);
        result.error_message = Some(message.into());
        result
    }

    /// Failed result built from an error: message `<prefix>: <error>`, code = error kind
    pub fn failure_with_error(prefix: &str, error: &anyhow::Error) -> Self {
        let mut result = Self::instant(OperatorStatus::Failed);
        result.error_message = Some(format!("{}: {:#}", prefix, error));
        result.error_code = Some(error_kind(error).to_string());
        result
    }

    pub fn timeout(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let mut result = Self::base(OperatorStatus::Timeout, start, end);
        result.error_message = Some("execution timed out".to_string());
        result.error_code = Some("TIMEOUT".to_string());
        result
    }

    pub fn cancelled() -> Self {
        let mut result = Self::instant(OperatorStatus::Cancelled);
        result.error_message = Some("execution cancelled".to_string());
        result.error_code = Some("CANCELLED".to_string());
        result
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::instant(OperatorStatus::Skipped).with_log(reason)
    }

    pub fn status(&self) -> OperatorStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Re-time the result, recomputing the duration
    pub fn with_timing(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self.execution_time_ms = elapsed_ms(start, end);
        self
    }

    pub fn with_node_info(mut self, node_id: impl Into<String>, node_name: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self.node_name = Some(node_name.into());
        self
    }

    pub fn with_template_info(mut self, template_id: Option<String>, template_name: Option<String>) -> Self {
        self.template_id = template_id;
        self.template_name = template_name;
        self
    }

    pub fn with_executor_info(mut self, implementation: impl Into<String>, method: impl Into<String>) -> Self {
        self.executor_impl = Some(implementation.into());
        self.executor_method = Some(method.into());
        self
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.execution_log = Some(log.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.output_data.insert(key.into(), value.into());
        self
    }

    /// Flatten into a generic key/value mapping
    pub fn to_map(&self) -> Payload {
        let mut map = Payload::new();
        map.insert("status".into(), Value::from(self.status.as_str()));
        map.insert("success".into(), Value::from(self.success));
        map.insert("outputData".into(), Value::Object(self.output_data.clone()));
        map.insert("errorMessage".into(), opt_string(&self.error_message));
        map.insert("errorCode".into(), opt_string(&self.error_code));
        map.insert("startTime".into(), Value::from(rfc3339(&self.start_time)));
        map.insert("endTime".into(), Value::from(rfc3339(&self.end_time)));
        map.insert("executionTimeMs".into(), Value::from(self.execution_time_ms));
        map.insert("nodeId".into(), opt_string(&self.node_id));
        map.insert("nodeName".into(), opt_string(&self.node_name));
        map.insert("templateId".into(), opt_string(&self.template_id));
        map.insert("templateName".into(), opt_string(&self.template_name));
        map.insert("executorImpl".into(), opt_string(&self.executor_impl));
        map.insert("executorMethod".into(), opt_string(&self.executor_method));
        map.insert("executionLog".into(), opt_string(&self.execution_log));
        map.insert("metadata".into(), Value::Object(self.metadata.clone()));
        map
    }

    /// Rebuild a result from `to_map` output
    ///
    /// An unparseable status degrades to FAILED; a missing one becomes UNKNOWN.
    /// Missing timestamps default to now.
    pub fn from_map(map: &Payload) -> Self {
        let status = match map.get("status").and_then(Value::as_str) {
            Some(raw) => raw.parse().unwrap_or(OperatorStatus::Failed),
            None => OperatorStatus::Unknown,
        };

        let now = Utc::now();
        let start = map.get("startTime").and_then(parse_time).unwrap_or(now);
        let end = map.get("endTime").and_then(parse_time).unwrap_or(start);

        let mut result = Self::base(status, start, end);
        if let Some(ms) = map.get("executionTimeMs").and_then(Value::as_i64) {
            result.execution_time_ms = ms.max(0);
        }
        result.output_data = object_or_empty(map.get("outputData"));
        result.metadata = object_or_empty(map.get("metadata"));
        result.error_message = string_field(map, "errorMessage");
        result.error_code = string_field(map, "errorCode");
        result.node_id = string_field(map, "nodeId");
        result.node_name = string_field(map, "nodeName");
        result.template_id = string_field(map, "templateId");
        result.template_name = string_field(map, "templateName");
        result.executor_impl = string_field(map, "executorImpl");
        result.executor_method = string_field(map, "executorMethod");
        result.execution_log = string_field(map, "executionLog");
        result
    }
}

fn rfc3339(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|time| time.with_timezone(&Utc))
}

fn opt_string(value: &Option<String>) -> Value {
    value.clone().map(Value::String).unwrap_or(Value::Null)
}

fn string_field(map: &Payload, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn object_or_empty(value: Option<&Value>) -> Payload {
    value.and_then(Value::as_object).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn success_and_status_agree() {
        let ok = OperatorResult::success(payload(json!({"a": 1})));
        assert_eq!(ok.status(), OperatorStatus::Success);
        assert!(ok.is_success());
        assert_eq!(ok.execution_time_ms, 0);

        let failed = OperatorResult::failure("nope");
        assert_eq!(failed.status(), OperatorStatus::Failed);
        assert!(!failed.is_success());

        assert!(!OperatorResult::cancelled().is_success());
        assert!(!OperatorResult::skipped("disabled").is_success());
    }

    #[test]
    fn duration_is_computed_and_never_negative() {
        let start = Utc::now();
        let end = start + Duration::milliseconds(250);
        assert_eq!(
            OperatorResult::success_between(Payload::new(), start, end).execution_time_ms,
            250
        );
        // Swapped times clamp to zero
        assert_eq!(
            OperatorResult::failure_between("x", end, start).execution_time_ms,
            0
        );
        let timed_out = OperatorResult::timeout(start, end);
        assert_eq!(timed_out.status(), OperatorStatus::Timeout);
        assert_eq!(timed_out.error_code.as_deref(), Some("TIMEOUT"));
    }

    #[test]
    fn failure_from_error_uses_prefix_and_kind() {
        let err = anyhow::Error::new(crate::error::ChoreoError::MissingUrl);
        let result = OperatorResult::failure_with_error("query failed", &err);
        assert_eq!(
            result.error_message.as_deref(),
            Some("query failed: datasource url must not be empty")
        );
        assert_eq!(result.error_code.as_deref(), Some("MissingUrl"));
    }

    #[test]
    fn builders_chain() {
        let result = OperatorResult::success(Payload::new())
            .with_node_info("n1", "Load users")
            .with_template_info(Some("t1".into()), Some("SQL query".into()))
            .with_executor_info("sql", "query")
            .with_log("ok")
            .with_metadata("rowCount", 3)
            .with_output("rows", json!([]));

        assert_eq!(result.node_id.as_deref(), Some("n1"));
        assert_eq!(result.template_name.as_deref(), Some("SQL query"));
        assert_eq!(result.executor_method.as_deref(), Some("query"));
        assert_eq!(result.metadata["rowCount"], json!(3));
        assert_eq!(result.output_data["rows"], json!([]));
    }

    #[test]
    fn map_round_trip_keeps_every_field() {
        let start = Utc::now();
        let end = start + Duration::milliseconds(42);
        let original = OperatorResult::success_between(payload(json!({"x": [1, 2]})), start, end)
            .with_node_info("n1", "first")
            .with_template_info(Some("t9".into()), None)
            .with_executor_info("http", "request")
            .with_metadata("k", "v");

        let restored = OperatorResult::from_map(&original.to_map());
        assert_eq!(restored, original);
    }

    #[test]
    fn unknown_status_degrades_to_failed() {
        let mut map = OperatorResult::success(Payload::new()).to_map();
        map.insert("status".into(), json!("EXPLODED"));
        let restored = OperatorResult::from_map(&map);
        assert_eq!(restored.status(), OperatorStatus::Failed);
        assert!(!restored.is_success());

        map.remove("status");
        assert_eq!(OperatorResult::from_map(&map).status(), OperatorStatus::Unknown);
    }

    #[test]
    fn status_serializes_upper_case() {
        let value = serde_json::to_value(OperatorResult::cancelled()).unwrap();
        assert_eq!(value["status"], json!("CANCELLED"));
        assert_eq!(value["success"], json!(false));
    }
}
