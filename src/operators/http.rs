//! Outbound HTTP request operator

use crate::operators::{Invocation, Operator, OperatorReturn};
use crate::runtime::result::{OperatorResult, Payload};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;

pub const HTTP_OPERATOR_ID: &str = "http";

const ENTRY_POINTS: &[&str] = &["request"];

/// Sends `request_method request_url` with optional headers and body
///
/// Responses are parsed as JSON when possible and kept as text otherwise.
/// A non-2xx status yields a FAILED result that still carries the response.
pub struct HttpOperator {
    client: reqwest::Client,
}

impl HttpOperator {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self { client })
    }

    async fn request(&self, invocation: Invocation) -> Result<OperatorReturn> {
        let start = Utc::now();

        let url = invocation
            .str("request_url")
            .ok_or_else(|| anyhow::anyhow!("request_url must not be empty"))?
            .to_string();
        let method = invocation
            .str("request_method")
            .unwrap_or("GET")
            .to_uppercase();

        let mut request = match method.as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            "PATCH" => self.client.patch(&url),
            "HEAD" => self.client.head(&url),
            _ => anyhow::bail!("Unsupported HTTP method: {}", method),
        };

        if let Some(headers) = invocation.get("request_headers").and_then(Value::as_object) {
            for (name, value) in headers {
                match value {
                    Value::String(text) => request = request.header(name.as_str(), text.as_str()),
                    Value::Null => {}
                    other => request = request.header(name.as_str(), other.to_string()),
                }
            }
        }

        match invocation.get("request_body") {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(body) => request = request.json(body),
        }

        tracing::info!("🌍 HTTP {} {}", method, url);
        let response = request
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request failed: {}", e))?;

        let status = response.status();
        let mut headers = Payload::new();
        for (name, value) in response.headers() {
            if let Ok(text) = value.to_str() {
                headers.insert(name.to_string(), Value::from(text));
            }
        }

        let text = response
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read response body: {}", e))?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        let response_size = match &body {
            Value::String(text) => text.len(),
            other => other.to_string().len(),
        };
        let end = Utc::now();

        tracing::debug!("📡 Response status: {}", status);

        let result = if status.is_success() {
            let mut output = Payload::new();
            output.insert("response".into(), body);
            output.insert("statusCode".into(), Value::from(status.as_u16()));
            output.insert("headers".into(), Value::Object(headers));
            output.insert("message".into(), Value::from("HTTP request succeeded"));
            OperatorResult::success_between(output, start, end).with_log("HTTP request succeeded")
        } else {
            tracing::warn!("⚠️ HTTP {} {} returned {}", method, url, status);
            OperatorResult::failure_between(format!("HTTP request returned {}", status), start, end)
                .with_output("response", body)
                .with_output("statusCode", status.as_u16())
                .with_output("headers", Value::Object(headers))
        };

        Ok(result
            .with_metadata("url", url)
            .with_metadata("method", method)
            .with_metadata("statusCode", status.as_u16())
            .with_metadata("responseSize", response_size)
            .into())
    }
}

#[async_trait]
impl Operator for HttpOperator {
    async fn execute(&self, invocation: Invocation) -> Result<OperatorReturn> {
        self.request(invocation).await
    }

    fn entry_points(&self) -> &'static [&'static str] {
        ENTRY_POINTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server answering with `status` and `body`
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        format!("http://{}/echo", addr)
    }

    fn invocation(input: Value) -> Invocation {
        Invocation::new(input.as_object().cloned().unwrap(), None)
    }

    #[tokio::test]
    async fn missing_url_is_an_error() {
        let op = HttpOperator::new(Duration::from_secs(2)).unwrap();
        assert!(op.execute(invocation(json!({}))).await.is_err());
    }

    #[tokio::test]
    async fn json_response_is_parsed() {
        let url = serve_once("200 OK", r#"{"ok":true}"#).await;
        let op = HttpOperator::new(Duration::from_secs(5)).unwrap();

        let ret = op
            .execute(invocation(json!({"request_url": url, "request_method": "post", "request_body": {"a": 1}})))
            .await
            .unwrap();
        let OperatorReturn::Native(result) = ret else {
            panic!("expected native result");
        };

        assert!(result.is_success());
        assert_eq!(result.output_data["statusCode"], json!(200));
        assert_eq!(result.output_data["response"], json!({"ok": true}));
        assert_eq!(result.metadata["method"], json!("POST"));
    }

    #[tokio::test]
    async fn error_status_fails_but_keeps_response() {
        let url = serve_once("503 Service Unavailable", r#"{"retry":true}"#).await;
        let op = HttpOperator::new(Duration::from_secs(5)).unwrap();

        let OperatorReturn::Native(result) = op
            .execute(invocation(json!({"request_url": url})))
            .await
            .unwrap()
        else {
            panic!("expected native result");
        };

        assert!(!result.is_success());
        assert_eq!(result.output_data["statusCode"], json!(503));
        assert!(result.error_message.unwrap().contains("503"));
    }
}
