//! LLM HTTP client for chat completions with tool calling.
//!
//! Speaks the OpenAI-compatible `/chat/completions` surface in streaming
//! mode, accumulating a [`DecodedResponse`] through [`stream::StreamDecoder`].
//! Backends are abstracted behind [`LlmBackend`] so the loop can be driven
//! by scripted doubles in tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::types::{ChatMessage, EventSink, ToolCall, ToolDefinition};

pub mod stream;

pub use stream::{DecodedResponse, StreamDecoder};

/// A typed non-text part of the model's content.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaPart {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub base64_data: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

/// Anything that can play the model's role for one step.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        sink: &mut dyn EventSink,
    ) -> Result<DecodedResponse>;
}

/// OpenAI-compatible HTTP client.
pub struct LlmClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: Option<f64>,
}

impl LlmClient {
    pub fn new(api_base: &str, api_key: &str, model: &str, temperature: Option<f64>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
        }
    }

    pub fn from_config(config: &skillpilot_core::config::LlmConfig) -> Self {
        Self::new(
            &config.api_base,
            &config.api_key,
            &config.model,
            config.temperature,
        )
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.api_base);
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        if let Some(temp) = self.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(tools) = tools {
            if !tools.is_empty() {
                body["tools"] = serde_json::to_value(tools)?;
            }
        }

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("LLM API request failed")?;
        Ok(resp)
    }

    async fn decode_sse(
        &self,
        resp: reqwest::Response,
        sink: &mut dyn EventSink,
    ) -> Result<DecodedResponse> {
        let mut decoder = StreamDecoder::new();
        let mut buffer = String::new();
        let mut stream = resp.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.context("stream_parse_failed: error while reading the LLM stream")?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline_pos) = buffer.find('\n') {
                let line = buffer[..newline_pos].trim().to_string();
                buffer = buffer[newline_pos + 1..].to_string();

                if line.is_empty() || line.starts_with(':') || !line.starts_with("data: ") {
                    continue;
                }
                let data = &line[6..];
                if data == "[DONE]" {
                    continue;
                }
                let Ok(value) = serde_json::from_str::<Value>(data) else {
                    continue;
                };
                decoder.feed_chunk(&value, sink);
            }
        }

        Ok(decoder.finish(sink))
    }
}

/// Whether an error body looks like a "tools not supported" rejection.
fn is_tools_unsupported(status: reqwest::StatusCode, body: &str) -> bool {
    status.is_client_error() && {
        let lower = body.to_lowercase();
        lower.contains("tool") || lower.contains("function")
    }
}

#[async_trait]
impl LlmBackend for LlmClient {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        sink: &mut dyn EventSink,
    ) -> Result<DecodedResponse> {
        let mut resp = self.send(messages, tools).await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            // Some endpoints reject the tools field outright; retry bare and
            // let the JSON fallback protocol carry the calls.
            if tools.is_some() && is_tools_unsupported(status, &body) {
                tracing::warn!(%status, "LLM endpoint rejected tool schemas, retrying without tools");
                resp = self.send(messages, None).await?;
                if !resp.status().is_success() {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    anyhow::bail!("LLM API error ({status}): {body}");
                }
            } else {
                anyhow::bail!("LLM API error ({status}): {body}");
            }
        }

        self.decode_sse(resp, sink).await
    }
}

/// Decode one tool call in the wire shape `{id, function: {name, arguments}}`
/// where arguments may be a JSON string or an object.
pub fn tool_call_from_value(value: &Value) -> Option<ToolCall> {
    let function = value.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let arguments = match function.get("arguments") {
        Some(Value::String(s)) => s.clone(),
        Some(obj @ Value::Object(_)) => obj.to_string(),
        _ => "{}".to_string(),
    };
    Some(ToolCall {
        id: value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        call_type: "function".to_string(),
        function: crate::types::FunctionCall { name, arguments },
    })
}
