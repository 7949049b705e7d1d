//! Shared types for the agent crate.

use serde::{Deserialize, Serialize};

// ─── UTF-8 safe string helpers ──────────────────────────────────────────────

/// Truncate a string at a safe UTF-8 char boundary (from the start).
/// Returns a &str of at most `max_bytes` bytes, never splitting a character.
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Split a string into chunks of approximately `chunk_size` bytes, each
/// split landing on a valid UTF-8 char boundary.
pub fn chunk_str(s: &str, chunk_size: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < s.len() {
        let target_end = (start + chunk_size).min(s.len());
        let mut safe_end = target_end;
        while safe_end > start && !s.is_char_boundary(safe_end) {
            safe_end -= 1;
        }
        if safe_end == start && start < s.len() {
            safe_end = start + 1;
            while safe_end < s.len() && !s.is_char_boundary(safe_end) {
                safe_end += 1;
            }
        }
        chunks.push(&s[start..safe_end]);
        start = safe_end;
    }
    chunks
}

/// Single-line preview of a value for log records.
pub fn shorten_for_log(value: &str, max_len: usize) -> String {
    let flat = value.replace('\r', "\\r").replace('\n', "\\n");
    if flat.len() <= max_len {
        return flat;
    }
    format!("{}...", safe_truncate(&flat, max_len.saturating_sub(3)))
}

// ─── Chat messages ──────────────────────────────────────────────────────────

/// A chat message in OpenAI wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant_with_tool_calls(content: Option<&str>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.map(|s| s.to_string()),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(tool_call_id: &str, tool_name: &str, content: &str) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.to_string()),
            name: Some(tool_name.to_string()),
        }
    }
}

/// A tool call from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments; may also arrive pre-parsed from some APIs,
    /// in which case the client re-encodes before storing here.
    pub arguments: String,
}

impl ToolCall {
    /// Decode the argument payload, tolerating malformed JSON as `{}`.
    pub fn parsed_arguments(&self) -> serde_json::Value {
        match serde_json::from_str::<serde_json::Value>(&self.function.arguments) {
            Ok(v) if v.is_object() => v,
            Ok(_) | Err(_) => {
                if !self.function.arguments.trim().is_empty() && self.function.arguments.trim() != "{}" {
                    tracing::debug!(
                        tool = %self.function.name,
                        raw = %shorten_for_log(&self.function.arguments, 200),
                        "tool-call arguments were not a JSON object"
                    );
                }
                serde_json::json!({})
            }
        }
    }
}

/// OpenAI-style tool definition passed alongside the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

// ─── Outbound events ────────────────────────────────────────────────────────

/// Metadata accompanying an exported file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMeta {
    pub mime_type: String,
    pub filename: String,
}

/// Sink for user-facing output: streamed text and delivered files.
///
/// This is the host plugin boundary: one implementation prints to a
/// terminal, another forwards into a plugin framework's message channel.
/// Emission order is the delivery order.
pub trait EventSink: Send {
    fn on_text_chunk(&mut self, chunk: &str);
    fn on_blob(&mut self, bytes: Vec<u8>, meta: BlobMeta);
}

/// What a finished turn reports back to the host.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub final_text: String,
    pub exported_files: usize,
    pub steps: usize,
    pub tool_calls: usize,
}
