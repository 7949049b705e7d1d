//! Stream decoding: one accumulator for both delta chunks and aggregate
//! response bodies.
//!
//! Text accumulates monotonically; tool-call deltas merge by index; typed
//! media parts are collected verbatim. Live forwarding to the sink happens
//! only between chunk reads (single-threaded cooperative streaming) and is
//! gated so the in-band JSON protocol never leaks to the user: a step's text
//! streams only while no tool call has been seen and the buffer does not
//! look like a protocol object.

use serde_json::Value;

use skillpilot_core::protocol::{self, AgentAction};

use crate::types::{chunk_str, EventSink, FunctionCall, ToolCall};

use super::MediaPart;

/// Banner prefixed once per step before forwarded model text.
pub const AGENT_BANNER: &str = "\n【🤖 Agent】\n";

/// Size of the live typing chunks forwarded to the sink.
const TYPING_CHUNK: usize = 6;

/// Everything one LLM invocation produced.
#[derive(Debug, Default)]
pub struct DecodedResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub media: Vec<MediaPart>,
    pub chunk_count: usize,
    pub streamed_any: bool,
}

impl DecodedResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.tool_calls.is_empty() && self.media.is_empty()
    }
}

/// Accumulates a streamed (or aggregate) chat completion.
pub struct StreamDecoder {
    text: String,
    tool_calls: Vec<ToolCall>,
    media: Vec<MediaPart>,
    chunk_count: usize,
    streamed_any: bool,
    saw_tool_calls: bool,
    banner_emitted: bool,
    emitted_len: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            text: String::new(),
            tool_calls: Vec::new(),
            media: Vec::new(),
            chunk_count: 0,
            streamed_any: false,
            saw_tool_calls: false,
            banner_emitted: false,
            emitted_len: 0,
        }
    }

    /// Feed one streamed chunk body (already JSON-decoded).
    pub fn feed_chunk(&mut self, chunk: &Value, sink: &mut dyn EventSink) {
        self.chunk_count += 1;
        let Some(choices) = chunk.get("choices").and_then(Value::as_array) else {
            return;
        };
        for choice in choices {
            let Some(delta) = choice.get("delta") else {
                continue;
            };
            if let Some(content) = delta.get("content") {
                self.absorb_content(content);
            }
            if let Some(tc_deltas) = delta.get("tool_calls").and_then(Value::as_array) {
                self.merge_tool_call_deltas(tc_deltas);
            }
            self.forward_live_text(sink);
        }
    }

    /// Feed a full (non-streaming) response body.
    pub fn feed_aggregate(&mut self, body: &Value) {
        let Some(choices) = body.get("choices").and_then(Value::as_array) else {
            return;
        };
        for choice in choices {
            let Some(message) = choice.get("message") else {
                continue;
            };
            if let Some(content) = message.get("content") {
                self.absorb_content(content);
            }
            if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
                for call in calls {
                    if let Some(tc) = super::tool_call_from_value(call) {
                        self.saw_tool_calls = true;
                        self.tool_calls.push(tc);
                    }
                }
            }
        }
    }

    /// Close the stream and hand back the accumulated response.
    pub fn finish(mut self, sink: &mut dyn EventSink) -> DecodedResponse {
        if self.banner_emitted {
            sink.on_text_chunk("\n\n");
        } else {
            // Nothing streamed live (aggregate body, or gating held the text
            // back until it turned out not to be protocol JSON).
            let text = std::mem::take(&mut self.text);
            let trimmed = text.trim();
            if !trimmed.is_empty() && !self.saw_tool_calls && should_emit_user_text(trimmed) {
                sink.on_text_chunk(AGENT_BANNER);
                for piece in chunk_str(trimmed, TYPING_CHUNK) {
                    sink.on_text_chunk(piece);
                }
                sink.on_text_chunk("\n\n");
                self.streamed_any = true;
            }
            self.text = text;
        }
        DecodedResponse {
            text: self.text.trim().to_string(),
            tool_calls: self.tool_calls,
            media: self.media,
            chunk_count: self.chunk_count,
            streamed_any: self.streamed_any,
        }
    }

    // ── Internals ───────────────────────────────────────────────────────────

    /// Content is either a plain string or a list of typed items.
    fn absorb_content(&mut self, content: &Value) {
        match content {
            Value::String(s) => self.text.push_str(s),
            Value::Array(items) => {
                for item in items {
                    let kind = item.get("type").and_then(Value::as_str).unwrap_or("");
                    if kind == "text" {
                        let piece = item
                            .get("text")
                            .or_else(|| item.get("data"))
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        self.text.push_str(piece);
                    } else if !kind.is_empty() {
                        if let Ok(part) = serde_json::from_value::<MediaPart>(item.clone()) {
                            self.media.push(part);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn merge_tool_call_deltas(&mut self, deltas: &[Value]) {
        for delta in deltas {
            self.saw_tool_calls = true;
            let idx = delta.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
            while self.tool_calls.len() <= idx {
                self.tool_calls.push(ToolCall {
                    id: String::new(),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: String::new(),
                        arguments: String::new(),
                    },
                });
            }
            if let Some(id) = delta.get("id").and_then(Value::as_str) {
                self.tool_calls[idx].id = id.to_string();
            }
            if let Some(function) = delta.get("function") {
                if let Some(name) = function.get("name").and_then(Value::as_str) {
                    self.tool_calls[idx].function.name.push_str(name);
                }
                if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                    self.tool_calls[idx].function.arguments.push_str(args);
                }
            }
        }
    }

    fn forward_live_text(&mut self, sink: &mut dyn EventSink) {
        if self.saw_tool_calls {
            return;
        }
        let trimmed = self.text.trim();
        if trimmed.is_empty() || !should_emit_user_text(trimmed) {
            return;
        }
        if !self.banner_emitted {
            sink.on_text_chunk(AGENT_BANNER);
            self.banner_emitted = true;
        }
        if self.emitted_len < trimmed.len() {
            let fresh = &trimmed[self.emitted_len..];
            for piece in chunk_str(fresh, TYPING_CHUNK) {
                sink.on_text_chunk(piece);
            }
            self.streamed_any = true;
            self.emitted_len = trimmed.len();
        }
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Gate for forwarding model text to the user.
///
/// Holds text back while it could still turn into a protocol object: a
/// buffer opening with `{` but not yet balanced, an unclosed code fence, or
/// a complete `tool`/`final` action.
fn should_emit_user_text(text: &str) -> bool {
    let stripped = text.trim_start();
    if stripped.starts_with('{') && protocol::extract_first_json_object(text).is_none() {
        return false;
    }
    if stripped.starts_with("```") && stripped.matches("```").count() < 2 {
        return false;
    }
    match protocol::action_from_text(text) {
        Some(AgentAction::Tool { .. }) | Some(AgentAction::Final { .. }) => false,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlobMeta;
    use serde_json::json;

    struct CollectSink {
        text: String,
        blobs: Vec<(Vec<u8>, BlobMeta)>,
    }

    impl CollectSink {
        fn new() -> Self {
            Self {
                text: String::new(),
                blobs: Vec::new(),
            }
        }
    }

    impl EventSink for CollectSink {
        fn on_text_chunk(&mut self, chunk: &str) {
            self.text.push_str(chunk);
        }
        fn on_blob(&mut self, bytes: Vec<u8>, meta: BlobMeta) {
            self.blobs.push((bytes, meta));
        }
    }

    fn text_delta(s: &str) -> Value {
        json!({"choices": [{"delta": {"content": s}}]})
    }

    #[test]
    fn plain_text_streams_with_banner_once() {
        let mut sink = CollectSink::new();
        let mut decoder = StreamDecoder::new();
        decoder.feed_chunk(&text_delta("Hello "), &mut sink);
        decoder.feed_chunk(&text_delta("world"), &mut sink);
        let resp = decoder.finish(&mut sink);

        assert_eq!(resp.text, "Hello world");
        assert!(resp.streamed_any);
        assert_eq!(sink.text.matches(AGENT_BANNER).count(), 1);
        assert!(sink.text.contains("Hello world"));
    }

    #[test]
    fn tool_call_deltas_merge_by_index() {
        let mut sink = CollectSink::new();
        let mut decoder = StreamDecoder::new();
        decoder.feed_chunk(
            &json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "write_", "arguments": "{\"relative"}}
            ]}}]}),
            &mut sink,
        );
        decoder.feed_chunk(
            &json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"name": "temp_file", "arguments": "_path\":\"a.txt\"}"}}
            ]}}]}),
            &mut sink,
        );
        let resp = decoder.finish(&mut sink);

        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "call_1");
        assert_eq!(resp.tool_calls[0].function.name, "write_temp_file");
        assert_eq!(
            resp.tool_calls[0].function.arguments,
            "{\"relative_path\":\"a.txt\"}"
        );
        // Tool-call steps stream no text.
        assert!(sink.text.is_empty());
    }

    #[test]
    fn protocol_json_is_withheld_from_the_user() {
        let mut sink = CollectSink::new();
        let mut decoder = StreamDecoder::new();
        decoder.feed_chunk(&text_delta("{\"type\":\"tool\",\"name\":"), &mut sink);
        decoder.feed_chunk(&text_delta("\"get_session_context\",\"arguments\":{}}"), &mut sink);
        let resp = decoder.finish(&mut sink);

        assert!(sink.text.is_empty());
        assert!(!resp.streamed_any);
        assert!(resp.text.starts_with('{'));
    }

    #[test]
    fn text_after_tool_calls_is_not_streamed() {
        let mut sink = CollectSink::new();
        let mut decoder = StreamDecoder::new();
        decoder.feed_chunk(
            &json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "c", "function": {"name": "list_temp_files", "arguments": "{}"}}
            ]}}]}),
            &mut sink,
        );
        decoder.feed_chunk(&text_delta("narration"), &mut sink);
        let resp = decoder.finish(&mut sink);
        assert!(sink.text.is_empty());
        assert_eq!(resp.text, "narration");
    }

    #[test]
    fn media_parts_are_collected() {
        let mut sink = CollectSink::new();
        let mut decoder = StreamDecoder::new();
        decoder.feed_chunk(
            &json!({"choices": [{"delta": {"content": [
                {"type": "text", "data": "caption"},
                {"type": "image", "mime_type": "image/png", "base64_data": "aGk="}
            ]}}]}),
            &mut sink,
        );
        let resp = decoder.finish(&mut sink);
        assert_eq!(resp.text, "caption");
        assert_eq!(resp.media.len(), 1);
        assert_eq!(resp.media[0].kind, "image");
        assert_eq!(resp.media[0].base64_data.as_deref(), Some("aGk="));
    }

    #[test]
    fn aggregate_body_decodes_without_streaming() {
        let mut sink = CollectSink::new();
        let mut decoder = StreamDecoder::new();
        decoder.feed_aggregate(&json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": "final words",
                "tool_calls": [{"id": "c9", "function": {"name": "list_temp_files", "arguments": {}}}]
            }}]
        }));
        let resp = decoder.finish(&mut sink);
        assert_eq!(resp.text, "final words");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].function.arguments, "{}");
        assert!(sink.text.is_empty());
    }

    #[test]
    fn gating_helper_classifies_buffers() {
        assert!(should_emit_user_text("just words"));
        assert!(!should_emit_user_text("{\"type\":\"final\",\"content\":\"x\"}"));
        assert!(!should_emit_user_text("{\"unfinished\": "));
        assert!(!should_emit_user_text("```json\n{\"type\":\"tool\""));
        // A complete JSON object of a foreign shape is fine to show.
        assert!(should_emit_user_text("{\"note\": \"not protocol\"} trailing"));
    }
}
