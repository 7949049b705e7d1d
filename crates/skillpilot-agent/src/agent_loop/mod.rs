//! The step-bounded agent loop: LLM ↔ tool dispatch cycle for one turn.
//!
//! Sub-modules:
//!   - `prepare`:  resume dispatch, session directory, uploads, prompt build
//!   - `dispatch`: gated tool execution for native calls and the JSON fallback
//!   - `finish`:   ending-text selection, blob emission, history append

mod dispatch;
mod finish;
mod prepare;

use anyhow::Result;
use std::path::PathBuf;

use skillpilot_core::path_guard;
use skillpilot_core::protocol::{self, AgentAction};

use crate::assets::AssetSink;
use crate::llm::LlmBackend;
use crate::output::Redactor;
use crate::runtime::AgentRuntime;
use crate::session::ConversationStore;
use crate::tools;
use crate::types::{ChatMessage, EventSink, TurnOutcome};

pub use prepare::TurnConfig;

/// Synthesized ending when the step budget ran out but artifacts exist.
pub const FILES_GENERATED: &str = "Files generated.";
/// Ending when the session holds files but none were marked for delivery.
pub const INTERMEDIATE_ONLY: &str =
    "Intermediate files were generated, but none were marked for delivery with export_temp_file.";
/// Ending when the turn produced neither text nor files.
pub const NO_OUTPUT: &str = "No text or file output was produced.";

const EMPTY_RESPONSE_LIMIT: usize = 3;
const EMPTY_RESPONSE_NUDGE: &str = "You produced no output. Continue the task: call a tool if \
     function calling is supported; otherwise answer with JSON: \
     {\"type\":\"final\",\"content\":\"...\"}";

/// Mutable state threaded through one turn.
pub(crate) struct TurnState<'a> {
    pub config: &'a TurnConfig,
    pub store: &'a dyn ConversationStore,
    /// Query driving this turn; differs from `config.query` after a resume.
    pub query: String,
    pub runtime: AgentRuntime,
    pub messages: Vec<ChatMessage>,
    pub assets: AssetSink,
    pub redactor: Redactor,
    pub resume_was_pending: bool,
    pub is_resuming: bool,
    pub resume_saved: bool,
    pub steps: usize,
    pub tool_calls: usize,
}

impl TurnState<'_> {
    fn session_dir(&self) -> PathBuf {
        self.runtime.session_dir().to_path_buf()
    }
}

/// Run one conversation turn to completion.
///
/// Tool errors are recovered locally and fed back into the conversation; an
/// LLM transport failure ends the turn with a single redacted diagnostic.
pub async fn run_turn(
    config: &TurnConfig,
    backend: &dyn LlmBackend,
    store: &dyn ConversationStore,
    sink: &mut dyn EventSink,
) -> Result<TurnOutcome> {
    let mut state = match prepare::prepare_turn(config, store, sink)? {
        prepare::Prepared::Finished(outcome) => return Ok(outcome),
        prepare::Prepared::Ready(state) => state,
    };

    let tools_ref = Some(tools::tool_definitions());
    let mut final_text: Option<String> = None;
    let mut already_streamed = false;
    let mut empty_responses = 0usize;

    for step in 0..config.max_steps.max(1) {
        state.steps = step + 1;
        compact_messages(&mut state.messages, config.memory_turns);
        tracing::debug!(
            step = step + 1,
            max_steps = config.max_steps,
            messages = state.messages.len(),
            "agent step"
        );

        let response = match backend.invoke(&state.messages, tools_ref, sink).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "LLM invocation failed");
                let diagnostic = state.redactor.redact(&format!("LLM invocation failed: {e}"));
                sink.on_text_chunk(&format!("\n{diagnostic}\n"));
                break;
            }
        };

        let saved_assets = state.assets.persist(&response.media);
        if !saved_assets.is_empty() {
            tracing::debug!(count = saved_assets.len(), "persisted model-emitted assets");
        }

        // ── Native tool calls ────────────────────────────────────────────
        if response.has_tool_calls() {
            empty_responses = 0;
            state.messages.push(ChatMessage::assistant_with_tool_calls(
                (!response.text.is_empty()).then_some(response.text.as_str()),
                response.tool_calls.clone(),
            ));
            let batch = dispatch::run_native_batch(&response.tool_calls, &mut state, sink).await;
            if batch.forced_final.is_some() {
                final_text = batch.forced_final;
                break;
            }
            continue;
        }

        // ── Fallback protocol / final text ───────────────────────────────
        let action = protocol::action_from_text(&response.text);

        if response.is_empty() && action.is_none() {
            empty_responses += 1;
            tracing::debug!(count = empty_responses, "empty model response");
            if empty_responses < EMPTY_RESPONSE_LIMIT {
                state.messages.push(ChatMessage::user(EMPTY_RESPONSE_NUDGE));
                continue;
            }
            final_text =
                Some("The model returned empty responses repeatedly; no result was produced.".to_string());
            break;
        }
        empty_responses = 0;

        match action {
            Some(AgentAction::Tool { name, arguments }) => {
                let call =
                    dispatch::run_fallback_call(&name, &arguments, &mut state, sink).await;
                if call.forced_final.is_some() {
                    final_text = call.forced_final;
                    break;
                }
            }
            Some(AgentAction::Final { content }) => {
                final_text = Some(content);
                break;
            }
            None => {
                already_streamed = response.streamed_any && !response.text.is_empty();
                final_text = Some(response.text);
                break;
            }
        }
    }

    // Step budget exhausted without a model-chosen ending.
    if final_text.is_none() && state.steps >= config.max_steps {
        final_text = Some(if session_has_artifacts(&state) {
            FILES_GENERATED.to_string()
        } else {
            format!(
                "Exceeded the maximum number of steps (max_steps={}) without reaching a final result.",
                config.max_steps
            )
        });
    }

    Ok(finish::finish_turn(state, final_text, already_streamed, sink))
}

/// Whether this turn left anything behind worth announcing.
fn session_has_artifacts(state: &TurnState<'_>) -> bool {
    if !state.runtime.exports().is_empty() {
        return true;
    }
    path_guard::list_dir_bounded(state.runtime.session_dir(), 2)
        .iter()
        .any(|e| e.kind == "file")
}

/// Keep the system message plus the last `1 + 4·memory_turns` entries.
fn compact_messages(messages: &mut Vec<ChatMessage>, memory_turns: usize) {
    if memory_turns == 0 {
        return;
    }
    let keep = 1 + memory_turns * 4;
    if messages.len() > keep {
        let tail_start = messages.len() - (keep - 1);
        let mut compacted = Vec::with_capacity(keep);
        compacted.push(messages[0].clone());
        compacted.extend_from_slice(&messages[tail_start..]);
        *messages = compacted;
    }
}
