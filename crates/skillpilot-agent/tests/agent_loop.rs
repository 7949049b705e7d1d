//! End-to-end turns over a scripted LLM backend: disclosure gating, the JSON
//! fallback protocol, the consent/resume loop, export dedup, and step-budget
//! endings.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use skillpilot_agent::agent_loop::{self, TurnConfig};
use skillpilot_agent::llm::{DecodedResponse, LlmBackend};
use skillpilot_agent::session::{self, ConversationStore, FileConversationStore};
use skillpilot_agent::types::{BlobMeta, ChatMessage, EventSink, FunctionCall, ToolCall, ToolDefinition};

// ─── Test doubles ───────────────────────────────────────────────────────────

struct ScriptedBackend {
    responses: Mutex<VecDeque<DecodedResponse>>,
    observed: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedBackend {
    fn new(responses: Vec<DecodedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            observed: Mutex::new(Vec::new()),
        }
    }

    fn observed(&self) -> Vec<Vec<ChatMessage>> {
        self.observed.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        _tools: Option<&[ToolDefinition]>,
        _sink: &mut dyn EventSink,
    ) -> Result<DecodedResponse> {
        self.observed.lock().unwrap().push(messages.to_vec());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| text_response("{\"type\":\"final\",\"content\":\"script exhausted\"}")))
    }
}

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

fn text_response(text: &str) -> DecodedResponse {
    DecodedResponse {
        text: text.to_string(),
        chunk_count: 1,
        ..Default::default()
    }
}

fn tool_response(name: &str, args: Value) -> DecodedResponse {
    DecodedResponse {
        tool_calls: vec![ToolCall {
            id: format!("call-{name}"),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: args.to_string(),
            },
        }],
        chunk_count: 1,
        ..Default::default()
    }
}

fn final_response(content: &str) -> DecodedResponse {
    text_response(&json!({"type": "final", "content": content}).to_string())
}

// ─── Fixture ────────────────────────────────────────────────────────────────

struct Fixture {
    _dirs: (tempfile::TempDir, tempfile::TempDir, tempfile::TempDir),
    store: FileConversationStore,
    config: TurnConfig,
}

fn fixture() -> Fixture {
    let skills = tempfile::tempdir().expect("skills tempdir");
    let temp_root = tempfile::tempdir().expect("temp tempdir");
    let store_dir = tempfile::tempdir().expect("store tempdir");

    let skill_dir = skills.path().join("pdf-tools");
    std::fs::create_dir_all(&skill_dir).expect("mkdir skill");
    std::fs::write(
        skill_dir.join("SKILL.md"),
        "---\nname: pdf-tools\ndescription: Generate PDFs from markdown\n---\n# Usage\n",
    )
    .expect("write SKILL.md");

    let store = FileConversationStore::open(&store_dir.path().join("store.json"));
    let mut config = TurnConfig::new("conv-test", "generate the report");
    config.skills_root = Some(skills.path().to_path_buf());
    config.temp_root = temp_root.path().to_path_buf();

    Fixture {
        _dirs: (skills, temp_root, store_dir),
        store,
        config,
    }
}

fn find_message<'a>(messages: &'a [ChatMessage], role: &str, needle: &str) -> Option<&'a ChatMessage> {
    messages
        .iter()
        .find(|m| m.role == role && m.content.as_deref().is_some_and(|c| c.contains(needle)))
}

// ─── Scenarios ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn listing_before_metadata_is_gated() {
    let fx = fixture();
    let backend = ScriptedBackend::new(vec![
        tool_response("list_skill_files", json!({"skill_name": "pdf-tools"})),
        final_response("understood"),
    ]);
    let mut sink = CollectSink::new();

    let outcome = agent_loop::run_turn(&fx.config, &backend, &fx.store, &mut sink)
        .await
        .expect("turn runs");

    assert_eq!(outcome.final_text, "understood");
    let observed = backend.observed();
    assert_eq!(observed.len(), 2);
    let second = &observed[1];
    let gate = find_message(second, "tool", "skill_md_required").expect("gate result present");
    assert!(gate.content.as_deref().unwrap().contains("pdf-tools"));
    find_message(second, "user", "get_skill_metadata").expect("prerequisite nudge present");
}

#[tokio::test]
async fn fallback_protocol_dispatches_tools() {
    let fx = fixture();
    let backend = ScriptedBackend::new(vec![
        text_response("{\"type\":\"tool\",\"name\":\"get_session_context\",\"arguments\":{}}"),
        final_response("done"),
    ]);
    let mut sink = CollectSink::new();

    let outcome = agent_loop::run_turn(&fx.config, &backend, &fx.store, &mut sink)
        .await
        .expect("turn runs");

    assert_eq!(outcome.final_text, "done");
    let observed = backend.observed();
    let second = &observed[1];
    let result = find_message(second, "assistant", "TOOL_RESULT").expect("fallback result present");
    assert!(result.content.as_deref().unwrap().contains("session_dir"));
    // The final text streams to the user at termination.
    assert!(sink.text.contains("done"));
}

#[tokio::test]
async fn invalid_arguments_get_a_retry_nudge() {
    let fx = fixture();
    let backend = ScriptedBackend::new(vec![
        tool_response("write_temp_file", json!({"relative_path": "a.txt"})),
        final_response("ok"),
    ]);
    let mut sink = CollectSink::new();

    agent_loop::run_turn(&fx.config, &backend, &fx.store, &mut sink)
        .await
        .expect("turn runs");

    let observed = backend.observed();
    let second = &observed[1];
    find_message(second, "tool", "invalid_tool_arguments").expect("validation error present");
    let nudge = find_message(second, "user", "write_temp_file").expect("retry nudge present");
    assert!(nudge.content.as_deref().unwrap().contains("content"));
}

#[tokio::test]
async fn missing_executable_asks_consent_and_resumes_on_allow() {
    let fx = fixture();
    let backend = ScriptedBackend::new(vec![
        tool_response("get_skill_metadata", json!({"skill_name": "pdf-tools"})),
        tool_response("list_skill_files", json!({"skill_name": "pdf-tools"})),
        tool_response(
            "run_skill_command",
            json!({"skill_name": "pdf-tools", "command": ["python", "-m", "missing_mod"]}),
        ),
    ]);
    let mut sink = CollectSink::new();

    let outcome = agent_loop::run_turn(&fx.config, &backend, &fx.store, &mut sink)
        .await
        .expect("turn runs");

    assert!(outcome.final_text.contains("May I create"));
    assert!(outcome.final_text.contains("missing_mod"));

    let resume = session::load_resume(&fx.store, "conv-test").expect("resume recorded");
    assert!(resume.pending);
    assert_eq!(resume.skill, "pdf-tools");
    assert_eq!(resume.module, "missing_mod");
    assert_eq!(resume.original_query, "generate the report");
    let saved_dir = PathBuf::from(&resume.session_dir);
    assert!(saved_dir.is_dir());

    // Next turn: an affirmative reply re-enters the same session with the
    // original query substituted for the consent reply.
    let mut allow_config = fx.config.clone();
    allow_config.query = "允许".to_string();
    let resume_backend = ScriptedBackend::new(vec![final_response("resumed and finished")]);
    let mut sink2 = CollectSink::new();

    let outcome2 = agent_loop::run_turn(&allow_config, &resume_backend, &fx.store, &mut sink2)
        .await
        .expect("resume turn runs");

    assert_eq!(outcome2.final_text, "resumed and finished");
    assert!(session::load_resume(&fx.store, "conv-test").is_none());

    let observed = resume_backend.observed();
    let first = &observed[0];
    let last_user = first
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .expect("user message present");
    assert_eq!(last_user.content.as_deref(), Some("generate the report"));
    let system = &first[0];
    assert!(system.content.as_deref().unwrap().contains("[resume authorization]"));
    assert!(system
        .content
        .as_deref()
        .unwrap()
        .contains(&*saved_dir.to_string_lossy()));
}

#[tokio::test]
async fn deny_reply_clears_resume_without_invoking_the_model() {
    let fx = fixture();
    session::save_resume(
        &fx.store,
        "conv-test",
        &session::ResumeState {
            pending: true,
            session_dir: fx.config.temp_root.join("skillpilot-x").to_string_lossy().into_owned(),
            original_query: "generate the report".to_string(),
            reason: "no_executable_found".to_string(),
            skill: "pdf-tools".to_string(),
            module: "missing_mod".to_string(),
            created_at: 0,
        },
    );

    let mut deny_config = fx.config.clone();
    deny_config.query = "不允许".to_string();
    let backend = ScriptedBackend::new(vec![]);
    let mut sink = CollectSink::new();

    let outcome = agent_loop::run_turn(&deny_config, &backend, &fx.store, &mut sink)
        .await
        .expect("deny turn runs");

    assert!(outcome.final_text.contains("No scripts"));
    assert!(backend.observed().is_empty());
    assert!(session::load_resume(&fx.store, "conv-test").is_none());
}

#[tokio::test]
async fn duplicate_exports_emit_one_blob() {
    let fx = fixture();
    let backend = ScriptedBackend::new(vec![
        tool_response(
            "write_temp_file",
            json!({"relative_path": "r.xlsx", "content": "sheet-bytes"}),
        ),
        tool_response(
            "export_temp_file",
            json!({"temp_relative_path": "r.xlsx", "workspace_relative_path": "result.xlsx"}),
        ),
        tool_response(
            "export_temp_file",
            json!({"temp_relative_path": "r.xlsx", "workspace_relative_path": "result.xlsx"}),
        ),
        final_response("report is ready"),
    ]);
    let mut sink = CollectSink::new();

    let outcome = agent_loop::run_turn(&fx.config, &backend, &fx.store, &mut sink)
        .await
        .expect("turn runs");

    assert_eq!(outcome.exported_files, 1);
    assert_eq!(sink.blobs.len(), 1);
    let (bytes, meta) = &sink.blobs[0];
    assert_eq!(bytes.as_slice(), b"sheet-bytes");
    assert_eq!(meta.filename, "result.xlsx");
    assert_eq!(
        meta.mime_type,
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
    );
}

#[tokio::test]
async fn step_budget_with_artifacts_ends_as_files_generated() {
    let mut fx = fixture();
    fx.config.max_steps = 3;
    let backend = ScriptedBackend::new(vec![
        tool_response("write_temp_file", json!({"relative_path": "a.txt", "content": "x"})),
        tool_response("write_temp_file", json!({"relative_path": "b.txt", "content": "y"})),
        tool_response("write_temp_file", json!({"relative_path": "c.txt", "content": "z"})),
    ]);
    let mut sink = CollectSink::new();

    let outcome = agent_loop::run_turn(&fx.config, &backend, &fx.store, &mut sink)
        .await
        .expect("turn runs");

    assert_eq!(outcome.final_text, "Files generated.");
    assert_eq!(outcome.steps, 3);
    assert!(sink.text.contains("Files generated."));
    assert!(sink.blobs.is_empty());
}

#[tokio::test]
async fn repeated_empty_responses_terminate_with_a_failure_note() {
    let fx = fixture();
    let backend = ScriptedBackend::new(vec![
        text_response(""),
        text_response(""),
        text_response(""),
    ]);
    let mut sink = CollectSink::new();

    let outcome = agent_loop::run_turn(&fx.config, &backend, &fx.store, &mut sink)
        .await
        .expect("turn runs");

    assert!(outcome.final_text.contains("empty responses"));
    // Two nudges were injected before giving up.
    let observed = backend.observed();
    assert_eq!(observed.len(), 3);
    find_message(&observed[2], "user", "produced no output").expect("nudge present");
}

#[tokio::test]
async fn history_records_the_turn() {
    let fx = fixture();
    let backend = ScriptedBackend::new(vec![final_response("all wrapped up")]);
    let mut sink = CollectSink::new();

    agent_loop::run_turn(&fx.config, &backend, &fx.store, &mut sink)
        .await
        .expect("turn runs");

    let history = session::load_history(&fx.store, "conv-test");
    assert_eq!(history.turns.len(), 1);
    assert_eq!(history.turns[0].user, "generate the report");
    assert_eq!(history.turns[0].assistant, "all wrapped up");
}

#[tokio::test]
async fn session_dir_persists_across_turns() {
    let fx = fixture();
    let backend = ScriptedBackend::new(vec![final_response("first")]);
    let mut sink = CollectSink::new();
    agent_loop::run_turn(&fx.config, &backend, &fx.store, &mut sink)
        .await
        .expect("turn runs");
    let first_dir = fx
        .store
        .get_bytes(&session::session_dir_key("conv-test"))
        .expect("session dir persisted");

    let backend2 = ScriptedBackend::new(vec![final_response("second")]);
    let mut sink2 = CollectSink::new();
    agent_loop::run_turn(&fx.config, &backend2, &fx.store, &mut sink2)
        .await
        .expect("turn runs");
    let second_dir = fx
        .store
        .get_bytes(&session::session_dir_key("conv-test"))
        .expect("session dir persisted");

    assert_eq!(first_dir, second_dir);
}
