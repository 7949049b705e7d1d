//! Gated tool dispatch for both calling protocols.
//!
//! Native tool calls and fallback-protocol actions run the same pipeline
//! (argument validation, disclosure-ledger gates, progress notice, execution,
//! consent branch) and differ only in how results re-enter the transcript:
//! native results become `tool` messages, fallback results become assistant
//! messages prefixed `TOOL_RESULT`.

use serde_json::{json, Value};

use crate::session::{self, ResumeState};
use crate::tools;
use crate::types::{safe_truncate, shorten_for_log, ChatMessage, EventSink, ToolCall};

use super::TurnState;

/// What a tool batch tells the step loop.
pub(super) struct DispatchOutcome {
    /// Consent question that ends the turn immediately.
    pub forced_final: Option<String>,
}

/// Tools that require `get_skill_metadata` first.
const METADATA_GATED: &[&str] = &["list_skill_files", "read_skill_file", "run_skill_command"];

// ─── Native batch ───────────────────────────────────────────────────────────

pub(super) async fn run_native_batch(
    tool_calls: &[ToolCall],
    state: &mut TurnState<'_>,
    sink: &mut dyn EventSink,
) -> DispatchOutcome {
    let mut forced_final = None;

    for tc in tool_calls {
        let name = tc.function.name.clone();
        let args = tc.parsed_arguments();
        tracing::debug!(
            tool = %name,
            id = %tc.id,
            args = %shorten_for_log(&tc.function.arguments, 400),
            "native tool call"
        );
        state.tool_calls += 1;

        if let Some((payload, nudge)) = precheck(&name, &args, state) {
            push_native_result(state, &tc.id, &name, &payload);
            state.messages.push(ChatMessage::user(&nudge));
            continue;
        }

        let (payload, forced) = execute_and_observe(&name, &args, state, sink).await;
        push_native_result(state, &tc.id, &name, &payload);
        if forced_final.is_none() {
            forced_final = forced;
        }
    }

    DispatchOutcome { forced_final }
}

fn push_native_result(state: &mut TurnState<'_>, call_id: &str, name: &str, payload: &Value) {
    let content = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    tracing::debug!(tool = %name, result = %shorten_for_log(&content, 700), "tool result");
    state
        .messages
        .push(ChatMessage::tool_result(call_id, name, &content));
}

// ─── Fallback call ──────────────────────────────────────────────────────────

pub(super) async fn run_fallback_call(
    name: &str,
    arguments: &Value,
    state: &mut TurnState<'_>,
    sink: &mut dyn EventSink,
) -> DispatchOutcome {
    let args = if arguments.is_object() {
        arguments.clone()
    } else {
        json!({})
    };
    tracing::debug!(tool = %name, "fallback tool call");
    state.tool_calls += 1;

    if let Some((payload, nudge)) = precheck(name, &args, state) {
        state.messages.push(ChatMessage::user(&nudge));
        push_fallback_result(state, name, &payload);
        return DispatchOutcome { forced_final: None };
    }

    // The action itself joins the transcript so the model sees what it did.
    let action = json!({"type": "tool", "name": name, "arguments": args});
    state
        .messages
        .push(ChatMessage::assistant(&action.to_string()));

    let (payload, forced_final) = execute_and_observe(name, &args, state, sink).await;
    push_fallback_result(state, name, &payload);
    DispatchOutcome { forced_final }
}

fn push_fallback_result(state: &mut TurnState<'_>, name: &str, payload: &Value) {
    let wrapped = json!({"name": name, "result": payload});
    tracing::debug!(tool = %name, result = %shorten_for_log(&wrapped.to_string(), 700), "fallback tool result");
    state
        .messages
        .push(ChatMessage::assistant(&format!("TOOL_RESULT\n{wrapped}")));
}

// ─── Shared pipeline ────────────────────────────────────────────────────────

/// Validation and ledger gates. A rejection yields the error payload plus
/// the user-role nudge naming the prerequisite.
fn precheck(name: &str, args: &Value, state: &TurnState<'_>) -> Option<(Value, String)> {
    if let Err(detail) = tools::validate_arguments(name, args) {
        return Some((
            json!({
                "error": "invalid_tool_arguments",
                "tool": name,
                "detail": detail,
                "got": args,
            }),
            tools::retry_prompt(name, &detail),
        ));
    }

    if METADATA_GATED.contains(&name) {
        let skill_name = args
            .get("skill_name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();
        if !skill_name.is_empty() && !state.runtime.has_skill_metadata(skill_name) {
            return Some((
                json!({
                    "error": "skill_md_required",
                    "skill_name": skill_name,
                    "detail": "Call get_skill_metadata(skill_name) to read SKILL.md before using this tool.",
                }),
                format!(
                    "You tried to call `{name}` before reading skill '{skill_name}'s SKILL.md. \
                     Call get_skill_metadata(\"{skill_name}\") first, then retry this call."
                ),
            ));
        }
        if name == "run_skill_command"
            && !skill_name.is_empty()
            && !state.runtime.has_listed_skill_files(skill_name)
        {
            return Some((
                json!({
                    "error": "skill_files_listing_required",
                    "skill_name": skill_name,
                    "detail": "Call list_skill_files(skill_name) to inspect the package layout before running commands.",
                }),
                format!(
                    "You tried to call `{name}` before inspecting skill '{skill_name}'s file layout. \
                     Call list_skill_files(\"{skill_name}\") first, then retry this call."
                ),
            ));
        }
    }

    None
}

/// Notice, execute, and observe side effects (stderr surfacing, consent).
async fn execute_and_observe(
    name: &str,
    args: &Value,
    state: &mut TurnState<'_>,
    sink: &mut dyn EventSink,
) -> (Value, Option<String>) {
    if let Some(notice) = progress_notice(name, args) {
        sink.on_text_chunk(&notice);
    }

    let payload = execute_tool(name, args, state).await;
    let mut forced_final = None;

    // Failing commands surface their stderr to the user, paths redacted.
    if matches!(name, "run_skill_command" | "run_temp_command") {
        let failed = payload
            .get("returncode")
            .and_then(Value::as_i64)
            .is_some_and(|c| c != 0);
        if failed {
            if let Some(stderr) = payload
                .get("stderr")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
            {
                let brief = safe_truncate(&state.redactor.redact(stderr), 1200).to_string();
                sink.on_text_chunk(&format!("❌ Command failed (stderr):\n{brief}\n"));
            }
        }
    }

    // Consent branch: a missing executable ends the turn with a question and
    // records the pending resume for the next turn's allow/deny.
    if name == "run_skill_command"
        && payload.get("error").and_then(Value::as_str) == Some("no_executable_found")
    {
        let skill = payload
            .get("skill")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| args.get("skill_name").and_then(Value::as_str))
            .unwrap_or("")
            .to_string();
        let module = payload
            .get("module")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let resume = ResumeState {
            pending: true,
            session_dir: state.runtime.session_dir().to_string_lossy().into_owned(),
            original_query: state.query.clone(),
            reason: "no_executable_found".to_string(),
            skill: skill.clone(),
            module: module.clone(),
            created_at: chrono::Utc::now().timestamp(),
        };
        session::save_resume(state.store, &state.config.conversation, &resume);
        state.resume_saved = true;
        tracing::info!(skill = %skill, module = %module, "missing executable, pending resume saved");

        forced_final = Some(consent_question(&skill, &module));
    }

    (payload, forced_final)
}

async fn execute_tool(name: &str, args: &Value, state: &mut TurnState<'_>) -> Value {
    let s = |key: &str| {
        args.get(key)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    };
    let n = |key: &str| args.get(key).and_then(Value::as_u64).map(|v| v as usize);
    let b = |key: &str| args.get(key).and_then(Value::as_bool).unwrap_or(false);
    let opt_s = |key: &str| {
        args.get(key)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let command = || -> Vec<String> {
        args.get("command")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    match name {
        "get_session_context" => state.runtime.get_session_context(),
        "get_skill_metadata" => state.runtime.get_skill_metadata(&s("skill_name")),
        "list_skill_files" => state.runtime.list_skill_files(&s("skill_name"), n("max_depth")),
        "read_skill_file" => {
            state
                .runtime
                .read_skill_file(&s("skill_name"), &s("relative_path"), n("max_chars"))
        }
        "run_skill_command" => {
            state
                .runtime
                .run_skill_command(
                    &s("skill_name"),
                    command(),
                    opt_s("cwd_relative").as_deref(),
                    b("auto_install"),
                )
                .await
        }
        "write_temp_file" => state.runtime.write_temp_file(&s("relative_path"), &s("content")),
        "read_temp_file" => state.runtime.read_temp_file(&s("relative_path"), n("max_chars")),
        "list_temp_files" => state.runtime.list_temp_files(n("max_depth")),
        "run_temp_command" => {
            state
                .runtime
                .run_temp_command(command(), opt_s("cwd_relative").as_deref(), b("auto_install"))
                .await
        }
        "export_temp_file" => state.runtime.export_temp_file(
            &s("temp_relative_path"),
            &s("workspace_relative_path"),
            b("overwrite"),
        ),
        other => json!({"error": format!("unknown tool: {other}")}),
    }
}

/// One-line progress notice streamed before dispatch.
fn progress_notice(name: &str, args: &Value) -> Option<String> {
    let s = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or("");
    let text = match name {
        "get_skill_metadata" => format!("✅ Reading skill '{}' documentation…\n", s("skill_name")),
        "list_skill_files" => format!("✅ Inspecting skill '{}' file layout…\n", s("skill_name")),
        "read_skill_file" => format!(
            "✅ Reading skill '{}' file: {}…\n",
            s("skill_name"),
            s("relative_path")
        ),
        "run_skill_command" => format!("✅ Running a command in skill '{}'…\n", s("skill_name")),
        "write_temp_file" => format!("✅ Writing temp file: {}…\n", s("relative_path")),
        "read_temp_file" => format!("✅ Reading temp file: {}…\n", s("relative_path")),
        "list_temp_files" => "✅ Listing temp directory files…\n".to_string(),
        "run_temp_command" => "✅ Running a temp-directory command…\n".to_string(),
        "export_temp_file" => format!(
            "✅ Marking deliverable: {}…\n",
            s("temp_relative_path")
        ),
        _ => return None,
    };
    Some(text)
}

fn consent_question(skill: &str, module: &str) -> String {
    format!(
        "The documentation for skill '{skill}' calls for generating files, but the skill \
         package has no executable entry point (a script or Python module).\n\
         The attempted entry was `python -m {module}`, which does not exist in the skill \
         directory, so the target file cannot be generated this way.\n\n\
         I have delivered the intermediate artifacts that were possible so far.\n\
         May I create the necessary scripts in the temp session directory myself, installing \
         dependencies if needed, and then try to generate the final files?"
    )
}
