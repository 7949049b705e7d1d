//! System prompt assembly.
//!
//! The prompt embeds the skill index so the model can choose a skill from
//! metadata alone, plus the session paths, the uploads listing, and (after
//! consent) the resume authorization. The rules text encodes the
//! progressive-disclosure contract the runtime also enforces.

use std::path::Path;

use skillpilot_core::path_guard;
use skillpilot_core::skill::SkillIndex;

use crate::output::UPLOADS_DIR;

/// Invariant agent rules appended after the host-supplied preface.
const AGENT_RULES: &str = r#"You are a general-purpose agent that uses a folder of skills as its toolbox.

You must follow progressive disclosure:
1) Judge which skills might be relevant from the skill index (name/description) only.
2) Call get_skill_metadata to read a skill's SKILL.md before doing anything else with it.
3) Every further operation on a skill (list_skill_files / read_skill_file / run_skill_command) requires a prior get_skill_metadata; the runtime rejects violations and asks you to read the docs first.
4) Before executing scripts or commands, call list_skill_files so you run them from the right directory.
5) Call read_skill_file only when you need deeper information.
6) Call run_skill_command only when execution is clearly required.
7) Confirm the skill package actually contains an executable entry point (script or module) before running it; never guess module names. If no entry point exists, deliver what you can and ask the user whether you may create scripts under the temp directory instead.
8) Mark every final deliverable with export_temp_file.

Path rules: uploads/ and everything you create with write_temp_file live under session_dir; run_skill_command executes with its cwd under skills_root/<skill_name>. When a command argument must reference an upload or temp file, pass the absolute path returned by read_temp_file (result.path); never guess ../uploads style relative paths.
Dependency installs (npm install, npm ci, bun install) must run inside the skill package directory that has the package.json, via run_skill_command with cwd_relative, never inside session_dir.
If the user's request already pins the concrete type or parameters, treat them as confirmed and proceed; do not ask again.
When you do need to ask the user something, output only the question and options and end the turn: no file reads, commands, or outputs in the same turn.
Defaults apply only when the user explicitly says "default" or "you decide"; silence is not a choice.
Before each write_temp_file call, state your write intent in one natural-language line: the relative_path, a short content summary, and the rough length. relative_path must name a file (not empty, not '.' or '..', and not ending with '/').

Write all intermediate artifacts (scripts, drafts, generated files) into the temp session directory:
- text: write_temp_file
- command-produced files: run_temp_command
For any request with a concrete deliverable, keep going within this turn until the file exists or you can state a clear failure reason.
Only files marked with export_temp_file are returned to the user; uploads/ and unmarked files are not.

Available actions:
- get_session_context()
- get_skill_metadata(skill_name)
- list_skill_files(skill_name, max_depth)
- read_skill_file(skill_name, relative_path, max_chars)
- run_skill_command(skill_name, command, cwd_relative, auto_install)
- write_temp_file(relative_path, content)
- read_temp_file(relative_path, max_chars)
- list_temp_files(max_depth)
- run_temp_command(command, cwd_relative, auto_install)
- export_temp_file(temp_relative_path, workspace_relative_path, overwrite)  # does not copy; marks the delivery name

If the model supports function calling, invoke tools directly; otherwise answer with the JSON protocol:
{"type":"tool","name":"get_skill_metadata","arguments":{"skill_name":"..."}}
or {"type":"final","content":"..."}"#;

/// Build the complete system prompt for one turn.
pub fn build_system_prompt(
    custom_prompt: Option<&str>,
    session_dir: &Path,
    skills_index: &SkillIndex,
    uploads_context: &str,
    resume_context: &str,
) -> String {
    let mut parts = Vec::new();

    if let Some(preface) = custom_prompt.map(str::trim).filter(|p| !p.is_empty()) {
        parts.push(preface.to_string());
    }
    parts.push(AGENT_RULES.to_string());

    parts.push(format!(
        "[session paths]\n- session_dir: {}\n- skills_root: {}",
        session_dir.display(),
        skills_index.root.as_deref().unwrap_or("(none)"),
    ));

    if !uploads_context.is_empty() {
        parts.push(uploads_context.to_string());
    }

    let index_json =
        serde_json::to_string(skills_index).unwrap_or_else(|_| "{\"skills\":[]}".to_string());
    parts.push(format!(
        "Skill index (for judging whether a skill is needed):\n{index_json}"
    ));

    if !resume_context.is_empty() {
        parts.push(resume_context.to_string());
    }

    parts.join("\n\n")
}

/// Listing of the session's `uploads/` directory for prompt embedding.
/// Empty when nothing was uploaded.
pub fn build_uploads_context(session_dir: &Path) -> String {
    let uploads_dir = session_dir.join(UPLOADS_DIR);
    let entries = path_guard::list_dir_bounded(&uploads_dir, 2);
    let files: Vec<String> = entries
        .iter()
        .filter(|e| e.kind == "file")
        .map(|e| {
            let bytes = std::fs::metadata(&e.path).map(|m| m.len()).unwrap_or(0);
            let mime = skillpilot_core::mime::guess_mime_type(&e.relative_path);
            format!(
                "- {}/{} | mime={} | bytes={}",
                UPLOADS_DIR, e.relative_path, mime, bytes
            )
        })
        .collect();
    if files.is_empty() {
        return String::new();
    }
    format!(
        "[uploaded files]\nAll paths are relative to this turn's session_dir:\n{}",
        files.join("\n")
    )
}
