//! Turn preparation: resume dispatch, session directory resolution, upload
//! ingestion, and the initial message list.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};

use skillpilot_core::config::AgentTuning;
use skillpilot_core::protocol;
use skillpilot_core::skill;

use crate::assets::AssetSink;
use crate::output::{self, Redactor, UPLOADS_DIR};
use crate::prompt;
use crate::runtime::AgentRuntime;
use crate::session::{self, ConversationStore};
use crate::types::{ChatMessage, EventSink, TurnOutcome};

use super::TurnState;

/// Everything the host hands over for one conversation turn.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub conversation: String,
    pub query: String,
    /// Local files to place under the session's `uploads/` directory.
    pub uploads: Vec<PathBuf>,
    /// Host-supplied system prompt preface.
    pub system_prompt: Option<String>,
    pub skills_root: Option<PathBuf>,
    pub temp_root: PathBuf,
    pub max_steps: usize,
    pub memory_turns: usize,
    pub history_turns: usize,
}

impl TurnConfig {
    pub fn new(conversation: &str, query: &str) -> Self {
        let tuning = AgentTuning::default();
        Self {
            conversation: conversation.to_string(),
            query: query.to_string(),
            uploads: Vec::new(),
            system_prompt: None,
            skills_root: None,
            temp_root: std::env::temp_dir().join("skillpilot"),
            max_steps: tuning.max_steps,
            memory_turns: tuning.memory_turns,
            history_turns: tuning.history_turns,
        }
    }
}

const DENY_ACK: &str =
    "Understood. No scripts will be created in the temp directory this time.";

const RESUME_CONTEXT: &str = "[resume authorization]\n\
     The user has explicitly allowed you to create scripts in the temp session \
     directory, install dependencies when necessary, and continue the previous \
     unfinished generation.\n\
     Continue directly from the intermediate artifacts already present in the \
     session directory and produce the final deliverable files first.";

/// Outcome of the prepare phase.
pub(super) enum Prepared<'a> {
    /// The turn already ended (consent denial acknowledgement).
    Finished(TurnOutcome),
    Ready(TurnState<'a>),
}

pub(super) fn prepare_turn<'a>(
    config: &'a TurnConfig,
    store: &'a dyn ConversationStore,
    sink: &mut dyn EventSink,
) -> Result<Prepared<'a>> {
    let resume = session::load_resume(store, &config.conversation);
    let resume_was_pending = resume.as_ref().is_some_and(|r| r.pending);

    // ── Consent dispatch ────────────────────────────────────────────────
    if resume_was_pending && protocol::is_deny_reply(&config.query) {
        session::clear_resume(store, &config.conversation);
        tracing::info!(conversation = %config.conversation, "consent denied, resume cleared");
        output::stream_final_text(sink, DENY_ACK);
        return Ok(Prepared::Finished(TurnOutcome {
            final_text: DENY_ACK.to_string(),
            exported_files: 0,
            steps: 0,
            tool_calls: 0,
        }));
    }

    let mut query = config.query.clone();
    let mut is_resuming = false;
    let mut resume_context = "";
    let mut session_dir: Option<PathBuf> = None;

    if resume_was_pending && protocol::is_allow_reply(&config.query) {
        if let Some(r) = &resume {
            let candidate = r.session_dir.trim();
            if !candidate.is_empty() {
                let dir = PathBuf::from(candidate);
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("failed to re-enter session dir {candidate}"))?;
                session::persist_session_dir(store, &config.conversation, &dir);
                if !r.original_query.trim().is_empty() {
                    query = r.original_query.clone();
                }
                is_resuming = true;
                resume_context = RESUME_CONTEXT;
                session_dir = Some(dir);
                tracing::info!(
                    conversation = %config.conversation,
                    skill = %r.skill,
                    "consent granted, resuming prior session"
                );
            }
        }
        session::clear_resume(store, &config.conversation);
    }

    // ── Session directory ───────────────────────────────────────────────
    let session_dir = match session_dir {
        Some(dir) => dir,
        None => session::resolve_session_dir(store, &config.conversation, &config.temp_root)
            .context("failed to allocate session directory")?,
    };
    if !is_resuming {
        session::cleanup_old_sessions(&config.temp_root, session::SESSION_KEEP_RECENT, &session_dir);
    }

    // ── Uploads ─────────────────────────────────────────────────────────
    let uploads_dir = session_dir.join(UPLOADS_DIR);
    std::fs::create_dir_all(&uploads_dir).context("failed to create uploads directory")?;
    for file in &config.uploads {
        ingest_upload(file, &uploads_dir)?;
    }
    let uploads_context = prompt::build_uploads_context(&session_dir);

    // ── Prompt and message list ─────────────────────────────────────────
    let skills_index = skill::scan_skills(config.skills_root.as_deref());
    let system_content = prompt::build_system_prompt(
        config.system_prompt.as_deref(),
        &session_dir,
        &skills_index,
        &uploads_context,
        resume_context,
    );

    let mut messages = vec![ChatMessage::system(&system_content)];
    if config.history_turns > 0 {
        let history = session::load_history(store, &config.conversation);
        messages.extend(session::history_messages(&history, config.history_turns));
    }
    messages.push(ChatMessage::user(&query));

    let skills_root_path = config.skills_root.clone().unwrap_or_default();
    let redactor = Redactor::new(&[session_dir.as_path(), skills_root_path.as_path()]);
    let assets = AssetSink::new(&session_dir);
    let runtime = AgentRuntime::new(config.skills_root.clone(), session_dir);

    Ok(Prepared::Ready(TurnState {
        config,
        store,
        query,
        runtime,
        messages,
        assets,
        redactor,
        resume_was_pending,
        is_resuming,
        resume_saved: false,
        steps: 0,
        tool_calls: 0,
    }))
}

/// Copy one uploaded file into `uploads/` under a sanitized name.
fn ingest_upload(src: &Path, uploads_dir: &Path) -> Result<()> {
    let preferred = src.file_name().map(|n| n.to_string_lossy().into_owned());
    let ext = src
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let filename = sanitize_filename(preferred.as_deref(), &ext);
    let dst = uploads_dir.join(&filename);
    std::fs::copy(src, &dst)
        .with_context(|| format!("failed to ingest upload {}", src.display()))?;
    tracing::debug!(file = %filename, "upload stored");
    Ok(())
}

lazy_static! {
    static ref FILENAME_RESERVED: regex::Regex =
        regex::Regex::new(r#"[<>:"/\\|?*]+"#).expect("filename regex is valid");
}

/// Strip path components and reserved characters; fall back to a random
/// name keeping the source extension.
fn sanitize_filename(preferred: Option<&str>, fallback_ext: &str) -> String {
    if let Some(name) = preferred {
        let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
        let clean = FILENAME_RESERVED.replace_all(base, "_").trim().to_string();
        if !clean.is_empty() && clean != "." && clean != ".." {
            return clean;
        }
    }
    format!("{}{}", uuid::Uuid::new_v4().simple(), fallback_ext)
}
