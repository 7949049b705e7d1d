//! Conversation state: the durable key/value store, pending-resume records,
//! rolling chat history, and session directory lifecycle.
//!
//! The store contract is intentionally tiny (get/set/delete bytes by key,
//! read-your-writes per key) so a plugin host can back it with whatever
//! storage it has. The file-backed implementation here serializes a flat map
//! as JSON and is safe under concurrent turns for different conversations.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::types::ChatMessage;

/// Session directories created under the temp root use this prefix; cleanup
/// only ever touches directories that carry it.
pub const SESSION_DIR_PREFIX: &str = "skillpilot-";

/// How many sibling session directories the temp root retains.
pub const SESSION_KEEP_RECENT: usize = 4;

/// Rolling history bound (turns kept in storage).
pub const HISTORY_MAX_TURNS: usize = 50;

/// Character budget when replaying history into a prompt.
pub const HISTORY_TRANSCRIPT_MAX_CHARS: usize = 24000;

// ─── Store contract ─────────────────────────────────────────────────────────

pub trait ConversationStore: Send + Sync {
    fn get_bytes(&self, key: &str) -> Option<Vec<u8>>;
    fn set_bytes(&self, key: &str, value: &[u8]);
    fn delete(&self, key: &str);
}

/// JSON-file-backed store. Every mutation rewrites the file; the map lives
/// behind a mutex so concurrent conversations do not interleave writes.
/// Values are base64-encoded on disk so arbitrary bytes survive the JSON
/// serialization.
pub struct FileConversationStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileConversationStore {
    pub fn open(path: &Path) -> Self {
        let entries = std::fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        }
    }

    fn persist(&self, entries: &HashMap<String, String>) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(entries) {
            Ok(content) => {
                if let Err(e) = std::fs::write(&self.path, content) {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to persist conversation store");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize conversation store"),
        }
    }
}

impl ConversationStore for FileConversationStore {
    fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        let encoded = self.entries.lock().ok().and_then(|m| m.get(key).cloned())?;
        base64::engine::general_purpose::STANDARD.decode(encoded).ok()
    }

    fn set_bytes(&self, key: &str, value: &[u8]) {
        if let Ok(mut m) = self.entries.lock() {
            m.insert(
                key.to_string(),
                base64::engine::general_purpose::STANDARD.encode(value),
            );
            self.persist(&m);
        }
    }

    fn delete(&self, key: &str) {
        if let Ok(mut m) = self.entries.lock() {
            m.remove(key);
            self.persist(&m);
        }
    }
}

/// UTF-8 view of a stored value; non-text payloads read as absent.
fn get_string(store: &dyn ConversationStore, key: &str) -> Option<String> {
    store
        .get_bytes(key)
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

// ─── Keys ───────────────────────────────────────────────────────────────────

pub fn resume_key(conversation: &str) -> String {
    format!("skill:resume:{conversation}")
}

pub fn history_key(conversation: &str) -> String {
    format!("skill:history:{conversation}")
}

pub fn session_dir_key(conversation: &str) -> String {
    format!("skill:session_dir:{conversation}")
}

// ─── Resume records ─────────────────────────────────────────────────────────

/// Durable marker that the previous turn stopped on a consent question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeState {
    pub pending: bool,
    pub session_dir: String,
    pub original_query: String,
    pub reason: String,
    pub skill: String,
    pub module: String,
    pub created_at: i64,
}

pub fn load_resume(store: &dyn ConversationStore, conversation: &str) -> Option<ResumeState> {
    let raw = get_string(store, &resume_key(conversation))?;
    serde_json::from_str(&raw).ok()
}

pub fn save_resume(store: &dyn ConversationStore, conversation: &str, state: &ResumeState) {
    if let Ok(raw) = serde_json::to_string(state) {
        store.set_bytes(&resume_key(conversation), raw.as_bytes());
    }
}

pub fn clear_resume(store: &dyn ConversationStore, conversation: &str) {
    store.delete(&resume_key(conversation));
}

// ─── History ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub user: String,
    pub assistant: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryState {
    pub turns: Vec<HistoryTurn>,
}

pub fn load_history(store: &dyn ConversationStore, conversation: &str) -> HistoryState {
    get_string(store, &history_key(conversation))
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

/// Append one turn, keeping the ring bounded.
pub fn append_history_turn(
    store: &dyn ConversationStore,
    conversation: &str,
    user: &str,
    assistant: &str,
) {
    let mut history = load_history(store, conversation);
    history.turns.push(HistoryTurn {
        user: user.to_string(),
        assistant: assistant.to_string(),
    });
    if history.turns.len() > HISTORY_MAX_TURNS {
        let drop = history.turns.len() - HISTORY_MAX_TURNS;
        history.turns.drain(..drop);
    }
    if let Ok(raw) = serde_json::to_string(&history) {
        store.set_bytes(&history_key(conversation), raw.as_bytes());
    }
}

/// Project the last `history_turns` turns into prompt messages, newest kept
/// first under the transcript char budget, replayed in chronological order.
pub fn history_messages(history: &HistoryState, history_turns: usize) -> Vec<ChatMessage> {
    if history_turns == 0 {
        return Vec::new();
    }
    let recent = history
        .turns
        .iter()
        .rev()
        .take(history_turns)
        .filter(|t| !t.user.trim().is_empty() || !t.assistant.trim().is_empty());

    let mut picked = Vec::new();
    let mut total = 0usize;
    for turn in recent {
        let block = turn.user.len() + turn.assistant.len();
        if total + block > HISTORY_TRANSCRIPT_MAX_CHARS && !picked.is_empty() {
            break;
        }
        picked.push(turn);
        total += block;
        if total >= HISTORY_TRANSCRIPT_MAX_CHARS {
            break;
        }
    }
    picked.reverse();

    let mut messages = Vec::new();
    for turn in picked {
        if !turn.user.trim().is_empty() {
            messages.push(ChatMessage::user(&turn.user));
        }
        if !turn.assistant.trim().is_empty() {
            messages.push(ChatMessage::assistant(&turn.assistant));
        }
    }
    messages
}

// ─── Session directories ────────────────────────────────────────────────────

/// Reuse the persisted session directory when it still exists, otherwise
/// allocate a fresh one under `temp_root` and persist the handle.
pub fn resolve_session_dir(
    store: &dyn ConversationStore,
    conversation: &str,
    temp_root: &Path,
) -> std::io::Result<PathBuf> {
    if let Some(persisted) = get_string(store, &session_dir_key(conversation)) {
        let persisted = persisted.trim();
        if !persisted.is_empty() {
            let path = PathBuf::from(persisted);
            if path.is_dir() {
                return Ok(path);
            }
        }
    }
    let dir = temp_root.join(format!(
        "{}{}",
        SESSION_DIR_PREFIX,
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    ));
    std::fs::create_dir_all(&dir)?;
    persist_session_dir(store, conversation, &dir);
    tracing::debug!(session_dir = %dir.display(), "allocated session directory");
    Ok(dir)
}

pub fn persist_session_dir(store: &dyn ConversationStore, conversation: &str, dir: &Path) {
    store.set_bytes(
        &session_dir_key(conversation),
        dir.to_string_lossy().as_bytes(),
    );
}

/// Best-effort retention sweep: keep the `keep` most recently modified
/// session directories under `temp_root`, never touching `protect`.
pub fn cleanup_old_sessions(temp_root: &Path, keep: usize, protect: &Path) {
    let Ok(read) = std::fs::read_dir(temp_root) else {
        return;
    };
    let mut candidates: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
    for entry in read.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if !path.is_dir() || !name.starts_with(SESSION_DIR_PREFIX) || path == protect {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        candidates.push((modified, path));
    }
    // Newest first; the protected directory already never made the list.
    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, path) in candidates.into_iter().skip(keep.saturating_sub(1)) {
        tracing::debug!(dir = %path.display(), "removing aged-out session directory");
        if let Err(e) = std::fs::remove_dir_all(&path) {
            tracing::debug!(dir = %path.display(), error = %e, "session cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FileConversationStore) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = FileConversationStore::open(&tmp.path().join("store.json"));
        (tmp, store)
    }

    #[test]
    fn store_roundtrips_through_disk() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("store.json");
        {
            let s = FileConversationStore::open(&path);
            s.set_bytes("k", b"v");
        }
        let reopened = FileConversationStore::open(&path);
        assert_eq!(reopened.get_bytes("k").as_deref(), Some(b"v".as_slice()));
        reopened.delete("k");
        assert_eq!(reopened.get_bytes("k"), None);
    }

    #[test]
    fn store_values_are_byte_safe() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("store.json");
        let raw = [0xffu8, 0x00, 0x80, b'x'];
        {
            let s = FileConversationStore::open(&path);
            s.set_bytes("bin", &raw);
        }
        let reopened = FileConversationStore::open(&path);
        assert_eq!(reopened.get_bytes("bin").as_deref(), Some(raw.as_slice()));
    }

    #[test]
    fn resume_roundtrip_and_clear() {
        let (_tmp, s) = store();
        let state = ResumeState {
            pending: true,
            session_dir: "/tmp/x".to_string(),
            original_query: "make the report".to_string(),
            reason: "no_executable_found".to_string(),
            skill: "pdf-tools".to_string(),
            module: "gen".to_string(),
            created_at: 1_700_000_000,
        };
        save_resume(&s, "conv1", &state);
        let loaded = load_resume(&s, "conv1").expect("resume present");
        assert!(loaded.pending);
        assert_eq!(loaded.original_query, "make the report");
        assert_eq!(loaded.module, "gen");
        // Keys are conversation-scoped.
        assert!(load_resume(&s, "conv2").is_none());

        clear_resume(&s, "conv1");
        assert!(load_resume(&s, "conv1").is_none());
    }

    #[test]
    fn history_ring_is_bounded() {
        let (_tmp, s) = store();
        for i in 0..(HISTORY_MAX_TURNS + 10) {
            append_history_turn(&s, "c", &format!("q{i}"), &format!("a{i}"));
        }
        let history = load_history(&s, "c");
        assert_eq!(history.turns.len(), HISTORY_MAX_TURNS);
        assert_eq!(history.turns[0].user, "q10");
    }

    #[test]
    fn history_messages_take_recent_turns_in_order() {
        let mut history = HistoryState::default();
        for i in 0..5 {
            history.turns.push(HistoryTurn {
                user: format!("q{i}"),
                assistant: format!("a{i}"),
            });
        }
        let msgs = history_messages(&history, 2);
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].content.as_deref(), Some("q3"));
        assert_eq!(msgs[3].content.as_deref(), Some("a4"));
        assert!(history_messages(&history, 0).is_empty());
    }

    #[test]
    fn session_dir_is_reused_while_it_exists() {
        let (_tmp, s) = store();
        let temp_root = tempfile::tempdir().expect("tempdir");
        let first = resolve_session_dir(&s, "c", temp_root.path()).expect("allocate");
        assert!(first.is_dir());
        let second = resolve_session_dir(&s, "c", temp_root.path()).expect("reuse");
        assert_eq!(first, second);

        std::fs::remove_dir_all(&first).expect("remove");
        let third = resolve_session_dir(&s, "c", temp_root.path()).expect("reallocate");
        assert_ne!(first, third);
    }

    #[test]
    fn cleanup_keeps_recent_and_protects_active() {
        let temp_root = tempfile::tempdir().expect("tempdir");
        let mut dirs = Vec::new();
        for i in 0..6 {
            let d = temp_root.path().join(format!("{SESSION_DIR_PREFIX}{i}"));
            std::fs::create_dir_all(&d).expect("mkdir");
            std::fs::write(d.join("f"), "x").expect("write");
            dirs.push(d);
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        std::fs::create_dir_all(temp_root.path().join("unrelated")).expect("mkdir");

        let active = dirs[5].clone();
        cleanup_old_sessions(temp_root.path(), SESSION_KEEP_RECENT, &active);

        assert!(active.is_dir());
        // Active plus the 3 newest siblings survive.
        assert!(dirs[4].is_dir());
        assert!(dirs[3].is_dir());
        assert!(dirs[2].is_dir());
        assert!(!dirs[1].is_dir());
        assert!(!dirs[0].is_dir());
        assert!(temp_root.path().join("unrelated").is_dir());
    }
}
