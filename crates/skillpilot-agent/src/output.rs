//! Turn-termination output: final-text streaming, export blob emission,
//! and path redaction for user-visible error surfaces.

use regex::Regex;
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::path::Path;

use skillpilot_core::path_guard;

use crate::runtime::ExportEntry;
use crate::types::{chunk_str, BlobMeta, EventSink};

/// Chunk size for the final text stream.
pub const FINAL_TEXT_CHUNK: usize = 8;

/// Session subdirectories that never export.
pub const UPLOADS_DIR: &str = "uploads";
pub const SKILL_CACHE_DIR: &str = "_skill_cache";

/// Stream `text` to the sink in fixed-size character chunks.
pub fn stream_final_text(sink: &mut dyn EventSink, text: &str) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    for piece in chunk_str(trimmed, FINAL_TEXT_CHUNK) {
        sink.on_text_chunk(piece);
    }
    sink.on_text_chunk("\n");
}

// ─── Redaction ──────────────────────────────────────────────────────────────

/// Scrubs absolute filesystem paths out of user-visible text.
pub struct Redactor {
    known_paths: Vec<String>,
    windows_path: Regex,
    posix_path: Regex,
}

const REDACTED: &str = "<REDACTED_PATH>";

impl Redactor {
    pub fn new(paths: &[&Path]) -> Self {
        let mut known_paths = Vec::new();
        for p in paths {
            let s = p.to_string_lossy().into_owned();
            if s.is_empty() {
                continue;
            }
            let forward = s.replace('\\', "/");
            if forward != s {
                known_paths.push(forward);
            }
            known_paths.push(s);
        }
        Self {
            known_paths,
            windows_path: Regex::new(r#"[A-Za-z]:\\[^\s\r\n\t"']+"#)
                .expect("windows path regex is valid"),
            posix_path: Regex::new(r#"/[^\s\r\n\t"']+"#).expect("posix path regex is valid"),
        }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for p in &self.known_paths {
            out = out.replace(p.as_str(), REDACTED);
        }
        out = self.windows_path.replace_all(&out, REDACTED).into_owned();
        out = self.posix_path.replace_all(&out, REDACTED).into_owned();
        out
    }
}

// ─── Export emission ────────────────────────────────────────────────────────

/// Emit one blob per export entry whose source still exists in the session.
///
/// Entries are deduplicated twice: by source path (re-exports were already
/// collapsed upstream) and by `filename|mime|sha1(content)` so two marks of
/// identical content under one name yield a single delivery. `uploads/` and
/// the skill cache are never eligible.
pub fn emit_export_blobs(
    sink: &mut dyn EventSink,
    session_dir: &Path,
    exports: &[ExportEntry],
) -> usize {
    let mut emitted_paths: HashSet<&str> = HashSet::new();
    let mut emitted_fingerprints: HashSet<String> = HashSet::new();
    let mut count = 0usize;

    for entry in exports {
        let rel = entry.temp_relative_path.as_str();
        if !emitted_paths.insert(rel) {
            continue;
        }
        let top = rel.split('/').next().unwrap_or("");
        if top == UPLOADS_DIR || top == SKILL_CACHE_DIR {
            tracing::debug!(path = rel, "refusing to export internal session file");
            continue;
        }
        let Ok(path) = path_guard::safe_join(session_dir, rel) else {
            continue;
        };
        if !path.is_file() {
            continue;
        }
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        let fingerprint = format!(
            "{}|{}|{}",
            entry.filename,
            entry.mime_type,
            hex::encode(Sha1::digest(&bytes))
        );
        if !emitted_fingerprints.insert(fingerprint) {
            continue;
        }
        sink.on_blob(
            bytes,
            BlobMeta {
                mime_type: entry.mime_type.clone(),
                filename: entry.filename.clone(),
            },
        );
        count += 1;
    }
    count
}
