//! Persists model-emitted media into the session directory.
//!
//! Inline payloads (raw base64 or `data:` URLs) of kind image, document,
//! audio, or video are decoded and written under `llm_assets/`, deduplicated
//! by content hash so re-streamed parts land on disk once.

use base64::Engine;
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use skillpilot_core::path_guard;

use crate::llm::MediaPart;

/// Session subdirectory that holds model-emitted media.
pub const ASSET_DIR: &str = "llm_assets";

const SAVED_KINDS: &[&str] = &["image", "document", "audio", "video"];

/// Per-turn media sink with content-hash dedup.
pub struct AssetSink {
    session_dir: PathBuf,
    seen: HashSet<String>,
}

impl AssetSink {
    pub fn new(session_dir: &Path) -> Self {
        Self {
            session_dir: session_dir.to_path_buf(),
            seen: HashSet::new(),
        }
    }

    /// Decode and store `parts`; returns the session-relative paths written.
    pub fn persist(&mut self, parts: &[MediaPart]) -> Vec<String> {
        if parts.is_empty() {
            return Vec::new();
        }
        let out_dir = self.session_dir.join(ASSET_DIR);
        if std::fs::create_dir_all(&out_dir).is_err() {
            return Vec::new();
        }

        let mut saved = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            if !SAVED_KINDS.contains(&part.kind.as_str()) {
                continue;
            }
            let mut mime = part.mime_type.clone().unwrap_or_default();
            let Some(raw) = decode_payload(part, &mut mime) else {
                continue;
            };

            let fingerprint = hex::encode(Sha1::digest(&raw));
            let key = format!("{}|{}|{}", part.kind, mime, fingerprint);
            if !self.seen.insert(key) {
                continue;
            }

            let filename = match part.filename.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => format!("{}-{}{}", part.kind, i + 1, ext_for_mime(&mime)),
            };
            let Ok(mut dst) = path_guard::safe_join(&out_dir, &filename) else {
                continue;
            };
            if dst.exists() {
                dst = collision_path(&out_dir, &filename, &fingerprint);
            }
            if std::fs::write(&dst, &raw).is_ok() {
                let rel = dst
                    .strip_prefix(&self.session_dir)
                    .unwrap_or(&dst)
                    .to_string_lossy()
                    .replace('\\', "/");
                tracing::debug!(path = %rel, bytes = raw.len(), "saved llm asset");
                saved.push(rel);
            }
        }
        saved
    }
}

/// Raw bytes from `base64_data`, or from a base64 `data:` URL in `url`/`data`.
/// When the data URL carries a MIME type and none was given, `mime` is
/// filled in from the URL header.
fn decode_payload(part: &MediaPart, mime: &mut String) -> Option<Vec<u8>> {
    let engine = base64::engine::general_purpose::STANDARD;
    if let Some(b64) = part.base64_data.as_deref().map(str::trim) {
        if !b64.is_empty() {
            if let Ok(raw) = engine.decode(b64) {
                return Some(raw);
            }
        }
    }
    let url = part
        .url
        .as_deref()
        .or(part.data.as_deref())
        .unwrap_or("")
        .trim();
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((header, payload)) = rest.split_once(";base64,") {
            if mime.is_empty() {
                *mime = header.to_string();
            }
            return engine.decode(payload.trim()).ok();
        }
    }
    None
}

fn ext_for_mime(mime: &str) -> &'static str {
    if mime.contains("png") {
        ".png"
    } else if mime.contains("jpeg") || mime.contains("jpg") {
        ".jpg"
    } else if mime.contains("pdf") {
        ".pdf"
    } else if mime.contains("json") {
        ".json"
    } else if mime.contains("text") || mime.contains("markdown") {
        ".txt"
    } else {
        ""
    }
}

fn collision_path(out_dir: &Path, filename: &str, fingerprint: &str) -> PathBuf {
    let (stem, ext) = match filename.rsplit_once('.') {
        Some((s, e)) => (s.to_string(), format!(".{e}")),
        None => (filename.to_string(), String::new()),
    };
    out_dir.join(format!("{}-{}{}", stem, &fingerprint[..8], ext))
}
