//! Path containment and subprocess argument rewriting.
//!
//! Everything the agent touches on disk flows through [`safe_join`], which
//! resolves a relative path lexically and refuses any result that escapes
//! the given root. Resolution never consults the filesystem, so containment
//! also holds for paths that do not exist yet.
//!
//! Argument rewriting is policy, not security: the model is allowed to emit
//! cwd-relative paths and the executor normalizes them into the session
//! directory before spawning a child process.

use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathGuardError {
    #[error("path is outside root: {path}")]
    OutsideRoot { path: String },
    #[error("invalid relative path: {path}")]
    InvalidRelativePath { path: String },
}

/// Join `relative` onto `root` and verify the result stays inside `root`.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf, PathGuardError> {
    let root_abs = lexical_absolute(root);
    let joined = lexical_absolute(&root_abs.join(relative));
    if !joined.starts_with(&root_abs) {
        return Err(PathGuardError::OutsideRoot {
            path: relative.to_string(),
        });
    }
    Ok(joined)
}

/// Fold `.` and `..` components without touching the filesystem.
fn lexical_absolute(path: &Path) -> PathBuf {
    let mut out = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
    };
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Clean a model-supplied relative file path.
///
/// Rejects empty input, `.`, `..`, traversal components, and anything that
/// names a directory (trailing separator). Backslashes are treated as
/// separators so Windows-style input normalizes to forward slashes.
pub fn normalize_relative_file_path(input: &str) -> Option<String> {
    let s = input.trim().replace('\\', "/");
    if s.is_empty() || s.ends_with('/') {
        return None;
    }
    let parts: Vec<&str> = s
        .trim_start_matches('/')
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.is_empty() || parts.iter().any(|p| *p == "..") {
        return None;
    }
    Some(parts.join("/"))
}

// ─── Subprocess argument rewriting ──────────────────────────────────────────

/// Flags whose following (or `=`-joined) value names an output file.
const OUT_FLAGS: &[&str] = &["--out", "-o", "--output"];

/// Rewrite cwd-relative tokens in an argv into absolute paths under
/// `session_dir`.
///
/// Three rules, applied per token after the executable:
///   - a token with an `uploads/` prefix always resolves into the session
///   - a relative token naming a file that already exists in the session
///   - the value of an `--out`/`-o`/`--output` flag (separate or `=` form)
///
/// Tokens that are already absolute, carry a URL scheme, or fail the rules
/// pass through unchanged.
pub fn rewrite_args(argv: &[String], session_dir: &Path) -> Vec<String> {
    let mut out = Vec::with_capacity(argv.len());
    let mut rewrite_next = false;
    for (i, token) in argv.iter().enumerate() {
        if i == 0 {
            out.push(token.clone());
            continue;
        }
        if rewrite_next {
            rewrite_next = false;
            out.push(rewrite_out_value(token, session_dir));
            continue;
        }
        if OUT_FLAGS.contains(&token.as_str()) {
            rewrite_next = true;
            out.push(token.clone());
            continue;
        }
        if let Some((flag, value)) = token.split_once('=') {
            if OUT_FLAGS.contains(&flag) {
                out.push(format!("{}={}", flag, rewrite_out_value(value, session_dir)));
                continue;
            }
        }
        out.push(rewrite_plain_token(token, session_dir));
    }
    out
}

/// Output-flag values resolve into the session unconditionally (the file
/// usually does not exist yet).
fn rewrite_out_value(value: &str, session_dir: &Path) -> String {
    if value.is_empty() || Path::new(value).is_absolute() || value.contains("://") {
        return value.to_string();
    }
    match normalize_relative_file_path(value) {
        Some(rp) => match safe_join(session_dir, &rp) {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(_) => value.to_string(),
        },
        None => value.to_string(),
    }
}

fn rewrite_plain_token(token: &str, session_dir: &Path) -> String {
    if Path::new(token).is_absolute() || token.contains("://") {
        return token.to_string();
    }
    let normalized = token.replace('\\', "/");
    if normalized.starts_with("uploads/") {
        return rewrite_out_value(&normalized, session_dir);
    }
    // Existing session files are rewritten regardless of where the child's
    // cwd ends up (skill directory vs. session directory).
    if let Some(rp) = normalize_relative_file_path(&normalized) {
        if let Ok(p) = safe_join(session_dir, &rp) {
            if p.is_file() {
                return p.to_string_lossy().into_owned();
            }
        }
    }
    token.to_string()
}

// ─── Bounded directory listing ──────────────────────────────────────────────

/// One entry of a bounded directory walk.
#[derive(Debug, Clone, Serialize)]
pub struct DirEntryInfo {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub path: String,
    pub relative_path: String,
}

/// Depth-bounded recursive listing: directories and files per level in
/// lexicographic order, parents before children. `max_depth = 0` lists only
/// the root's own entries.
pub fn list_dir_bounded(root: &Path, max_depth: usize) -> Vec<DirEntryInfo> {
    let mut entries = Vec::new();
    walk(root, root, 0, max_depth, &mut entries);
    entries
}

fn walk(root: &Path, dir: &Path, depth: usize, max_depth: usize, out: &mut Vec<DirEntryInfo>) {
    if depth > max_depth {
        return;
    }
    let Ok(read) = std::fs::read_dir(dir) else {
        return;
    };
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in read.flatten() {
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        } else {
            files.push(path);
        }
    }
    dirs.sort();
    files.sort();
    for p in &dirs {
        push_entry(root, p, "dir", out);
    }
    for p in &files {
        push_entry(root, p, "file", out);
    }
    for p in &dirs {
        walk(root, p, depth + 1, max_depth, out);
    }
}

fn push_entry(root: &Path, path: &Path, kind: &'static str, out: &mut Vec<DirEntryInfo>) {
    let relative = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");
    out.push(DirEntryInfo {
        kind,
        path: path.to_string_lossy().into_owned(),
        relative_path: relative,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_join_keeps_paths_inside_root() {
        let root = Path::new("/srv/skills");
        let p = safe_join(root, "pdf/SKILL.md").expect("contained path should join");
        assert_eq!(p, PathBuf::from("/srv/skills/pdf/SKILL.md"));
    }

    #[test]
    fn safe_join_rejects_traversal() {
        let root = Path::new("/srv/skills");
        assert!(safe_join(root, "../etc/passwd").is_err());
        assert!(safe_join(root, "a/../../b").is_err());
        // A sibling with a shared name prefix is still outside.
        assert!(safe_join(root, "../skills-evil/x").is_err());
    }

    #[test]
    fn safe_join_folds_inner_dots() {
        let root = Path::new("/srv/skills");
        let p = safe_join(root, "a/./b/../c.txt").expect("dots inside the root are fine");
        assert_eq!(p, PathBuf::from("/srv/skills/a/c.txt"));
    }

    #[test]
    fn normalize_rejects_degenerate_inputs() {
        assert_eq!(normalize_relative_file_path(""), None);
        assert_eq!(normalize_relative_file_path("."), None);
        assert_eq!(normalize_relative_file_path(".."), None);
        assert_eq!(normalize_relative_file_path("dir/"), None);
        assert_eq!(normalize_relative_file_path("a/../b"), None);
    }

    #[test]
    fn normalize_cleans_separators() {
        assert_eq!(
            normalize_relative_file_path("a\\b\\c.txt").as_deref(),
            Some("a/b/c.txt")
        );
        assert_eq!(
            normalize_relative_file_path("/leading/slash.txt").as_deref(),
            Some("leading/slash.txt")
        );
        assert_eq!(
            normalize_relative_file_path("a//b/./c.txt").as_deref(),
            Some("a/b/c.txt")
        );
    }

    #[test]
    fn rewrite_resolves_uploads_and_out_flags() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let session = tmp.path();
        std::fs::create_dir_all(session.join("uploads")).expect("mkdir uploads");
        std::fs::write(session.join("uploads/in.csv"), "a,b\n").expect("write upload");

        let argv: Vec<String> = ["python", "script.py", "uploads/in.csv", "--out", "result.xlsx"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rewritten = rewrite_args(&argv, session);

        assert_eq!(rewritten[0], "python");
        // script.py does not exist in the session, so it is untouched.
        assert_eq!(rewritten[1], "script.py");
        assert_eq!(
            rewritten[2],
            session.join("uploads/in.csv").to_string_lossy()
        );
        assert_eq!(rewritten[3], "--out");
        assert_eq!(
            rewritten[4],
            session.join("result.xlsx").to_string_lossy()
        );
    }

    #[test]
    fn rewrite_handles_equals_form_and_existing_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let session = tmp.path();
        std::fs::write(session.join("draft.md"), "x").expect("write");

        let argv: Vec<String> = ["pandoc", "draft.md", "--output=out.pdf", "-t", "pdf"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rewritten = rewrite_args(&argv, session);

        assert_eq!(rewritten[1], session.join("draft.md").to_string_lossy());
        assert_eq!(
            rewritten[2],
            format!("--output={}", session.join("out.pdf").to_string_lossy())
        );
        // Non-path tokens stay put.
        assert_eq!(rewritten[3], "-t");
        assert_eq!(rewritten[4], "pdf");
    }

    #[test]
    fn rewrite_leaves_absolute_and_urls_alone() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let argv: Vec<String> = ["node", "/opt/tool.js", "https://example.com"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(rewrite_args(&argv, tmp.path()), argv);
    }

    #[test]
    fn listing_respects_depth_bound() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join("a/b/c")).expect("mkdirs");
        std::fs::write(tmp.path().join("top.txt"), "").expect("write");
        std::fs::write(tmp.path().join("a/mid.txt"), "").expect("write");
        std::fs::write(tmp.path().join("a/b/deep.txt"), "").expect("write");

        let entries = list_dir_bounded(tmp.path(), 1);
        let rels: Vec<&str> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert!(rels.contains(&"a"));
        assert!(rels.contains(&"top.txt"));
        assert!(rels.contains(&"a/mid.txt"));
        assert!(rels.contains(&"a/b"));
        assert!(!rels.contains(&"a/b/deep.txt"));
    }

    #[test]
    fn listing_orders_dirs_before_files_per_level() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join("zdir")).expect("mkdir");
        std::fs::write(tmp.path().join("afile.txt"), "").expect("write");

        let entries = list_dir_bounded(tmp.path(), 0);
        assert_eq!(entries[0].relative_path, "zdir");
        assert_eq!(entries[1].relative_path, "afile.txt");
    }
}
