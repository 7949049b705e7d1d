//! Per-turn tool backend.
//!
//! Owns the pair `(skills_root, session_dir)` for one conversation turn,
//! the progressive-disclosure ledger (which skills had their metadata read
//! and their trees listed), and the export set. Every operation returns a
//! JSON payload that goes back into the conversation verbatim; failures are
//! `{"error": ...}` values, never panics.

use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use skillpilot_core::mime;
use skillpilot_core::path_guard::{self, PathGuardError};
use skillpilot_core::skill::{self, catalog};

use skillpilot_executor::{self as executor, CommandRequest, ExecError};

/// Default recursion depth when listing a skill package.
pub const SKILL_LIST_DEPTH: usize = 2;
/// Default recursion depth when listing the session directory.
pub const TEMP_LIST_DEPTH: usize = 4;
/// Default read cap for skill and session files.
pub const READ_CHAR_CAP: usize = 12000;

/// A file marked for delivery at turn termination.
#[derive(Debug, Clone)]
pub struct ExportEntry {
    pub temp_relative_path: String,
    pub filename: String,
    pub mime_type: String,
}

/// Tool backend for one turn.
pub struct AgentRuntime {
    skills_root: Option<PathBuf>,
    session_dir: PathBuf,
    metadata_read: HashSet<String>,
    files_listed: HashSet<String>,
    exports: Vec<ExportEntry>,
}

impl AgentRuntime {
    pub fn new(skills_root: Option<PathBuf>, session_dir: PathBuf) -> Self {
        Self {
            skills_root,
            session_dir,
            metadata_read: HashSet::new(),
            files_listed: HashSet::new(),
            exports: Vec::new(),
        }
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn exports(&self) -> &[ExportEntry] {
        &self.exports
    }

    // ── Ledger ──────────────────────────────────────────────────────────────

    pub fn has_skill_metadata(&self, skill_name: &str) -> bool {
        self.metadata_read.contains(skill_name.trim())
    }

    pub fn has_listed_skill_files(&self, skill_name: &str) -> bool {
        self.files_listed.contains(skill_name.trim())
    }

    // ── Session context ─────────────────────────────────────────────────────

    pub fn get_session_context(&self) -> Value {
        json!({
            "skills_root": self.skills_root.as_ref().map(|p| p.to_string_lossy()),
            "session_dir": self.session_dir.to_string_lossy(),
        })
    }

    // ── Skill operations ────────────────────────────────────────────────────

    pub fn get_skill_metadata(&mut self, skill_name: &str) -> Value {
        let skill_path = match self.skill_path(skill_name) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let doc_path = skill_path.join(skill::SKILL_DOC_FILE);
        if !doc_path.is_file() {
            return json!({"error": "SKILL.md not found", "skill": skill_name});
        }
        let content = match catalog::read_text_capped(&doc_path, READ_CHAR_CAP) {
            Ok(c) => c,
            Err(e) => {
                return json!({"error": "read failed", "skill": skill_name, "detail": e.to_string()})
            }
        };
        let meta = skill::parse_frontmatter(&content);
        self.metadata_read.insert(skill_name.trim().to_string());
        json!({"skill": skill_name, "metadata": meta, "skill_md": content})
    }

    pub fn list_skill_files(&mut self, skill_name: &str, max_depth: Option<usize>) -> Value {
        let skill_path = match self.skill_path(skill_name) {
            Ok(p) => p,
            Err(e) => return e,
        };
        self.files_listed.insert(skill_name.trim().to_string());
        let entries = path_guard::list_dir_bounded(&skill_path, max_depth.unwrap_or(SKILL_LIST_DEPTH));
        json!({"skill": skill_name, "entries": entries})
    }

    pub fn read_skill_file(
        &self,
        skill_name: &str,
        relative_path: &str,
        max_chars: Option<usize>,
    ) -> Value {
        let skill_path = match self.skill_path(skill_name) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let file_path = match path_guard::safe_join(&skill_path, relative_path) {
            Ok(p) => p,
            Err(e) => return path_error(e, relative_path),
        };
        if !file_path.is_file() {
            return json!({"error": "file not found", "path": relative_path});
        }
        match catalog::read_text_capped(&file_path, max_chars.unwrap_or(READ_CHAR_CAP)) {
            Ok(content) => json!({"path": file_path.to_string_lossy(), "content": content}),
            Err(e) => json!({"error": "read failed", "path": relative_path, "detail": e.to_string()}),
        }
    }

    pub async fn run_skill_command(
        &self,
        skill_name: &str,
        command: Vec<String>,
        cwd_relative: Option<&str>,
        auto_install: bool,
    ) -> Value {
        let skill_path = match self.skill_path(skill_name) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let cwd = match cwd_relative {
            None => skill_path.clone(),
            Some(rel) => match path_guard::safe_join(&skill_path, rel) {
                Ok(p) => p,
                Err(e) => return path_error(e, rel),
            },
        };
        let req = CommandRequest::new(command, cwd).with_install(auto_install);
        match executor::run_command(req, Some(&skill_path), &self.session_dir).await {
            Ok(out) => json!({
                "returncode": out.returncode,
                "stdout": out.stdout,
                "stderr": out.stderr,
            }),
            Err(e) => exec_error(e, Some(skill_name)),
        }
    }

    // ── Session scratch operations ──────────────────────────────────────────

    pub fn write_temp_file(&self, relative_path: &str, content: &str) -> Value {
        let path = match self.temp_file_path(relative_path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if path.is_dir() {
            return json!({
                "error": "path is a directory",
                "relative_path": relative_path,
            });
        }
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return json!({
                    "error": "write failed",
                    "relative_path": relative_path,
                    "detail": e.to_string(),
                });
            }
        }
        match std::fs::write(&path, content) {
            Ok(()) => json!({
                "path": path.to_string_lossy(),
                "bytes": content.len(),
            }),
            Err(e) => json!({
                "error": "write failed",
                "relative_path": relative_path,
                "detail": e.to_string(),
            }),
        }
    }

    pub fn read_temp_file(&self, relative_path: &str, max_chars: Option<usize>) -> Value {
        let path = match self.temp_file_path(relative_path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if path.is_dir() {
            return json!({"error": "path is a directory", "relative_path": relative_path});
        }
        if !path.is_file() {
            return json!({"error": "file not found", "relative_path": relative_path});
        }
        match catalog::read_text_capped(&path, max_chars.unwrap_or(READ_CHAR_CAP)) {
            Ok(content) => json!({"path": path.to_string_lossy(), "content": content}),
            Err(e) => json!({
                "error": "read failed",
                "relative_path": relative_path,
                "detail": e.to_string(),
            }),
        }
    }

    pub fn list_temp_files(&self, max_depth: Option<usize>) -> Value {
        let entries =
            path_guard::list_dir_bounded(&self.session_dir, max_depth.unwrap_or(TEMP_LIST_DEPTH));
        json!({
            "session_dir": self.session_dir.to_string_lossy(),
            "entries": entries,
        })
    }

    pub async fn run_temp_command(
        &self,
        command: Vec<String>,
        cwd_relative: Option<&str>,
        auto_install: bool,
    ) -> Value {
        let cwd = match cwd_relative {
            None => self.session_dir.clone(),
            Some(rel) => match path_guard::safe_join(&self.session_dir, rel) {
                Ok(p) => p,
                Err(e) => return path_error(e, rel),
            },
        };
        let _ = std::fs::create_dir_all(&cwd);
        let req = CommandRequest::new(command, cwd).with_install(auto_install);
        match executor::run_command(req, None, &self.session_dir).await {
            Ok(out) => json!({
                "returncode": out.returncode,
                "stdout": out.stdout,
                "stderr": out.stderr,
            }),
            Err(e) => exec_error(e, None),
        }
    }

    /// Record a session file as a deliverable. No copy happens: the blob is
    /// read from the session at turn termination, under the chosen name.
    pub fn export_temp_file(
        &mut self,
        temp_relative_path: &str,
        workspace_relative_path: &str,
        overwrite: bool,
    ) -> Value {
        let src = match self.temp_file_path(temp_relative_path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if src.is_dir() {
            return json!({
                "error": "source path is a directory",
                "temp_relative_path": temp_relative_path,
            });
        }
        if !src.is_file() {
            return json!({
                "error": "source file not found",
                "temp_relative_path": temp_relative_path,
            });
        }
        let bytes = std::fs::metadata(&src).map(|m| m.len()).unwrap_or(0);

        let out_name = Path::new(workspace_relative_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !out_name.is_empty() {
            let normalized = path_guard::normalize_relative_file_path(temp_relative_path)
                .unwrap_or_else(|| temp_relative_path.to_string());
            let entry = ExportEntry {
                temp_relative_path: normalized.clone(),
                mime_type: mime::guess_mime_type(&out_name),
                filename: out_name,
            };
            match self
                .exports
                .iter()
                .position(|e| e.temp_relative_path == normalized)
            {
                Some(i) => self.exports[i] = entry,
                None => self.exports.push(entry),
            }
        }

        json!({
            "source": src.to_string_lossy(),
            "relative_path": temp_relative_path,
            "bytes": bytes,
            "note": "export_temp_file does not copy files; it marks the final output only",
            "requested_name": workspace_relative_path,
            "overwrite": overwrite,
        })
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    fn skill_path(&self, skill_name: &str) -> Result<PathBuf, Value> {
        let Some(root) = &self.skills_root else {
            return Err(json!({"error": "skills_root not found"}));
        };
        path_guard::safe_join(root, skill_name).map_err(|e| path_error(e, skill_name))
    }

    fn temp_file_path(&self, relative_path: &str) -> Result<PathBuf, Value> {
        let Some(rp) = path_guard::normalize_relative_file_path(relative_path) else {
            return Err(json!({
                "error": "invalid relative_path",
                "relative_path": relative_path,
            }));
        };
        path_guard::safe_join(&self.session_dir, &rp).map_err(|e| path_error(e, relative_path))
    }
}

fn path_error(e: PathGuardError, path: &str) -> Value {
    match e {
        PathGuardError::OutsideRoot { .. } => {
            json!({"error": "path_outside_root", "path": path})
        }
        PathGuardError::InvalidRelativePath { .. } => {
            json!({"error": "invalid relative_path", "relative_path": path})
        }
    }
}

/// Map executor failures into the tool-result error taxonomy.
fn exec_error(e: ExecError, skill_name: Option<&str>) -> Value {
    match e {
        ExecError::EmptyCommand => json!({"error": "command must be a non-empty list"}),
        ExecError::CommandNotAllowed { exe } => {
            json!({"error": format!("command not allowed: {exe}")})
        }
        ExecError::InvalidModuleName { module } => {
            json!({"error": "invalid module name", "module": module})
        }
        ExecError::NoExecutableFound { module } => json!({
            "error": "no_executable_found",
            "skill": skill_name.unwrap_or_default(),
            "reason": "python -m module not found in skill folder",
            "module": module,
        }),
        ExecError::ModuleMissing { module, detail } => json!({
            "error": "python_module_missing",
            "module": module,
            "detail": detail,
        }),
        ExecError::InstallFailed {
            module,
            stdout,
            stderr,
        } => json!({
            "error": "module_install_failed",
            "module": module,
            "stdout": stdout,
            "stderr": stderr,
        }),
        ExecError::ExecutableNotFound { exe, hint } => json!({
            "error": "executable_not_found",
            "exe": exe,
            "hint": hint,
        }),
        ExecError::Timeout(d) => json!({
            "error": "subprocess_failed",
            "detail": format!("command timed out after {}s", d.as_secs()),
        }),
        ExecError::Spawn(e) => json!({
            "error": "subprocess_failed",
            "detail": e.to_string(),
        }),
    }
}
