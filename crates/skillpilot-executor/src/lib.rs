//! Child-process supervision for agent tool calls.
//!
//! A command goes through a fixed pre-flight pipeline before it may spawn:
//! allow-list check, python module containment and import probing, PATH
//! resolution, and session-relative argument rewriting. The child runs with
//! captured stdio under a deadline; on expiry it receives a polite signal
//! and, after a grace interval, a forceful kill.
//!
//! This is a cooperative sandbox (executable allow-listing plus path
//! containment), not a security boundary.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use lazy_static::lazy_static;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use skillpilot_core::config::env_usize;
use skillpilot_core::path_guard;

/// Executables a command may name besides the `python` alias.
pub const ALLOWED_COMMANDS: &[&str] = &["node", "pandoc", "soffice", "pdftoppm"];

/// Alias remapped to the host interpreter before spawning.
pub const PYTHON_ALIAS: &str = "python";

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command must be a non-empty list")]
    EmptyCommand,
    #[error("command not allowed: {exe}")]
    CommandNotAllowed { exe: String },
    #[error("invalid module name: {module}")]
    InvalidModuleName { module: String },
    #[error("python -m {module} not found in skill folder")]
    NoExecutableFound { module: String },
    #[error("python module missing: {module} ({detail})")]
    ModuleMissing { module: String, detail: String },
    #[error("module install failed: {module}")]
    InstallFailed {
        module: String,
        stdout: String,
        stderr: String,
    },
    #[error("executable not found: {exe}")]
    ExecutableNotFound { exe: String, hint: String },
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("subprocess failed: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Captured result of a finished child.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
}

/// One command to run on behalf of the agent.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub allow_install: bool,
    pub timeout: Duration,
}

impl CommandRequest {
    pub fn new(argv: Vec<String>, cwd: PathBuf) -> Self {
        Self {
            argv,
            cwd,
            allow_install: false,
            timeout: default_timeout(),
        }
    }

    pub fn with_install(mut self, allow_install: bool) -> Self {
        self.allow_install = allow_install;
        self
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(env_usize("SKILLPILOT_EXEC_TIMEOUT_SECS", 300) as u64)
}

fn grace_period() -> Duration {
    Duration::from_secs(env_usize("SKILLPILOT_EXEC_GRACE_SECS", 2) as u64)
}

fn install_timeout() -> Duration {
    Duration::from_secs(env_usize("SKILLPILOT_INSTALL_TIMEOUT_SECS", 600) as u64)
}

/// Host interpreter the `python` alias resolves to.
pub fn python_interpreter() -> String {
    skillpilot_core::config::env_or("SKILLPILOT_PYTHON", &[], || "python3".to_string())
}

// ─── Pre-flight checks ──────────────────────────────────────────────────────

lazy_static! {
    static ref MODULE_NAME: regex::Regex =
        regex::Regex::new(r"^[A-Za-z0-9_.-]+$").expect("module-name regex is valid");
}

/// Validate a module name and return its import root (first dotted segment).
pub fn module_import_root(module: &str) -> Result<&str, ExecError> {
    if module.is_empty() || !MODULE_NAME.is_match(module) {
        return Err(ExecError::InvalidModuleName {
            module: module.to_string(),
        });
    }
    Ok(module.split('.').next().unwrap_or(module))
}

/// The module named after `-m` in a python argv, if present.
pub fn python_module_arg(argv: &[String]) -> Option<String> {
    let idx = argv.iter().position(|a| a == "-m")?;
    argv.get(idx + 1).cloned()
}

/// Whether a skill directory ships the import root as a file or package.
pub fn skill_contains_python_module(skill_dir: &Path, import_root: &str) -> bool {
    skill_dir.join(format!("{import_root}.py")).is_file()
        || skill_dir.join(import_root).join("__init__.py").is_file()
}

/// Find `name` on PATH (or accept a path that already points at a file).
pub fn resolve_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

/// Human-readable hint for a missing executable.
pub fn missing_executable_hint(exe: &str) -> String {
    let base = exe.rsplit(['/', '\\']).next().unwrap_or(exe);
    match base {
        "python" | "python3" => "Python 3 is not installed or not on PATH.".to_string(),
        "node" => "Node.js is not installed or not on PATH.".to_string(),
        "pandoc" => "pandoc is not installed; document conversion is unavailable.".to_string(),
        "soffice" => "LibreOffice (soffice) is not installed; office conversion is unavailable.".to_string(),
        "pdftoppm" => "poppler-utils (pdftoppm) is not installed; PDF rasterization is unavailable.".to_string(),
        other => format!("{other} is not installed or not on PATH."),
    }
}

/// Probe the import root and install it with pip when allowed.
pub async fn ensure_python_module(
    import_root: &str,
    allow_install: bool,
    cwd: &Path,
) -> Result<(), ExecError> {
    if import_probe(import_root, cwd).await? {
        return Ok(());
    }
    if !allow_install {
        return Err(ExecError::ModuleMissing {
            module: import_root.to_string(),
            detail: "not importable; pass auto_install=true to install it with pip".to_string(),
        });
    }
    tracing::info!(module = import_root, "installing python module via pip");
    let argv = vec![
        python_interpreter(),
        "-m".to_string(),
        "pip".to_string(),
        "install".to_string(),
        import_root.to_string(),
    ];
    let out = spawn_captured(&argv, cwd, install_timeout()).await?;
    if out.returncode != 0 {
        return Err(ExecError::InstallFailed {
            module: import_root.to_string(),
            stdout: out.stdout,
            stderr: out.stderr,
        });
    }
    if import_probe(import_root, cwd).await? {
        Ok(())
    } else {
        Err(ExecError::ModuleMissing {
            module: import_root.to_string(),
            detail: "still not importable after pip install".to_string(),
        })
    }
}

async fn import_probe(import_root: &str, cwd: &Path) -> Result<bool, ExecError> {
    let argv = vec![
        python_interpreter(),
        "-c".to_string(),
        format!("import {import_root}"),
    ];
    match spawn_captured(&argv, cwd, Duration::from_secs(30)).await {
        Ok(out) => Ok(out.returncode == 0),
        Err(ExecError::Spawn(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            let exe = python_interpreter();
            Err(ExecError::ExecutableNotFound {
                hint: missing_executable_hint(&exe),
                exe,
            })
        }
        Err(e) => Err(e),
    }
}

// ─── Run ────────────────────────────────────────────────────────────────────

/// Validate, rewrite, and run a command.
///
/// `module_scope` is set for skill commands: a `python -m MODULE` argv then
/// requires the module to live inside that directory ([`ExecError::NoExecutableFound`],
/// which drives the consent flow upstream). Session commands pass `None` and
/// only get the import probe.
pub async fn run_command(
    req: CommandRequest,
    module_scope: Option<&Path>,
    session_dir: &Path,
) -> Result<CommandOutput, ExecError> {
    let mut argv = req.argv;
    let Some(exe) = argv.first().cloned() else {
        return Err(ExecError::EmptyCommand);
    };

    if exe == PYTHON_ALIAS {
        if let Some(module) = python_module_arg(&argv) {
            let root = module_import_root(&module)?.to_string();
            if let Some(scope) = module_scope {
                if !skill_contains_python_module(scope, &root) {
                    return Err(ExecError::NoExecutableFound { module });
                }
            }
            ensure_python_module(&root, req.allow_install, session_dir).await?;
        }
        argv[0] = python_interpreter();
    } else if !ALLOWED_COMMANDS.contains(&exe.as_str()) {
        return Err(ExecError::CommandNotAllowed { exe });
    }

    let resolved = resolve_executable(&argv[0]).ok_or_else(|| ExecError::ExecutableNotFound {
        exe: argv[0].clone(),
        hint: missing_executable_hint(&exe),
    })?;
    argv[0] = resolved.to_string_lossy().into_owned();

    let argv = path_guard::rewrite_args(&argv, session_dir);
    spawn_captured(&argv, &req.cwd, req.timeout).await
}

async fn spawn_captured(
    argv: &[String],
    cwd: &Path,
    timeout: Duration,
) -> Result<CommandOutput, ExecError> {
    tracing::info!(cmd = ?argv, cwd = %cwd.display(), "spawning child process");
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let mut stdout_pipe = child.stdout.take().expect("stdout is piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr is piped");
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let waited = tokio::time::timeout(timeout, async {
        let _ = tokio::join!(
            stdout_pipe.read_to_end(&mut stdout_buf),
            stderr_pipe.read_to_end(&mut stderr_buf),
        );
        child.wait().await
    })
    .await;

    match waited {
        Ok(status) => {
            let status = status?;
            let returncode = status.code().unwrap_or(-1);
            tracing::info!(
                returncode,
                stdout_len = stdout_buf.len(),
                stderr_len = stderr_buf.len(),
                "child process finished"
            );
            Ok(CommandOutput {
                returncode,
                stdout: String::from_utf8_lossy(&stdout_buf).trim().to_string(),
                stderr: String::from_utf8_lossy(&stderr_buf).trim().to_string(),
            })
        }
        Err(_) => {
            tracing::warn!(?timeout, "child process exceeded deadline, terminating");
            terminate_child(&mut child, grace_period()).await;
            Err(ExecError::Timeout(timeout))
        }
    }
}

/// Polite signal first; forceful kill after the grace interval.
async fn terminate_child(child: &mut tokio::process::Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
    }
    #[cfg(not(unix))]
    let _ = grace;
    let _ = child.kill().await;
}
