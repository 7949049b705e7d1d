//! Structured configuration schemas.

use std::path::PathBuf;

use super::loader::{env_optional, env_or, env_usize};

/// LLM endpoint configuration (OpenAI-compatible chat completions).
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f64>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            api_base: env_or(
                "SKILLPILOT_API_BASE",
                &["OPENAI_API_BASE", "BASE_URL"],
                || "https://api.openai.com/v1".to_string(),
            ),
            api_key: env_or("SKILLPILOT_API_KEY", &["OPENAI_API_KEY", "API_KEY"], String::new),
            model: env_or("SKILLPILOT_MODEL", &["MODEL"], || "gpt-4o".to_string()),
            temperature: env_optional("SKILLPILOT_TEMPERATURE", &[])
                .and_then(|v| v.parse().ok()),
        }
    }
}

/// Filesystem roots the runtime works against.
#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub skills_root: Option<String>,
    pub temp_root: Option<String>,
    pub store_path: Option<String>,
}

impl PathsConfig {
    pub fn from_env() -> Self {
        Self {
            skills_root: env_optional("SKILLPILOT_SKILLS_ROOT", &["SKILLS_ROOT"]),
            temp_root: env_optional("SKILLPILOT_TEMP_ROOT", &[]),
            store_path: env_optional("SKILLPILOT_STORE_PATH", &[]),
        }
    }

    /// Resolve the skills root: explicit override, then env chain, then a
    /// `skills/` directory next to the process.
    pub fn resolve_skills_root(&self, explicit: Option<&str>) -> PathBuf {
        if let Some(p) = explicit.filter(|p| !p.trim().is_empty()) {
            return PathBuf::from(p);
        }
        if let Some(p) = &self.skills_root {
            return PathBuf::from(p);
        }
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("skills")
    }

    /// Resolve the temp root that holds session directories.
    pub fn resolve_temp_root(&self) -> PathBuf {
        match &self.temp_root {
            Some(p) => PathBuf::from(p),
            None => std::env::temp_dir().join("skillpilot"),
        }
    }
}

/// Loop tuning knobs.
#[derive(Debug, Clone)]
pub struct AgentTuning {
    /// LLM invocations per turn.
    pub max_steps: usize,
    /// Rolling window of remembered turns inside the step loop.
    pub memory_turns: usize,
    /// Prior conversation turns replayed into the prompt.
    pub history_turns: usize,
}

impl Default for AgentTuning {
    fn default() -> Self {
        Self {
            max_steps: 8,
            memory_turns: 10,
            history_turns: 0,
        }
    }
}

impl AgentTuning {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_steps: env_usize("SKILLPILOT_MAX_STEPS", d.max_steps),
            memory_turns: env_usize("SKILLPILOT_MEMORY_TURNS", d.memory_turns),
            history_turns: env_usize("SKILLPILOT_HISTORY_TURNS", d.history_turns),
        }
    }
}
