mod cli;
mod observability;
mod sink;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use cli::{Cli, Commands};
use sink::TerminalEventSink;

use skillpilot_agent::agent_loop::{self, TurnConfig};
use skillpilot_agent::llm::LlmClient;
use skillpilot_agent::session::FileConversationStore;
use skillpilot_core::config::{self, AgentTuning, LlmConfig, PathsConfig};

fn main() -> Result<()> {
    observability::init_tracing();
    config::load_dotenv();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            query,
            conversation,
            files,
            skills_root,
            system_prompt,
            max_steps,
            memory_turns,
            history_turns,
            out_dir,
        } => run_turn_command(
            query,
            conversation,
            files,
            skills_root,
            system_prompt,
            max_steps,
            memory_turns,
            history_turns,
            out_dir,
        ),
        Commands::Skills { skills_root } => {
            let paths = PathsConfig::from_env();
            let root = paths.resolve_skills_root(skills_root.as_deref());
            let index = skillpilot_core::skill::scan_skills(Some(root.as_path()));
            println!("{}", serde_json::to_string_pretty(&index)?);
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_turn_command(
    query: String,
    conversation: String,
    files: Vec<String>,
    skills_root: Option<String>,
    system_prompt: Option<String>,
    max_steps: Option<usize>,
    memory_turns: Option<usize>,
    history_turns: Option<usize>,
    out_dir: String,
) -> Result<()> {
    let llm = LlmConfig::from_env();
    if llm.api_key.is_empty() {
        anyhow::bail!("no API key configured; set SKILLPILOT_API_KEY (or OPENAI_API_KEY)");
    }

    let paths = PathsConfig::from_env();
    let tuning = AgentTuning::from_env();

    let mut config = TurnConfig::new(&conversation, &query);
    config.skills_root = Some(paths.resolve_skills_root(skills_root.as_deref()));
    config.temp_root = paths.resolve_temp_root();
    config.system_prompt = system_prompt;
    config.uploads = files.into_iter().map(PathBuf::from).collect();
    config.max_steps = max_steps.unwrap_or(tuning.max_steps);
    config.memory_turns = memory_turns.unwrap_or(tuning.memory_turns);
    config.history_turns = history_turns.unwrap_or(tuning.history_turns);

    let store_path = paths
        .store_path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(default_store_path);
    let store = FileConversationStore::open(&store_path);

    let client = LlmClient::from_config(&llm);
    let mut sink = TerminalEventSink::new(PathBuf::from(out_dir));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let outcome = runtime.block_on(agent_loop::run_turn(&config, &client, &store, &mut sink))?;

    tracing::info!(
        steps = outcome.steps,
        tool_calls = outcome.tool_calls,
        exported_files = outcome.exported_files,
        "turn complete"
    );
    Ok(())
}

fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".skillpilot")
        .join("conversations.json")
}
