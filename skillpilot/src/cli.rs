use clap::{Parser, Subcommand};

/// skillpilot - a skill-driven agent runtime
#[derive(Parser, Debug)]
#[command(name = "skillpilot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one conversation turn against the configured LLM
    Run {
        /// User query for this turn
        #[arg(value_name = "QUERY")]
        query: String,

        /// Conversation key for session continuity
        #[arg(long, default_value = "default")]
        conversation: String,

        /// Files to place under the session's uploads/ directory (repeatable)
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<String>,

        /// Skills root directory (overrides SKILLPILOT_SKILLS_ROOT / SKILLS_ROOT)
        #[arg(long, value_name = "DIR")]
        skills_root: Option<String>,

        /// Extra system prompt preface
        #[arg(long)]
        system_prompt: Option<String>,

        /// LLM invocations allowed for this turn (default: from env or 8)
        #[arg(long)]
        max_steps: Option<usize>,

        /// Rolling window of remembered turns inside the step loop
        #[arg(long)]
        memory_turns: Option<usize>,

        /// Prior conversation turns replayed into the prompt
        #[arg(long)]
        history_turns: Option<usize>,

        /// Directory where exported files are written
        #[arg(long, value_name = "DIR", default_value = ".")]
        out_dir: String,
    },

    /// Print the skill index scanned from the skills root
    Skills {
        /// Skills root directory (overrides SKILLPILOT_SKILLS_ROOT / SKILLS_ROOT)
        #[arg(long, value_name = "DIR")]
        skills_root: Option<String>,
    },
}
