//! Observability: tracing init.
//!
//! When SKILLPILOT_QUIET=1, only WARN and above are logged.
//! SKILLPILOT_LOG_JSON=1 switches to JSON output.

use std::env;

use tracing_subscriber::{prelude::*, EnvFilter};

/// Initialize tracing. Call at process startup.
pub fn init_tracing() {
    let level: String = if is_quiet() {
        "skillpilot=warn".to_string()
    } else {
        env::var("SKILLPILOT_LOG_LEVEL").unwrap_or_else(|_| "skillpilot=info".to_string())
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json = env::var("SKILLPILOT_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        .unwrap_or(false);

    let _ = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
}

fn is_quiet() -> bool {
    env::var("SKILLPILOT_QUIET")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        .unwrap_or(false)
}
