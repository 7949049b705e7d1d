//! Turn termination: ending-text selection, final streaming, blob emission,
//! and the history append.

use skillpilot_core::path_guard;

use crate::output;
use crate::session;
use crate::types::{EventSink, TurnOutcome};

use super::{TurnState, FILES_GENERATED, INTERMEDIATE_ONLY, NO_OUTPUT};

pub(super) fn finish_turn(
    state: TurnState<'_>,
    final_text: Option<String>,
    already_streamed: bool,
    sink: &mut dyn EventSink,
) -> TurnOutcome {
    // A pending resume that was neither allowed, denied, nor re-recorded
    // this turn is stale.
    if state.resume_was_pending && !state.resume_saved && !state.is_resuming {
        session::clear_resume(state.store, &state.config.conversation);
    }

    let session_dir = state.session_dir();
    let exports = state.runtime.exports();

    let has_exportable = exports.iter().any(|e| {
        path_guard::safe_join(&session_dir, &e.temp_relative_path)
            .map(|p| p.is_file())
            .unwrap_or(false)
    });
    let has_any_files = path_guard::list_dir_bounded(&session_dir, 10)
        .iter()
        .any(|e| e.kind == "file");

    let text = match final_text {
        Some(t) if !t.trim().is_empty() => t.trim().to_string(),
        _ => {
            if has_exportable {
                FILES_GENERATED.to_string()
            } else if has_any_files {
                INTERMEDIATE_ONLY.to_string()
            } else {
                NO_OUTPUT.to_string()
            }
        }
    };

    // History records the literal user input of this turn, not the
    // substituted resume query.
    session::append_history_turn(state.store, &state.config.conversation, &state.config.query, &text);

    if !already_streamed {
        output::stream_final_text(sink, &text);
    }
    let exported_files = output::emit_export_blobs(sink, &session_dir, exports);
    tracing::debug!(
        steps = state.steps,
        tool_calls = state.tool_calls,
        exported_files,
        "turn finished"
    );

    TurnOutcome {
        final_text: text,
        exported_files,
        steps: state.steps,
        tool_calls: state.tool_calls,
    }
}
