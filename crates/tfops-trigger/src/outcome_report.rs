use tfops_contract::{truncate_chars, RunAction};
use tracing::debug;

use crate::triggered_workspaces::TriggeredWorkspaces;

const FAILURE_DETAIL_MAX_CHARS: usize = 600;

/// Renders the review comment for a finished trigger batch.
///
/// Returns `None` when nothing errored: successful runs are not announced.
/// Otherwise one `:no_entry:` line per errored workspace, in the order of
/// `outcome.errored`.
pub fn render_outcome_comment(project: &str, outcome: &TriggeredWorkspaces) -> Option<String> {
    if outcome.errored.is_empty() {
        debug!(
            project,
            executed = outcome.executed.len(),
            "no errored workspaces, skipping outcome comment"
        );
        return None;
    }
    let mut body = String::new();
    for entry in &outcome.errored {
        body.push_str(&format!(
            ":no_entry: {} could not be run because: {}\n",
            entry.name,
            single_line(&entry.error)
        ));
    }
    Some(body)
}

/// Renders the comment posted when an event fails before any workspace
/// could be triggered (resolution, fetch or configuration failures).
pub fn render_event_failure_comment(agent: &str, action: RunAction, error: &str) -> String {
    format!(
        ":no_entry: {agent} {action} could not be run because: {}\n",
        truncate_chars(&single_line(error), FAILURE_DETAIL_MAX_CHARS)
    )
}

fn single_line(text: &str) -> String {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
