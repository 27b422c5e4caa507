use std::collections::BTreeSet;
use std::future::Future;

use tfops_commands::CommentCommand;
use tfops_vcs::SourceControlResult;
use tracing::debug;

use crate::workspace_directory::WorkspaceDirectory;

/// Decides which workspaces a command targets.
///
/// An explicit `-w` wins outright and the changed-file lookup is never
/// invoked. Otherwise every workspace owning at least one changed path is
/// returned, in ascending name order. An empty set is a valid result.
pub async fn resolve_workspaces<F, Fut>(
    command: &CommentCommand,
    directory: &WorkspaceDirectory,
    changed_files: F,
) -> SourceControlResult<BTreeSet<String>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = SourceControlResult<Vec<String>>>,
{
    if let Some(workspace) = command.workspace.as_deref() {
        if !directory.contains(workspace) {
            debug!(workspace, "explicit workspace is not in the directory");
        }
        return Ok(BTreeSet::from([workspace.to_string()]));
    }

    let paths = changed_files().await?;
    let resolved = directory.workspaces_for_paths(&paths);
    debug!(
        changed = paths.len(),
        resolved = resolved.len(),
        "resolved workspaces from changed files"
    );
    Ok(resolved)
}
