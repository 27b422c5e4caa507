use tracing::debug;

use crate::source_control::{SourceControl, SourceControlResult};

/// Lists the paths changed on `newest` since it diverged from `oldest`.
///
/// The comparison base is the merge base of the two revisions, not `oldest`
/// itself, so commits that only exist on the target branch are never
/// reported as changes of the merge request.
pub async fn changed_files(
    scm: &dyn SourceControl,
    oldest: &str,
    newest: &str,
) -> SourceControlResult<Vec<String>> {
    let oldest_commit = scm.resolve_revision(oldest).await?;
    let newest_commit = scm.resolve_revision(newest).await?;
    let merge_base = scm.merge_base(&oldest_commit, &newest_commit).await?;
    let paths = scm.diff_paths(&merge_base, &newest_commit).await?;
    debug!(
        oldest,
        newest,
        merge_base = merge_base.as_str(),
        changed = paths.len(),
        "computed changed files"
    );
    Ok(paths)
}
