use async_trait::async_trait;
use thiserror::Error;

/// Result type for source-control operations.
pub type SourceControlResult<T> = Result<T, SourceControlError>;

/// Errors returned by [`SourceControl`] implementations.
#[derive(Debug, Error)]
pub enum SourceControlError {
    #[error("revision '{revision}' not found")]
    RevisionNotFound { revision: String },
    #[error("no common ancestor between '{oldest}' and '{newest}'")]
    NoCommonAncestor { oldest: String, newest: String },
    #[error("could not fetch branch '{branch}': {message}")]
    Fetch { branch: String, message: String },
    #[error("git {command} failed: {message}")]
    Command { command: String, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Result of fetching one upstream branch.
pub enum FetchOutcome {
    Updated,
    AlreadyUpToDate,
}

/// Narrow source-control capability consumed by workspace resolution.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Resolves a branch, tag or commit-ish to a concrete commit id.
    async fn resolve_revision(&self, revision: &str) -> SourceControlResult<String>;

    async fn merge_base(&self, oldest: &str, newest: &str) -> SourceControlResult<String>;

    /// Paths touched between two commits. Renames and copies report both the
    /// old and the new path.
    async fn diff_paths(&self, from: &str, to: &str) -> SourceControlResult<Vec<String>>;

    async fn fetch(&self, branch: &str) -> SourceControlResult<FetchOutcome>;

    /// Revision name under which a fetched upstream branch is addressable.
    fn upstream_revision(&self, branch: &str) -> String;
}
