use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::source_control::{FetchOutcome, SourceControl, SourceControlError, SourceControlResult};

const DEFAULT_REMOTE: &str = "origin";

#[derive(Debug)]
struct GitOutput {
    code: Option<i32>,
    stdout: Vec<u8>,
    stderr: String,
}

impl GitOutput {
    fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn stdout_line(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }
}

#[derive(Debug, Clone)]
/// [`SourceControl`] backed by a local clone and the `git` executable.
pub struct GitCliRepository {
    repo_dir: PathBuf,
    remote: String,
}

impl GitCliRepository {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            remote: DEFAULT_REMOTE.to_string(),
        }
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    async fn git(&self, args: &[&str]) -> SourceControlResult<GitOutput> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(GitOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn git_checked(&self, command: &str, args: &[&str]) -> SourceControlResult<GitOutput> {
        let output = self.git(args).await?;
        if !output.success() {
            return Err(SourceControlError::Command {
                command: command.to_string(),
                message: describe_failure(&output),
            });
        }
        Ok(output)
    }

    async fn try_resolve(&self, revision: &str) -> SourceControlResult<Option<String>> {
        let spec = format!("{revision}^{{commit}}");
        let output = self
            .git(&["rev-parse", "--verify", "--quiet", spec.as_str()])
            .await?;
        if !output.success() {
            return Ok(None);
        }
        let commit = output.stdout_line();
        Ok((!commit.is_empty()).then_some(commit))
    }
}

fn describe_failure(output: &GitOutput) -> String {
    let code = output
        .code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "signal".to_string());
    if output.stderr.is_empty() {
        format!("exit status {code}")
    } else {
        format!("exit status {code}: {}", output.stderr)
    }
}

fn rejects_option_like(value: &str) -> bool {
    value.trim().is_empty() || value.starts_with('-')
}

/// Parses `git diff --name-status -z` output. Rename and copy records carry
/// two paths and both are emitted, old path first.
fn parse_name_status(raw: &[u8]) -> Vec<String> {
    let mut fields = raw
        .split(|byte| *byte == 0)
        .filter(|field| !field.is_empty())
        .map(|field| String::from_utf8_lossy(field).into_owned());
    let mut paths = Vec::new();
    while let Some(status) = fields.next() {
        let path_count = if status.starts_with('R') || status.starts_with('C') {
            2
        } else {
            1
        };
        for _ in 0..path_count {
            if let Some(path) = fields.next() {
                paths.push(path);
            }
        }
    }
    paths
}

#[async_trait]
impl SourceControl for GitCliRepository {
    async fn resolve_revision(&self, revision: &str) -> SourceControlResult<String> {
        if rejects_option_like(revision) {
            return Err(SourceControlError::RevisionNotFound {
                revision: revision.to_string(),
            });
        }
        self.try_resolve(revision)
            .await?
            .ok_or_else(|| SourceControlError::RevisionNotFound {
                revision: revision.to_string(),
            })
    }

    async fn merge_base(&self, oldest: &str, newest: &str) -> SourceControlResult<String> {
        let output = self.git(&["merge-base", oldest, newest]).await?;
        match output.code {
            Some(0) if !output.stdout_line().is_empty() => Ok(output.stdout_line()),
            Some(0) | Some(1) => Err(SourceControlError::NoCommonAncestor {
                oldest: oldest.to_string(),
                newest: newest.to_string(),
            }),
            _ => Err(SourceControlError::Command {
                command: "merge-base".to_string(),
                message: describe_failure(&output),
            }),
        }
    }

    async fn diff_paths(&self, from: &str, to: &str) -> SourceControlResult<Vec<String>> {
        let output = self
            .git_checked(
                "diff",
                &[
                    "diff",
                    "--no-color",
                    "--no-ext-diff",
                    "--name-status",
                    "-M",
                    "-z",
                    from,
                    to,
                ],
            )
            .await?;
        Ok(parse_name_status(&output.stdout))
    }

    async fn fetch(&self, branch: &str) -> SourceControlResult<FetchOutcome> {
        if rejects_option_like(branch) {
            return Err(SourceControlError::Fetch {
                branch: branch.to_string(),
                message: "invalid branch name".to_string(),
            });
        }
        let upstream = self.upstream_revision(branch);
        let before = self.try_resolve(&upstream).await?;
        let refspec = format!("+refs/heads/{branch}:refs/remotes/{}/{branch}", self.remote);
        let output = self
            .git(&["fetch", "--quiet", "--no-tags", self.remote.as_str(), refspec.as_str()])
            .await?;
        if !output.success() {
            return Err(SourceControlError::Fetch {
                branch: branch.to_string(),
                message: describe_failure(&output),
            });
        }
        let after = self.try_resolve(&upstream).await?;
        let outcome = if before.is_some() && before == after {
            FetchOutcome::AlreadyUpToDate
        } else {
            FetchOutcome::Updated
        };
        debug!(
            branch,
            remote = self.remote.as_str(),
            ?outcome,
            "fetched upstream branch"
        );
        Ok(outcome)
    }

    fn upstream_revision(&self, branch: &str) -> String {
        format!("refs/remotes/{}/{branch}", self.remote)
    }
}
