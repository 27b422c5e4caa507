use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tfops_contract::{ReviewThreadRef, RunAction, RunExecutor, RunReceipt, TriggerRequest};
use tfops_vcs::{FetchOutcome, SourceControl, SourceControlError, SourceControlResult};

pub(crate) fn request(workspace: &str) -> TriggerRequest {
    TriggerRequest {
        workspace: workspace.to_string(),
        action: RunAction::Plan,
        source_revision: "feature-sha".to_string(),
        target_revision: "main-sha".to_string(),
        extra_args: Vec::new(),
        merge_request: ReviewThreadRef::new("group/infra", 7),
    }
}

#[derive(Default)]
pub(crate) struct ScriptedExecutor {
    failures: HashMap<String, String>,
    stalls: HashSet<String>,
    panics: HashSet<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<TriggerRequest>>,
}

impl ScriptedExecutor {
    pub(crate) fn failing(mut self, workspace: &str, error: &str) -> Self {
        self.failures
            .insert(workspace.to_string(), error.to_string());
        self
    }

    pub(crate) fn stalling(mut self, workspace: &str) -> Self {
        self.stalls.insert(workspace.to_string());
        self
    }

    pub(crate) fn panicking(mut self, workspace: &str) -> Self {
        self.panics.insert(workspace.to_string());
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<TriggerRequest> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl RunExecutor for ScriptedExecutor {
    async fn trigger_run(&self, request: &TriggerRequest) -> Result<RunReceipt> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(request.clone());
        if self.panics.contains(&request.workspace) {
            panic!("scripted panic for {}", request.workspace);
        }
        if self.stalls.contains(&request.workspace) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.get(&request.workspace) {
            bail!("{error}");
        }
        Ok(RunReceipt {
            run_id: format!("run-{}", request.workspace),
        })
    }
}

/// Source-control fake keyed by revision names. Every revision resolves to
/// itself unless listed as missing, and the merge base of any pair is looked
/// up in `merge_bases` falling back to the oldest revision.
#[derive(Default)]
pub(crate) struct ScriptedRepository {
    pub(crate) missing_revisions: HashSet<String>,
    pub(crate) merge_bases: HashMap<(String, String), String>,
    pub(crate) diffs: HashMap<(String, String), Vec<String>>,
    pub(crate) unfetchable: HashSet<String>,
    pub(crate) fetches: Mutex<Vec<String>>,
    pub(crate) diff_calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedRepository {
    pub(crate) fn with_diff(mut self, from: &str, to: &str, paths: &[&str]) -> Self {
        self.diffs.insert(
            (from.to_string(), to.to_string()),
            paths.iter().map(|path| path.to_string()).collect(),
        );
        self
    }

    pub(crate) fn with_merge_base(mut self, oldest: &str, newest: &str, base: &str) -> Self {
        self.merge_bases
            .insert((oldest.to_string(), newest.to_string()), base.to_string());
        self
    }

    pub(crate) fn fetches(&self) -> Vec<String> {
        self.fetches.lock().expect("fetch lock").clone()
    }

    pub(crate) fn diff_calls(&self) -> Vec<(String, String)> {
        self.diff_calls.lock().expect("diff lock").clone()
    }
}

#[async_trait]
impl SourceControl for ScriptedRepository {
    async fn resolve_revision(&self, revision: &str) -> SourceControlResult<String> {
        if self.missing_revisions.contains(revision) {
            return Err(SourceControlError::RevisionNotFound {
                revision: revision.to_string(),
            });
        }
        Ok(revision
            .strip_prefix("refs/remotes/origin/")
            .map(|branch| format!("{branch}-sha"))
            .unwrap_or_else(|| revision.to_string()))
    }

    async fn merge_base(&self, oldest: &str, newest: &str) -> SourceControlResult<String> {
        Ok(self
            .merge_bases
            .get(&(oldest.to_string(), newest.to_string()))
            .cloned()
            .unwrap_or_else(|| oldest.to_string()))
    }

    async fn diff_paths(&self, from: &str, to: &str) -> SourceControlResult<Vec<String>> {
        self.diff_calls
            .lock()
            .expect("diff lock")
            .push((from.to_string(), to.to_string()));
        Ok(self
            .diffs
            .get(&(from.to_string(), to.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch(&self, branch: &str) -> SourceControlResult<FetchOutcome> {
        self.fetches
            .lock()
            .expect("fetch lock")
            .push(branch.to_string());
        if self.unfetchable.contains(branch) {
            return Err(SourceControlError::Fetch {
                branch: branch.to_string(),
                message: "couldn't find remote ref".to_string(),
            });
        }
        Ok(FetchOutcome::Updated)
    }

    fn upstream_revision(&self, branch: &str) -> String {
        format!("refs/remotes/origin/{branch}")
    }
}
