use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tfops_commands::CommentCommand;
use tfops_contract::{ReviewThreadRef, RunAction, RunExecutor, TriggerRequest};
use tfops_vcs::{changed_files, SourceControl};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::trigger_orchestrator::{OrchestratorConfig, TriggerOrchestrator};
use crate::triggered_workspaces::TriggeredWorkspaces;
use crate::workspace_directory::WorkspaceDirectory;
use crate::workspace_resolver::resolve_workspaces;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What caused a trigger to be created.
pub enum TriggerOrigin {
    Comment,
    MergeRequestEvent,
}

impl TriggerOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::MergeRequestEvent => "merge_request_event",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Everything a trigger needs to know about one command on one merge request.
pub struct TriggerConfig {
    pub merge_request: ReviewThreadRef,
    pub agent: String,
    pub action: RunAction,
    pub workspace: Option<String>,
    pub trailing_args: Vec<String>,
    pub source_branch: String,
    pub target_branch: String,
    pub source_revision: String,
    pub origin: TriggerOrigin,
}

impl TriggerConfig {
    pub fn from_command(
        merge_request: ReviewThreadRef,
        command: CommentCommand,
        source_branch: impl Into<String>,
        target_branch: impl Into<String>,
        source_revision: impl Into<String>,
        origin: TriggerOrigin,
    ) -> Self {
        Self {
            merge_request,
            agent: command.agent,
            action: command.action,
            workspace: command.workspace,
            trailing_args: command.trailing_args,
            source_branch: source_branch.into(),
            target_branch: target_branch.into(),
            source_revision: source_revision.into(),
            origin,
        }
    }

    pub fn project(&self) -> &str {
        &self.merge_request.project
    }

    pub fn command(&self) -> CommentCommand {
        CommentCommand {
            agent: self.agent.clone(),
            action: self.action,
            workspace: self.workspace.clone(),
            trailing_args: self.trailing_args.clone(),
        }
    }
}

/// A prepared command bound to one merge request.
#[async_trait]
pub trait Trigger: Send + Sync {
    fn config(&self) -> &TriggerConfig;

    /// Resolves the affected workspaces and triggers a run in each.
    ///
    /// `Err` means the event failed as a whole (nothing was triggered).
    /// Per-workspace failures are reported inside the returned aggregate.
    async fn trigger_all_workspaces(&self) -> Result<TriggeredWorkspaces>;
}

pub trait TriggerFactory: Send + Sync {
    fn create(&self, config: TriggerConfig) -> Result<Box<dyn Trigger>>;
}

#[derive(Clone)]
/// Repository and workspace mapping for one source project.
pub struct ProjectWorkspaces {
    pub scm: Arc<dyn SourceControl>,
    pub directory: Arc<WorkspaceDirectory>,
    lock: Arc<Mutex<()>>,
}

impl ProjectWorkspaces {
    pub fn new(scm: Arc<dyn SourceControl>, directory: Arc<WorkspaceDirectory>) -> Self {
        Self {
            scm,
            directory,
            lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Trigger backed by a local clone and a remote run executor.
pub struct RunTrigger {
    config: TriggerConfig,
    project: ProjectWorkspaces,
    orchestrator: TriggerOrchestrator,
}

impl RunTrigger {
    pub fn new(
        config: TriggerConfig,
        project: ProjectWorkspaces,
        orchestrator: TriggerOrchestrator,
    ) -> Self {
        Self {
            config,
            project,
            orchestrator,
        }
    }

    async fn resolve(&self) -> Result<(String, Vec<String>)> {
        // The clone is shared by every worker handling this project.
        let _clone_guard = self.project.lock.lock().await;
        let scm = self.project.scm.as_ref();
        let config = &self.config;

        scm.fetch(&config.target_branch)
            .await
            .with_context(|| format!("failed to fetch target branch '{}'", config.target_branch))?;
        let target_ref = scm.upstream_revision(&config.target_branch);
        let target_revision = scm
            .resolve_revision(&target_ref)
            .await
            .with_context(|| format!("failed to resolve target branch '{}'", config.target_branch))?;

        let command = config.command();
        let source_branch = config.source_branch.as_str();
        let source_revision = config.source_revision.as_str();
        let oldest = target_revision.as_str();
        let workspaces = resolve_workspaces(&command, &self.project.directory, || async move {
            scm.fetch(source_branch).await?;
            changed_files(scm, oldest, source_revision).await
        })
        .await
        .with_context(|| {
            format!(
                "failed to resolve workspaces between '{}' and '{}'",
                config.target_branch, config.source_revision
            )
        })?;

        Ok((target_revision, workspaces.into_iter().collect()))
    }
}

#[async_trait]
impl Trigger for RunTrigger {
    fn config(&self) -> &TriggerConfig {
        &self.config
    }

    async fn trigger_all_workspaces(&self) -> Result<TriggeredWorkspaces> {
        let (target_revision, workspaces) = self.resolve().await?;
        info!(
            project = self.config.project(),
            merge_request_iid = self.config.merge_request.merge_request_iid,
            action = self.config.action.as_str(),
            origin = self.config.origin.as_str(),
            workspaces = workspaces.len(),
            "resolved workspaces"
        );
        if workspaces.is_empty() {
            debug!(project = self.config.project(), "no workspaces affected");
        }

        let requests = workspaces
            .into_iter()
            .map(|workspace| TriggerRequest {
                workspace,
                action: self.config.action,
                source_revision: self.config.source_revision.clone(),
                target_revision: target_revision.clone(),
                extra_args: self.config.trailing_args.clone(),
                merge_request: self.config.merge_request.clone(),
            })
            .collect();
        Ok(self.orchestrator.trigger_all(requests).await)
    }
}

/// Builds [`RunTrigger`]s for the projects listed in configuration.
pub struct ProjectTriggerFactory {
    projects: HashMap<String, ProjectWorkspaces>,
    orchestrator: TriggerOrchestrator,
}

impl ProjectTriggerFactory {
    pub fn new(executor: Arc<dyn RunExecutor>, orchestrator_config: OrchestratorConfig) -> Self {
        Self {
            projects: HashMap::new(),
            orchestrator: TriggerOrchestrator::new(executor, orchestrator_config),
        }
    }

    pub fn with_project(mut self, project: impl Into<String>, workspaces: ProjectWorkspaces) -> Self {
        self.projects.insert(project.into(), workspaces);
        self
    }

    pub fn project(&self, project: &str) -> Option<&ProjectWorkspaces> {
        self.projects.get(project)
    }
}

impl TriggerFactory for ProjectTriggerFactory {
    fn create(&self, config: TriggerConfig) -> Result<Box<dyn Trigger>> {
        let project = self
            .projects
            .get(config.project())
            .cloned()
            .ok_or_else(|| anyhow!("project '{}' is not configured", config.project()))?;
        Ok(Box::new(RunTrigger::new(
            config,
            project,
            self.orchestrator.clone(),
        )))
    }
}
