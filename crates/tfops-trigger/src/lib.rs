//! Workspace resolution, concurrent run triggering and outcome reporting.
//!
//! A [`Trigger`] resolves the workspaces a merge request affects, issues one
//! [`tfops_contract::TriggerRequest`] per workspace through the
//! [`TriggerOrchestrator`], and returns the aggregated [`TriggeredWorkspaces`]
//! that [`render_outcome_comment`] turns into review feedback.

pub mod outcome_report;
pub mod run_trigger;
pub mod trigger_orchestrator;
pub mod triggered_workspaces;
pub mod workspace_directory;
pub mod workspace_resolver;

#[cfg(test)]
pub(crate) mod test_support;

pub use outcome_report::{render_event_failure_comment, render_outcome_comment};
pub use run_trigger::{
    ProjectTriggerFactory, ProjectWorkspaces, RunTrigger, Trigger, TriggerConfig, TriggerFactory,
    TriggerOrigin,
};
pub use trigger_orchestrator::{OrchestratorConfig, TriggerOrchestrator};
pub use triggered_workspaces::{ErroredWorkspace, TriggerOutcome, TriggeredWorkspaces};
pub use workspace_directory::{WorkspaceDirectory, WorkspaceDirectoryError, WorkspaceEntry};
pub use workspace_resolver::resolve_workspaces;
