use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ReviewThreadRef, RunAction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One unit of work against one workspace.
pub struct TriggerRequest {
    pub workspace: String,
    pub action: RunAction,
    pub source_revision: String,
    pub target_revision: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
    pub merge_request: ReviewThreadRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Acknowledgement returned by the run-execution system.
pub struct RunReceipt {
    pub run_id: String,
}

/// Run-execution capability. Starting a run is the whole contract; the
/// remote run's own lifecycle is tracked elsewhere.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    async fn trigger_run(&self, request: &TriggerRequest) -> Result<RunReceipt>;
}
