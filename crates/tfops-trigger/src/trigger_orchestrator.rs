use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tfops_contract::{RunExecutor, TriggerRequest};
use tracing::{info, warn};

use crate::triggered_workspaces::{TriggerOutcome, TriggeredWorkspaces};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Upper bound on a single run-trigger call. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

#[derive(Clone)]
/// Issues a batch of run triggers concurrently with per-workspace isolation.
pub struct TriggerOrchestrator {
    executor: Arc<dyn RunExecutor>,
    config: OrchestratorConfig,
}

impl TriggerOrchestrator {
    pub fn new(executor: Arc<dyn RunExecutor>, config: OrchestratorConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> OrchestratorConfig {
        self.config
    }

    /// Triggers every request and waits for all of them.
    ///
    /// Each request runs on its own task. A failure, timeout or panic in one
    /// task is recorded against that workspace only and never cancels or
    /// alters the siblings. The returned aggregate always accounts for every
    /// request exactly once.
    pub async fn trigger_all(&self, requests: Vec<TriggerRequest>) -> TriggeredWorkspaces {
        if requests.is_empty() {
            return TriggeredWorkspaces::default();
        }

        let mut workspaces = Vec::with_capacity(requests.len());
        let mut handles = Vec::with_capacity(requests.len());
        for request in requests {
            workspaces.push(request.workspace.clone());
            let executor = Arc::clone(&self.executor);
            let timeout = self.config.request_timeout;
            handles.push(tokio::spawn(
                async move { trigger_one(executor, request, timeout).await },
            ));
        }

        let joined = join_all(handles).await;
        let outcomes = workspaces
            .into_iter()
            .zip(joined)
            .map(|(workspace, joined)| match joined {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(workspace = workspace.as_str(), %error, "run trigger task aborted");
                    TriggerOutcome::Errored {
                        workspace,
                        error: format!("run trigger task aborted: {error}"),
                    }
                }
            });
        let aggregate = TriggeredWorkspaces::from_outcomes(outcomes);
        info!(
            executed = aggregate.executed.len(),
            errored = aggregate.errored.len(),
            "run trigger batch finished"
        );
        aggregate
    }
}

async fn trigger_one(
    executor: Arc<dyn RunExecutor>,
    request: TriggerRequest,
    timeout: Option<Duration>,
) -> TriggerOutcome {
    let call = executor.trigger_run(&request);
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "run trigger timed out after {}ms",
                limit.as_millis()
            )),
        },
        None => call.await,
    };

    match result {
        Ok(receipt) => {
            info!(
                workspace = request.workspace.as_str(),
                action = request.action.as_str(),
                run_id = receipt.run_id.as_str(),
                "run triggered"
            );
            TriggerOutcome::Executed {
                workspace: request.workspace,
                run_id: receipt.run_id,
            }
        }
        Err(error) => {
            warn!(
                workspace = request.workspace.as_str(),
                action = request.action.as_str(),
                error = %format!("{error:#}"),
                "run trigger failed"
            );
            TriggerOutcome::Errored {
                workspace: request.workspace,
                error: format!("{error:#}"),
            }
        }
    }
}
