use std::sync::Arc;

use thiserror::Error;
use tfops_access::AccessGate;
use tfops_commands::{CommandParser, CommentCommand};
use tfops_contract::{InboundEvent, MergeRequestEvent, NoteEvent, ReviewThreadRef, ReviewThreads};
use tfops_trigger::{
    render_event_failure_comment, render_outcome_comment, TriggerConfig, TriggerFactory,
    TriggerOrigin,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
/// Furthest stage an event reached.
pub enum PipelineStage {
    Received,
    Gated,
    Parsed,
    Resolved,
    Triggered,
    Reported,
    Acknowledged,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Gated => "gated",
            Self::Parsed => "parsed",
            Self::Resolved => "resolved",
            Self::Triggered => "triggered",
            Self::Reported => "reported",
            Self::Acknowledged => "acknowledged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// How an event finished. Every disposition is acknowledged.
pub enum EventDisposition {
    GatedOut,
    NotACommand,
    Ignored {
        reason: String,
    },
    Completed {
        executed: Vec<String>,
        errored: Vec<String>,
        commented: bool,
    },
    /// The event failed before any workspace was triggered.
    Failed {
        error: String,
        reported: bool,
    },
}

impl EventDisposition {
    pub fn label(&self) -> &'static str {
        match self {
            Self::GatedOut => "gated_out",
            Self::NotACommand => "not_a_command",
            Self::Ignored { .. } => "ignored",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Transport failures that leave the event unacknowledged for redelivery.
pub enum PipelineError {
    #[error("failed to load merge request {thread}: {message}")]
    MergeRequestLookup {
        thread: ReviewThreadRef,
        message: String,
    },
    #[error("failed to post comment on {thread}: {message}")]
    CommentPost {
        thread: ReviewThreadRef,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of running one event through the pipeline. `project` is always
/// set so the caller can attribute the event even when it failed.
pub struct EventProcessingReport {
    pub project: String,
    pub event_key: String,
    pub stage: PipelineStage,
    pub outcome: Result<EventDisposition, PipelineError>,
}

impl EventProcessingReport {
    pub fn should_acknowledge(&self) -> bool {
        self.outcome.is_ok()
    }
}

struct Resolved {
    source_branch: String,
    target_branch: String,
    source_revision: String,
}

#[derive(Clone)]
/// Gate, parse, trigger and report for a single inbound event.
pub struct EventPipeline {
    gate: AccessGate,
    parser: CommandParser,
    threads: Arc<dyn ReviewThreads>,
    triggers: Arc<dyn TriggerFactory>,
}

impl EventPipeline {
    pub fn new(
        gate: AccessGate,
        parser: CommandParser,
        threads: Arc<dyn ReviewThreads>,
        triggers: Arc<dyn TriggerFactory>,
    ) -> Self {
        Self {
            gate,
            parser,
            threads,
            triggers,
        }
    }

    pub async fn process(&self, event: &InboundEvent) -> EventProcessingReport {
        let mut report = EventProcessingReport {
            project: event.project().to_string(),
            event_key: event.event_key(),
            stage: PipelineStage::Received,
            outcome: Ok(EventDisposition::GatedOut),
        };
        debug!(
            project = report.project.as_str(),
            event_key = report.event_key.as_str(),
            kind = event.kind(),
            "event received"
        );

        if !self.gate.is_allowed(event.project()) {
            return report;
        }
        report.stage = PipelineStage::Gated;

        report.outcome = match event {
            InboundEvent::Note(note) => self.process_note(note, &mut report.stage).await,
            InboundEvent::MergeRequest(change) => {
                self.process_merge_request(change, &mut report.stage).await
            }
        };
        match &report.outcome {
            Ok(disposition) => debug!(
                project = report.project.as_str(),
                stage = report.stage.as_str(),
                disposition = disposition.label(),
                "event processed"
            ),
            Err(error) => warn!(
                project = report.project.as_str(),
                stage = report.stage.as_str(),
                %error,
                "event processing hit a transport failure"
            ),
        }
        report
    }

    async fn process_note(
        &self,
        note: &NoteEvent,
        stage: &mut PipelineStage,
    ) -> Result<EventDisposition, PipelineError> {
        let command = match self.parser.parse(&note.note) {
            Ok(command) => command,
            Err(error) if error.is_not_a_command() => {
                debug!(project = note.project.as_str(), "comment is not a command");
                return Ok(EventDisposition::NotACommand);
            }
            Err(error) => {
                info!(
                    project = note.project.as_str(),
                    merge_request_iid = note.merge_request_iid,
                    reason_code = error.reason_code(),
                    %error,
                    "ignoring malformed command"
                );
                return Ok(EventDisposition::Ignored {
                    reason: error.reason_code().to_string(),
                });
            }
        };
        *stage = PipelineStage::Parsed;

        let thread = ReviewThreadRef::new(&note.project, note.merge_request_iid);
        let resolved = self
            .complete_merge_request(
                &thread,
                note.source_branch.as_deref(),
                note.target_branch.as_deref(),
                note.last_commit.as_deref(),
            )
            .await?;
        self.run(thread, command, resolved, TriggerOrigin::Comment, stage)
            .await
    }

    async fn process_merge_request(
        &self,
        change: &MergeRequestEvent,
        stage: &mut PipelineStage,
    ) -> Result<EventDisposition, PipelineError> {
        if !change.action.triggers_plan() {
            debug!(
                project = change.project.as_str(),
                action = change.action.as_str(),
                "merge request action does not plan"
            );
            return Ok(EventDisposition::Ignored {
                reason: format!("merge_request_{}", change.action.as_str()),
            });
        }
        let command = CommentCommand::auto_plan(self.parser.primary_agent());
        *stage = PipelineStage::Parsed;

        let thread = ReviewThreadRef::new(&change.project, change.merge_request_iid);
        let resolved = self
            .complete_merge_request(
                &thread,
                change.source_branch.as_deref(),
                change.target_branch.as_deref(),
                change.last_commit.as_deref(),
            )
            .await?;
        self.run(
            thread,
            command,
            resolved,
            TriggerOrigin::MergeRequestEvent,
            stage,
        )
        .await
    }

    /// Fills branch and revision data the event did not carry.
    async fn complete_merge_request(
        &self,
        thread: &ReviewThreadRef,
        source_branch: Option<&str>,
        target_branch: Option<&str>,
        last_commit: Option<&str>,
    ) -> Result<Resolved, PipelineError> {
        if let (Some(source), Some(target), Some(commit)) = (source_branch, target_branch, last_commit)
        {
            return Ok(Resolved {
                source_branch: source.to_string(),
                target_branch: target.to_string(),
                source_revision: commit.to_string(),
            });
        }
        let info = self.threads.merge_request(thread).await.map_err(|error| {
            PipelineError::MergeRequestLookup {
                thread: thread.clone(),
                message: format!("{error:#}"),
            }
        })?;
        Ok(Resolved {
            source_branch: source_branch.map_or(info.source_branch, str::to_string),
            target_branch: target_branch.map_or(info.target_branch, str::to_string),
            source_revision: last_commit.map_or(info.latest_commit, str::to_string),
        })
    }

    async fn run(
        &self,
        thread: ReviewThreadRef,
        command: CommentCommand,
        resolved: Resolved,
        origin: TriggerOrigin,
        stage: &mut PipelineStage,
    ) -> Result<EventDisposition, PipelineError> {
        let agent = command.agent.clone();
        let action = command.action;
        let config = TriggerConfig::from_command(
            thread.clone(),
            command,
            resolved.source_branch,
            resolved.target_branch,
            resolved.source_revision,
            origin,
        );

        let trigger = match self.triggers.create(config) {
            Ok(trigger) => trigger,
            Err(error) => {
                let error = format!("{error:#}");
                warn!(
                    project = thread.project.as_str(),
                    merge_request_iid = thread.merge_request_iid,
                    origin = origin.as_str(),
                    error = error.as_str(),
                    "no trigger for event"
                );
                // Automatic plans stay quiet for projects this deployment
                // does not manage.
                if origin == TriggerOrigin::MergeRequestEvent {
                    return Ok(EventDisposition::Failed {
                        error,
                        reported: false,
                    });
                }
                let body = render_event_failure_comment(&agent, action, &error);
                self.post(&thread, &body).await?;
                *stage = PipelineStage::Reported;
                return Ok(EventDisposition::Failed {
                    error,
                    reported: true,
                });
            }
        };

        let outcome = match trigger.trigger_all_workspaces().await {
            Ok(outcome) => outcome,
            Err(error) => {
                let error = format!("{error:#}");
                warn!(
                    project = thread.project.as_str(),
                    merge_request_iid = thread.merge_request_iid,
                    action = action.as_str(),
                    error = error.as_str(),
                    "workspace resolution failed"
                );
                *stage = PipelineStage::Resolved;
                let body = render_event_failure_comment(&agent, action, &error);
                self.post(&thread, &body).await?;
                *stage = PipelineStage::Reported;
                return Ok(EventDisposition::Failed {
                    error,
                    reported: true,
                });
            }
        };
        *stage = PipelineStage::Triggered;
        info!(
            project = thread.project.as_str(),
            merge_request_iid = thread.merge_request_iid,
            action = action.as_str(),
            executed = outcome.executed.len(),
            errored = outcome.errored.len(),
            "workspaces triggered"
        );

        let commented = match render_outcome_comment(&thread.project, &outcome) {
            Some(body) => {
                self.post(&thread, &body).await?;
                true
            }
            None => false,
        };
        *stage = PipelineStage::Reported;
        Ok(EventDisposition::Completed {
            executed: outcome.executed,
            errored: outcome
                .errored
                .into_iter()
                .map(|entry| entry.name)
                .collect(),
            commented,
        })
    }

    async fn post(&self, thread: &ReviewThreadRef, body: &str) -> Result<(), PipelineError> {
        self.threads
            .post_comment(thread, body)
            .await
            .map_err(|error| PipelineError::CommentPost {
                thread: thread.clone(),
                message: format!("{error:#}"),
            })
    }
}
