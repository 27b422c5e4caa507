use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tfops_contract::{
    InboundEvent, MergeRequestAction, MergeRequestEvent, MergeRequestInfo, NoteEvent,
    ReviewThreadRef, ReviewThreads,
};
use tfops_trigger::{Trigger, TriggerConfig, TriggerFactory, TriggeredWorkspaces};

pub(crate) const PROJECT: &str = "acme/infra";

pub(crate) fn note_event(body: &str) -> InboundEvent {
    InboundEvent::Note(NoteEvent {
        project: PROJECT.to_string(),
        merge_request_iid: 42,
        note: body.to_string(),
        author: Some("reviewer".to_string()),
        source_branch: Some("feature".to_string()),
        target_branch: Some("main".to_string()),
        last_commit: Some("feature-tip".to_string()),
    })
}

pub(crate) fn merge_request_event(action: MergeRequestAction) -> InboundEvent {
    InboundEvent::MergeRequest(MergeRequestEvent {
        project: PROJECT.to_string(),
        merge_request_iid: 42,
        action,
        source_branch: None,
        target_branch: None,
        last_commit: None,
    })
}

#[derive(Default)]
pub(crate) struct RecordingThreads {
    comments: Mutex<Vec<(ReviewThreadRef, String)>>,
    lookups: AtomicUsize,
    failing_posts: AtomicUsize,
}

impl RecordingThreads {
    /// Fails the next `count` comment posts.
    pub(crate) fn failing_posts(self, count: usize) -> Self {
        self.failing_posts.store(count, Ordering::SeqCst);
        self
    }

    pub(crate) fn comments(&self) -> Vec<(ReviewThreadRef, String)> {
        self.comments.lock().expect("comments lock").clone()
    }

    pub(crate) fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReviewThreads for RecordingThreads {
    async fn post_comment(&self, thread: &ReviewThreadRef, body: &str) -> Result<()> {
        let remaining = self.failing_posts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_posts.store(remaining - 1, Ordering::SeqCst);
            bail!("review host unavailable");
        }
        self.comments
            .lock()
            .expect("comments lock")
            .push((thread.clone(), body.to_string()));
        Ok(())
    }

    async fn merge_request(&self, thread: &ReviewThreadRef) -> Result<MergeRequestInfo> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(MergeRequestInfo {
            iid: thread.merge_request_iid,
            source_branch: "looked-up-feature".to_string(),
            target_branch: "looked-up-main".to_string(),
            latest_commit: "looked-up-sha".to_string(),
        })
    }
}

#[derive(Clone)]
pub(crate) enum ScriptedOutcome {
    Triggered(TriggeredWorkspaces),
    Failed(String),
}

/// Trigger factory returning canned outcomes and recording every config.
pub(crate) struct ScriptedTriggers {
    outcome: ScriptedOutcome,
    unknown_projects: Vec<String>,
    created: Arc<Mutex<Vec<TriggerConfig>>>,
    runs: Arc<AtomicUsize>,
}

impl ScriptedTriggers {
    pub(crate) fn new(outcome: ScriptedOutcome) -> Self {
        Self {
            outcome,
            unknown_projects: Vec::new(),
            created: Arc::new(Mutex::new(Vec::new())),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn succeeding(executed: &[&str]) -> Self {
        Self::new(ScriptedOutcome::Triggered(TriggeredWorkspaces {
            executed: executed.iter().map(|name| name.to_string()).collect(),
            errored: Vec::new(),
        }))
    }

    pub(crate) fn without_project(mut self, project: &str) -> Self {
        self.unknown_projects.push(project.to_string());
        self
    }

    pub(crate) fn created(&self) -> Vec<TriggerConfig> {
        self.created.lock().expect("created lock").clone()
    }

    pub(crate) fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl TriggerFactory for ScriptedTriggers {
    fn create(&self, config: TriggerConfig) -> Result<Box<dyn Trigger>> {
        if self.unknown_projects.iter().any(|p| p == config.project()) {
            bail!("project '{}' is not configured", config.project());
        }
        self.created
            .lock()
            .expect("created lock")
            .push(config.clone());
        Ok(Box::new(ScriptedTrigger {
            config,
            outcome: self.outcome.clone(),
            runs: Arc::clone(&self.runs),
        }))
    }
}

struct ScriptedTrigger {
    config: TriggerConfig,
    outcome: ScriptedOutcome,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Trigger for ScriptedTrigger {
    fn config(&self) -> &TriggerConfig {
        &self.config
    }

    async fn trigger_all_workspaces(&self) -> Result<TriggeredWorkspaces> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            ScriptedOutcome::Triggered(outcome) => Ok(outcome.clone()),
            ScriptedOutcome::Failed(error) => bail!("{error}"),
        }
    }
}
