use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ReviewThreadRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Comment posted on a merge request.
pub struct NoteEvent {
    pub project: String,
    pub merge_request_iid: u64,
    pub note: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub source_branch: Option<String>,
    #[serde(default)]
    pub target_branch: Option<String>,
    #[serde(default)]
    pub last_commit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates merge-request state actions delivered by the review host.
pub enum MergeRequestAction {
    Open,
    Reopen,
    Update,
    Merge,
    Close,
    #[serde(other)]
    Other,
}

impl MergeRequestAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Reopen => "reopen",
            Self::Update => "update",
            Self::Merge => "merge",
            Self::Close => "close",
            Self::Other => "other",
        }
    }

    /// Returns true for actions that put new code up for review.
    pub fn triggers_plan(self) -> bool {
        matches!(self, Self::Open | Self::Reopen | Self::Update)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Merge-request state change.
pub struct MergeRequestEvent {
    pub project: String,
    pub merge_request_iid: u64,
    pub action: MergeRequestAction,
    #[serde(default)]
    pub source_branch: Option<String>,
    #[serde(default)]
    pub target_branch: Option<String>,
    #[serde(default)]
    pub last_commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Durable unit consumed from the event queue.
pub enum InboundEvent {
    Note(NoteEvent),
    MergeRequest(MergeRequestEvent),
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Note(_) => "note",
            Self::MergeRequest(_) => "merge_request",
        }
    }

    pub fn project(&self) -> &str {
        match self {
            Self::Note(event) => &event.project,
            Self::MergeRequest(event) => &event.project,
        }
    }

    pub fn thread(&self) -> ReviewThreadRef {
        match self {
            Self::Note(event) => ReviewThreadRef::new(&event.project, event.merge_request_iid),
            Self::MergeRequest(event) => {
                ReviewThreadRef::new(&event.project, event.merge_request_iid)
            }
        }
    }

    /// Stable identifier derived from the canonical JSON payload.
    pub fn event_key(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = format!("{:x}", Sha256::digest(&canonical));
        format!("{}-{}", self.kind(), &digest[..16])
    }
}
