use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Identifies one merge-request review thread.
pub struct ReviewThreadRef {
    /// Project path including its namespace, e.g. `acme/service-infra`.
    pub project: String,
    pub merge_request_iid: u64,
}

impl ReviewThreadRef {
    pub fn new(project: impl Into<String>, merge_request_iid: u64) -> Self {
        Self {
            project: project.into(),
            merge_request_iid,
        }
    }
}

impl fmt::Display for ReviewThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.project, self.merge_request_iid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Merge-request metadata fetched from the review system.
pub struct MergeRequestInfo {
    pub iid: u64,
    pub source_branch: String,
    pub target_branch: String,
    pub latest_commit: String,
}

/// Review-thread capability of the version-control host.
#[async_trait]
pub trait ReviewThreads: Send + Sync {
    async fn post_comment(&self, thread: &ReviewThreadRef, body: &str) -> Result<()>;

    async fn merge_request(&self, thread: &ReviewThreadRef) -> Result<MergeRequestInfo>;

    async fn latest_commit(&self, thread: &ReviewThreadRef) -> Result<String> {
        Ok(self.merge_request(thread).await?.latest_commit)
    }

    async fn source_branch(&self, thread: &ReviewThreadRef) -> Result<String> {
        Ok(self.merge_request(thread).await?.source_branch)
    }

    async fn review_id(&self, thread: &ReviewThreadRef) -> Result<u64> {
        Ok(self.merge_request(thread).await?.iid)
    }
}
