use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tfops_contract::{truncate_chars, MergeRequestInfo, ReviewThreadRef, ReviewThreads};
use tracing::{debug, warn};

use crate::transport::{
    is_retryable_status, is_retryable_transport_error, parse_retry_after, retry_delay,
};

const RETRY_ATTEMPT_HEADER: &str = "x-tfops-retry-attempt";

#[derive(Debug, Deserialize)]
struct NoteResponse {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct MergeRequestResponse {
    iid: u64,
    source_branch: String,
    target_branch: String,
    sha: Option<String>,
}

#[derive(Clone)]
/// GitLab v4 API client scoped to merge-request notes and metadata.
pub struct GitlabClient {
    http: reqwest::Client,
    api_base: Url,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl GitlabClient {
    pub fn new(
        api_base: &str,
        token: &str,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("tfops-gitlab"),
        );
        headers.insert(
            "private-token",
            reqwest::header::HeaderValue::from_str(token.trim())
                .context("invalid gitlab token header")?,
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create gitlab api client")?;
        let api_base = Url::parse(api_base.trim_end_matches('/'))
            .with_context(|| format!("invalid gitlab api base '{api_base}'"))?;
        if api_base.cannot_be_a_base() {
            bail!("gitlab api base '{api_base}' cannot carry a path");
        }
        Ok(Self {
            http,
            api_base,
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay_ms: retry_base_delay_ms.max(1),
        })
    }

    /// `<base>/projects/<url-encoded path>/merge_requests/<iid>[/<suffix>]`.
    fn merge_request_url(&self, thread: &ReviewThreadRef, suffix: Option<&str>) -> Result<Url> {
        let mut url = self.api_base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("gitlab api base cannot carry a path"))?;
            segments.pop_if_empty();
            segments
                .push("projects")
                .push(&thread.project)
                .push("merge_requests")
                .push(&thread.merge_request_iid.to_string());
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    async fn request_json<T, F>(&self, operation: &str, mut request_builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = request_builder()
                .header(RETRY_ATTEMPT_HEADER, attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<T>()
                            .await
                            .with_context(|| format!("failed to decode gitlab {operation}"));
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts && is_retryable_status(status.as_u16()) {
                        warn!(
                            operation,
                            status = status.as_u16(),
                            attempt,
                            "retrying gitlab request"
                        );
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    bail!(
                        "gitlab api {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_chars(&body, 800)
                    );
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("gitlab api {operation} request failed"));
                }
            }
        }
    }
}

#[async_trait]
impl ReviewThreads for GitlabClient {
    async fn post_comment(&self, thread: &ReviewThreadRef, body: &str) -> Result<()> {
        let url = self.merge_request_url(thread, Some("notes"))?;
        let payload = json!({ "body": body });
        let note: NoteResponse = self
            .request_json("create merge request note", || {
                self.http.post(url.clone()).json(&payload)
            })
            .await?;
        debug!(
            project = thread.project.as_str(),
            merge_request_iid = thread.merge_request_iid,
            note_id = note.id,
            "posted merge request note"
        );
        Ok(())
    }

    async fn merge_request(&self, thread: &ReviewThreadRef) -> Result<MergeRequestInfo> {
        let url = self.merge_request_url(thread, None)?;
        let response: MergeRequestResponse = self
            .request_json("get merge request", || self.http.get(url.clone()))
            .await?;
        let latest_commit = response
            .sha
            .filter(|sha| !sha.trim().is_empty())
            .ok_or_else(|| anyhow!("merge request {thread} has no head commit"))?;
        Ok(MergeRequestInfo {
            iid: response.iid,
            source_branch: response.source_branch,
            target_branch: response.target_branch,
            latest_commit,
        })
    }
}
