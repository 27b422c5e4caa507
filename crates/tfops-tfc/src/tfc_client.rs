use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tfops_contract::{truncate_chars, RunAction, RunExecutor, RunReceipt, TriggerRequest};
use tracing::{debug, warn};

use crate::run_arguments::parse_run_arguments;
use crate::transport::{
    is_retryable_run_creation_status, is_retryable_status, parse_retry_after, retry_delay,
};

const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";
const RETRY_ATTEMPT_HEADER: &str = "x-tfops-retry-attempt";

#[derive(Debug, Serialize, Deserialize)]
struct Document<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Resource {
    id: String,
}

#[derive(Debug, Serialize)]
struct RunCreateDocument<'a> {
    data: RunCreateData<'a>,
}

#[derive(Debug, Serialize)]
struct RunCreateData<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    attributes: RunCreateAttributes,
    relationships: RunRelationships<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct RunCreateAttributes {
    message: String,
    plan_only: bool,
    auto_apply: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    target_addrs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    replace_addrs: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RunRelationships<'a> {
    workspace: Document<ResourceRef<'a>>,
}

#[derive(Debug, Serialize)]
struct ResourceRef<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: &'a str,
}

#[derive(Clone)]
/// Terraform Cloud API client that starts one run per trigger request.
pub struct TfcClient {
    http: reqwest::Client,
    api_base: Url,
    organization: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl TfcClient {
    pub fn new(
        api_base: &str,
        token: &str,
        organization: &str,
        request_timeout_ms: u64,
    ) -> Result<Self> {
        if organization.trim().is_empty() {
            bail!("terraform cloud organization must not be empty");
        }
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("tfops-tfc"),
        );
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static(JSON_API_CONTENT_TYPE),
        );
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .context("invalid terraform cloud authorization header")?,
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create terraform cloud api client")?;
        let api_base = Url::parse(api_base.trim_end_matches('/'))
            .with_context(|| format!("invalid terraform cloud api base '{api_base}'"))?;
        if api_base.cannot_be_a_base() {
            bail!("terraform cloud api base '{api_base}' cannot carry a path");
        }
        Ok(Self {
            http,
            api_base,
            organization: organization.trim().to_string(),
            retry_max_attempts: 3,
            retry_base_delay_ms: 250,
        })
    }

    pub fn with_retry(mut self, max_attempts: usize, base_delay_ms: u64) -> Self {
        self.retry_max_attempts = max_attempts.max(1);
        self.retry_base_delay_ms = base_delay_ms.max(1);
        self
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("terraform cloud api base cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn workspace_id(&self, workspace: &str) -> Result<String> {
        let url = self.url(&["organizations", &self.organization, "workspaces", workspace])?;
        let document: Document<Resource> = self
            .request_json("workspace lookup", is_retryable_status, || {
                self.http.get(url.clone())
            })
            .await
            .with_context(|| format!("workspace '{workspace}' is not available"))?;
        Ok(document.data.id)
    }

    async fn create_run(&self, workspace_id: &str, request: &TriggerRequest) -> Result<String> {
        let arguments = parse_run_arguments(&request.extra_args)?;
        let document = RunCreateDocument {
            data: RunCreateData {
                kind: "runs",
                attributes: RunCreateAttributes {
                    message: run_message(request),
                    plan_only: request.action == RunAction::Plan,
                    auto_apply: request.action == RunAction::Apply,
                    target_addrs: arguments.target_addrs,
                    replace_addrs: arguments.replace_addrs,
                },
                relationships: RunRelationships {
                    workspace: Document {
                        data: ResourceRef {
                            kind: "workspaces",
                            id: workspace_id,
                        },
                    },
                },
            },
        };
        let payload = serde_json::to_vec(&document).context("failed to encode run request")?;
        let url = self.url(&["runs"])?;
        let created: Document<Resource> = self
            .request_json("create run", is_retryable_run_creation_status, || {
                self.http.post(url.clone()).body(payload.clone())
            })
            .await?;
        Ok(created.data.id)
    }

    async fn request_json<T, F>(
        &self,
        operation: &str,
        retryable: fn(u16) -> bool,
        mut request_builder: F,
    ) -> Result<T>
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
                        return response.json::<T>().await.with_context(|| {
                            format!("failed to decode terraform cloud {operation}")
                        });
                    }
                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts && retryable(status.as_u16()) {
                        warn!(
                            operation,
                            status = status.as_u16(),
                            attempt,
                            "retrying terraform cloud request"
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
                        "terraform cloud {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_chars(&body, 400)
                    );
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && error.is_connect() {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("terraform cloud {operation} request failed"));
                }
            }
        }
    }
}

#[async_trait]
impl RunExecutor for TfcClient {
    async fn trigger_run(&self, request: &TriggerRequest) -> Result<RunReceipt> {
        // Reject unsupported arguments before touching the API.
        parse_run_arguments(&request.extra_args)?;
        let workspace_id = self.workspace_id(&request.workspace).await?;
        let run_id = self.create_run(&workspace_id, request).await?;
        debug!(
            workspace = request.workspace.as_str(),
            workspace_id = workspace_id.as_str(),
            run_id = run_id.as_str(),
            "terraform cloud run created"
        );
        Ok(RunReceipt { run_id })
    }
}

fn run_message(request: &TriggerRequest) -> String {
    format!(
        "{} triggered from merge request {} (source {}, target {})",
        request.action, request.merge_request, request.source_revision, request.target_revision
    )
}
