use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tfops_access::AllowList;
use tfops_commands::DEFAULT_AGENT;
use tfops_events::{ConsumerConfig, DEFAULT_CONSUMER_GROUP};
use tfops_trigger::WorkspaceDirectory;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
/// Deployment configuration loaded from TOML.
pub(crate) struct TfopsConfig {
    #[serde(default)]
    pub(crate) access: AccessConfig,
    #[serde(default)]
    pub(crate) queue: QueueConfig,
    #[serde(default)]
    pub(crate) gitlab: GitlabConfig,
    pub(crate) tfc: TfcConfig,
    #[serde(default)]
    pub(crate) projects: Vec<ProjectConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct AccessConfig {
    pub(crate) allowed_namespaces: AllowList,
    pub(crate) agents: Vec<String>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            allowed_namespaces: AllowList::default(),
            agents: vec![DEFAULT_AGENT.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct QueueConfig {
    pub(crate) spool_dir: PathBuf,
    pub(crate) consumer_group: String,
    pub(crate) workers: usize,
    pub(crate) poll_interval_ms: u64,
    pub(crate) requeue_interval_ms: u64,
    pub(crate) visibility_timeout_ms: u64,
    pub(crate) max_attempts: u32,
    pub(crate) redelivery_delay_ms: u64,
    pub(crate) redelivery_delay_max_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            spool_dir: PathBuf::from(".tfops/spool"),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            workers: 4,
            poll_interval_ms: 250,
            requeue_interval_ms: 5_000,
            visibility_timeout_ms: 300_000,
            max_attempts: 5,
            redelivery_delay_ms: 5_000,
            redelivery_delay_max_ms: 300_000,
        }
    }
}

impl QueueConfig {
    pub(crate) fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            consumer_group: self.consumer_group.clone(),
            workers: self.workers,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            requeue_interval: Duration::from_millis(self.requeue_interval_ms),
            visibility_timeout: Duration::from_millis(self.visibility_timeout_ms),
            max_attempts: self.max_attempts,
            redelivery_delay_initial: Duration::from_millis(self.redelivery_delay_ms),
            redelivery_delay_max: Duration::from_millis(self.redelivery_delay_max_ms),
            ..ConsumerConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct GitlabConfig {
    pub(crate) api_base: String,
    pub(crate) request_timeout_ms: u64,
    pub(crate) retry_max_attempts: usize,
    pub(crate) retry_base_delay_ms: u64,
}

impl Default for GitlabConfig {
    fn default() -> Self {
        Self {
            api_base: "https://gitlab.com/api/v4".to_string(),
            request_timeout_ms: 10_000,
            retry_max_attempts: 4,
            retry_base_delay_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TfcConfig {
    #[serde(default = "default_tfc_api_base")]
    pub(crate) api_base: String,
    pub(crate) organization: String,
    #[serde(default = "default_tfc_request_timeout_ms")]
    pub(crate) request_timeout_ms: u64,
    /// Upper bound on one run trigger, lookups and retries included.
    #[serde(default)]
    pub(crate) trigger_timeout_ms: Option<u64>,
}

fn default_tfc_api_base() -> String {
    "https://app.terraform.io/api/v2".to_string()
}

fn default_tfc_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
/// One source project: its local clone and workspace mapping.
pub(crate) struct ProjectConfig {
    pub(crate) path: String,
    pub(crate) repo_path: PathBuf,
    #[serde(default = "default_remote")]
    pub(crate) remote: String,
    #[serde(default)]
    pub(crate) workspaces: WorkspaceDirectory,
}

fn default_remote() -> String {
    "origin".to_string()
}

impl TfopsConfig {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub(crate) fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("failed to parse config toml")?;
        Ok(config)
    }

    /// Replaces the allow-list with a comma-separated override.
    pub(crate) fn override_allowed_namespaces(&mut self, raw: &str) {
        self.access.allowed_namespaces = AllowList::from_delimited(raw);
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.queue.consumer_config().validate()?;
        if self.tfc.organization.trim().is_empty() {
            bail!("tfc.organization must not be empty");
        }
        if self.access.agents.iter().all(|agent| agent.trim().is_empty()) {
            bail!("access.agents must name at least one agent");
        }
        let mut seen = HashSet::new();
        for project in &self.projects {
            if project.path.trim().is_empty() {
                bail!("projects entries need a non-empty path");
            }
            if !seen.insert(project.path.as_str()) {
                bail!("project '{}' is configured more than once", project.path);
            }
            if project.workspaces.is_empty() {
                bail!("project '{}' has no workspaces", project.path);
            }
        }
        Ok(())
    }

    pub(crate) fn project(&self, path: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|project| project.path == path)
    }
}
