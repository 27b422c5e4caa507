use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tfops_access::AccessGate;
use tfops_commands::{CommandParser, CommentCommand};
use tfops_contract::{InboundEvent, RunAction};
use tfops_events::{EventConsumer, EventPipeline, EventQueue, SpoolEventQueue};
use tfops_gitlab::GitlabClient;
use tfops_tfc::TfcClient;
use tfops_trigger::{
    resolve_workspaces, OrchestratorConfig, ProjectTriggerFactory, ProjectWorkspaces,
};
use tfops_vcs::{changed_files, GitCliRepository, SourceControl};
use tracing::{info, warn};

use crate::bootstrap_helpers::shutdown_on_ctrl_c;
use crate::cli_args::{Cli, CliCommand, EnqueueArgs, ResolveArgs, WorkerArgs};
use crate::config::{ProjectConfig, TfopsConfig};

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let mut config = TfopsConfig::load(&cli.config)?;
    if let Some(raw) = cli.allowed_namespaces.as_deref() {
        config.override_allowed_namespaces(raw);
    }
    match cli.command {
        CliCommand::Worker(args) => run_worker(config, args).await,
        CliCommand::Enqueue(args) => {
            let id = enqueue_event(&config, &args).await?;
            println!("{id}");
            Ok(())
        }
        CliCommand::Resolve(args) => {
            for workspace in resolve_command(&config, &args).await? {
                println!("{workspace}");
            }
            Ok(())
        }
    }
}

async fn run_worker(mut config: TfopsConfig, args: WorkerArgs) -> Result<()> {
    if let Some(workers) = args.workers {
        config.queue.workers = workers;
    }
    config.validate()?;
    let consumer = build_consumer(&config, &args.gitlab_token, &args.tfc_token).await?;
    info!(
        projects = config.projects.len(),
        workers = config.queue.workers,
        spool_dir = %config.queue.spool_dir.display(),
        "tfops worker starting"
    );
    consumer.run(shutdown_on_ctrl_c()).await
}

async fn build_consumer(
    config: &TfopsConfig,
    gitlab_token: &str,
    tfc_token: &str,
) -> Result<EventConsumer> {
    if config.access.allowed_namespaces.is_empty() {
        warn!("access.allowed_namespaces is empty; every event will be gated out");
    }
    let gate = AccessGate::new(config.access.allowed_namespaces.clone());
    let parser = CommandParser::new(config.access.agents.iter().cloned());

    let gitlab = GitlabClient::new(
        &config.gitlab.api_base,
        gitlab_token,
        config.gitlab.request_timeout_ms,
        config.gitlab.retry_max_attempts,
        config.gitlab.retry_base_delay_ms,
    )?;
    let tfc = TfcClient::new(
        &config.tfc.api_base,
        tfc_token,
        &config.tfc.organization,
        config.tfc.request_timeout_ms,
    )?;

    let orchestrator_config = OrchestratorConfig {
        request_timeout: config.tfc.trigger_timeout_ms.map(Duration::from_millis),
    };
    let mut factory = ProjectTriggerFactory::new(Arc::new(tfc), orchestrator_config);
    for project in &config.projects {
        factory = factory.with_project(project.path.clone(), project_workspaces(project));
    }

    let pipeline = EventPipeline::new(gate, parser, Arc::new(gitlab), Arc::new(factory));
    let queue = open_queue(&config.queue.spool_dir).await?;
    Ok(EventConsumer::new(
        queue,
        Arc::new(pipeline),
        config.queue.consumer_config(),
    ))
}

fn project_repository(project: &ProjectConfig) -> GitCliRepository {
    GitCliRepository::new(&project.repo_path).with_remote(project.remote.clone())
}

fn project_workspaces(project: &ProjectConfig) -> ProjectWorkspaces {
    ProjectWorkspaces::new(
        Arc::new(project_repository(project)),
        Arc::new(project.workspaces.clone()),
    )
}

async fn open_queue(spool_dir: &Path) -> Result<Arc<dyn EventQueue>> {
    let queue = SpoolEventQueue::open(spool_dir)
        .await
        .with_context(|| format!("failed to open spool {}", spool_dir.display()))?;
    Ok(Arc::new(queue))
}

async fn enqueue_event(config: &TfopsConfig, args: &EnqueueArgs) -> Result<String> {
    let raw = tokio::fs::read_to_string(&args.event)
        .await
        .with_context(|| format!("failed to read event {}", args.event.display()))?;
    let event: InboundEvent = serde_json::from_str(&raw)
        .with_context(|| format!("invalid event payload {}", args.event.display()))?;
    let queue = open_queue(&config.queue.spool_dir).await?;
    let id = queue.publish(event).await?;
    info!(delivery_id = id.as_str(), "event enqueued");
    Ok(id)
}

async fn resolve_command(config: &TfopsConfig, args: &ResolveArgs) -> Result<Vec<String>> {
    let project = config
        .project(&args.project)
        .ok_or_else(|| anyhow!("project '{}' is not configured", args.project))?;
    let repository = project_repository(project);
    for branch in &args.fetch {
        repository
            .fetch(branch)
            .await
            .with_context(|| format!("failed to fetch '{branch}'"))?;
    }

    let command = CommentCommand {
        agent: String::new(),
        action: RunAction::Plan,
        workspace: args.workspace.clone(),
        trailing_args: Vec::new(),
    };
    let workspaces = resolve_workspaces(&command, &project.workspaces, || {
        changed_files(&repository, &args.from, &args.to)
    })
    .await
    .with_context(|| format!("failed to resolve workspaces between {} and {}", args.from, args.to))?;
    Ok(workspaces.into_iter().collect())
}
