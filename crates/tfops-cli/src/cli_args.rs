use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "tfops",
    about = "Runs Terraform Cloud plans and applies from merge request comments",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "TFOPS_CONFIG",
        default_value = "tfops.toml",
        help = "Path to the TOML configuration file."
    )]
    pub config: PathBuf,

    #[arg(
        long = "allowed-namespaces",
        env = "TFOPS_ALLOWED_NAMESPACES",
        help = "Comma-separated namespace prefixes. Overrides access.allowed_namespaces from the config file."
    )]
    pub allowed_namespaces: Option<String>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Consume queued events until interrupted.
    Worker(WorkerArgs),
    /// Publish one JSON event file into the spool queue.
    Enqueue(EnqueueArgs),
    /// Print the workspaces a revision range touches, one per line.
    Resolve(ResolveArgs),
}

#[derive(Debug, Args)]
pub struct WorkerArgs {
    #[arg(long, env = "GITLAB_TOKEN", hide_env_values = true)]
    pub gitlab_token: String,

    #[arg(long, env = "TFC_TOKEN", hide_env_values = true)]
    pub tfc_token: String,

    #[arg(
        long,
        env = "TFOPS_WORKERS",
        value_parser = parse_positive_usize,
        help = "Overrides queue.workers from the config file."
    )]
    pub workers: Option<usize>,
}

#[derive(Debug, Args)]
pub struct EnqueueArgs {
    /// Event payload (`{"kind": "note", ...}` or `{"kind": "merge_request", ...}`).
    pub event: PathBuf,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    #[arg(long, help = "Project path as configured under [[projects]].")]
    pub project: String,

    #[arg(long, help = "Target-side revision (usually the target branch).")]
    pub from: String,

    #[arg(long, help = "Source-side revision (usually the merge request head).")]
    pub to: String,

    #[arg(short = 'w', long)]
    pub workspace: Option<String>,

    #[arg(long, help = "Fetch the named branch from the remote before diffing.")]
    pub fetch: Vec<String>,
}
