use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use thiserror::Error;

mod compose;
mod config;
mod engine;
mod ingest;
mod logging;
mod mapping;
mod migrate;
mod pacing;
mod remote;
mod repo_name;

use config::MigrationConfig;
use pacing::{Gate, PacingLimits};
use remote::github::GithubTracker;
use repo_name::RepoName;

#[derive(Parser)]
#[command(version, about = "Migrate Trac tickets to GitHub issues with matching numbers")]
struct Args {
    /// Log more; repeat for even more
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Also write JSON logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create issues, milestones and comments for exported Trac tickets
    Migrate {
        /// TOML file describing the migration
        config: PathBuf,
        /// Change the remote; without this the run only reports what it would do
        #[arg(long)]
        commit: bool,
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// Summarize what a repository already holds
    Snapshot {
        /// owner/name
        #[arg(long)]
        repo: RepoName,
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Remote(#[from] remote::RemoteError),
    #[error(transparent)]
    Aborted(#[from] migrate::Aborted),
}

async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn migrate_command(config: PathBuf, commit: bool, token: Option<String>) -> Result<(), CliError> {
    let config = MigrationConfig::load(&config, token, commit)?;
    let tracker = GithubTracker::connect(config.repo.clone(), Some(config.token.clone()))?;
    migrate::run(tracker, &config, Box::new(compose::Verbatim), interrupted()).await?;
    Ok(())
}

async fn snapshot_command(repo: RepoName, token: Option<String>) -> Result<(), CliError> {
    let mut gate = Gate::new(GithubTracker::connect(repo.clone(), token)?, &PacingLimits::default());
    let snapshot = gate.snapshot().await?;
    let budget = gate.rate_budget().await?;

    let closed = snapshot
        .issues
        .iter()
        .filter(|i| i.state == remote::IssueState::Closed)
        .count();
    println!("{repo}");
    println!(
        "  issues: {} ({} closed), last #{}",
        snapshot.issues.len(),
        closed,
        snapshot.issues.last_number()
    );
    let mut milestones: Vec<_> = snapshot.milestones.values().collect();
    milestones.sort_by_key(|m| m.number);
    for milestone in milestones {
        println!("  milestone {}: {}", milestone.number, milestone.title);
    }
    let labels: Vec<&str> = snapshot.labels.iter().map(String::as_str).collect();
    println!("  labels: {}", labels.join(", "));
    println!(
        "  requests left: {} until {}",
        budget.remaining,
        budget.reset.with_timezone(&chrono::Local).format("%H:%M:%S")
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = logging::init_logging(args.verbose, args.quiet, args.log_file.as_deref()) {
        eprintln!("Failed: {e}");
        return ExitCode::FAILURE;
    }
    let result = match args.command {
        Command::Migrate {
            config,
            commit,
            token,
        } => migrate_command(config, commit, token).await,
        Command::Snapshot { repo, token } => snapshot_command(repo, token).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
