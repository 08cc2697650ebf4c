//! Sentinel CI — command-line front end of the build engine.
//!
//! `run` checks out a project and executes its pipeline once, printing the
//! build report. `validate` resolves every configured plugin without running
//! anything.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use sentinel_ci::config::CiConfig;
use sentinel_ci::metrics;
use sentinel_ci::models::build::{BuildStatus, NewBuild, PullRequestSource};
use sentinel_ci::services::build_report;
use sentinel_ci::services::build_service::{BuildStore, MemoryBuildStore};
use sentinel_ci::services::command::{ProcessRunner, SystemRunner};
use sentinel_ci::services::executor::{run_executor, Worker};
use sentinel_ci::services::pipeline::registry::PluginRegistry;
use sentinel_ci::services::project_service;
use sentinel_ci::services::tool_locator::PathToolLocator;

#[derive(Parser)]
#[command(name = "sentinel-ci", about = "Sentinel CI build engine")]
struct Cli {
    /// Serve Prometheus metrics on this address
    #[arg(long, env = "CI_METRICS_ADDR", global = true)]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a project once and print the report
    Run {
        /// Project definition (JSON)
        #[arg(short, long, env = "CI_PROJECT_FILE")]
        project: PathBuf,

        /// Branch to build (defaults to the project's default branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// Commit to check out (defaults to the branch head)
        #[arg(short, long, default_value = "")]
        commit: String,

        /// Pull-request source remote to merge into the branch
        #[arg(long, requires = "pr_branch")]
        pr_remote_url: Option<String>,

        /// Pull-request source branch
        #[arg(long, requires = "pr_remote_url")]
        pr_branch: Option<String>,
    },
    /// Check a project's plugin configuration
    Validate {
        #[arg(short, long, env = "CI_PROJECT_FILE")]
        project: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { project } => validate(project).await,
        Command::Run {
            project,
            branch,
            commit,
            pr_remote_url,
            pr_branch,
        } => {
            metrics::init_metrics(cli.metrics_addr);
            let pull_request = pr_remote_url
                .zip(pr_branch)
                .map(|(remote_url, remote_branch)| PullRequestSource {
                    remote_url,
                    remote_branch,
                });
            run(project, branch, commit, pull_request).await
        }
    }
}

async fn validate(path: PathBuf) -> anyhow::Result<ExitCode> {
    let project = project_service::load_project(&path).await?;
    let problems = project_service::validate(&project, &PluginRegistry::with_defaults());
    println!("{}", serde_json::to_string_pretty(&problems)?);
    if problems.is_empty() {
        tracing::info!(project = %project.name, "Pipeline configuration is valid");
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn run(
    path: PathBuf,
    branch: Option<String>,
    commit: String,
    pull_request: Option<PullRequestSource>,
) -> anyhow::Result<ExitCode> {
    let config = CiConfig::from_env();
    anyhow::ensure!(
        config.max_concurrent_builds > 0,
        "CI_MAX_CONCURRENT must be at least 1"
    );
    let registry = Arc::new(PluginRegistry::with_defaults());

    let project = project_service::load_project(&path).await?;
    for problem in project_service::validate(&project, &registry) {
        tracing::warn!(
            stage = %problem.stage,
            plugin = %problem.plugin,
            "Plugin misconfigured: {}",
            problem.error
        );
    }

    tracing::info!(project = %project.name, vcs = %project.vcs, "Starting Sentinel CI build...");

    let store = Arc::new(MemoryBuildStore::new());
    let branch = branch.unwrap_or_else(|| project.default_branch.clone());
    let project_id = project.id;
    store.insert_project(project).await;
    let build = store
        .enqueue(NewBuild {
            project_id,
            commit_id: commit,
            branch,
            pull_request,
        })
        .await?;

    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);
    let tools = Arc::new(PathToolLocator::from_env(&config.tool_path));
    let workers = Worker::pool(&config, store.clone(), registry, runner, tools);

    let shutdown = CancellationToken::new();
    let executor = tokio::spawn(run_executor(
        workers,
        store.clone(),
        config.clone(),
        shutdown.clone(),
    ));

    let build_id = build.id;
    let canceller = {
        let store = store.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            if let Err(e) = store.request_cancel(build_id).await {
                tracing::error!("Could not cancel build {build_id}: {e}");
            }
        })
    };

    let status = loop {
        match store.get(build_id).await? {
            Some(build) if build.is_terminal() => break build.status,
            Some(_) => tokio::time::sleep(Duration::from_millis(250)).await,
            None => anyhow::bail!("build {build_id} disappeared from the queue"),
        }
    };

    canceller.abort();
    shutdown.cancel();
    executor.await?;

    let report = build_report::get_build(store.as_ref(), build_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("build {build_id} not found"))?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    tracing::info!("Shutdown complete");
    Ok(if status == BuildStatus::Success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, cancelling build..."),
        _ = terminate => tracing::info!("Received SIGTERM, cancelling build..."),
    }
}
