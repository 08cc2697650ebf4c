//! Build executor — workers that claim pending builds and run them.
//!
//! Each worker owns one build at a time: claim, checkout, pipeline, final
//! status. Whatever happens in between, the claimed build is driven to a
//! terminal status before the worker looks at the queue again.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::CiConfig;
use crate::error::{CheckoutError, WorkerError};
use crate::models::build::{Build, BuildStatus};
use crate::models::build_error::{Diagnostic, Severity};
use crate::services::build_service::BuildStore;
use crate::services::checkout::Checkout;
use crate::services::command::ProcessRunner;
use crate::services::error_service::ErrorCollector;
use crate::services::pipeline::registry::PluginRegistry;
use crate::services::pipeline::{PipelineOutcome, PipelineRunner};
use crate::services::tool_locator::ToolLocator;

pub struct Worker {
    id: String,
    config: CiConfig,
    store: Arc<dyn BuildStore>,
    runner: Arc<dyn ProcessRunner>,
    collector: ErrorCollector,
    pipeline: PipelineRunner,
    active: Arc<AtomicUsize>,
}

impl Worker {
    /// One worker per concurrent build slot, sharing store and tooling.
    pub fn pool(
        config: &CiConfig,
        store: Arc<dyn BuildStore>,
        registry: Arc<PluginRegistry>,
        runner: Arc<dyn ProcessRunner>,
        tools: Arc<dyn ToolLocator>,
    ) -> Vec<Worker> {
        let active = Arc::new(AtomicUsize::new(0));
        (0..config.max_concurrent_builds)
            .map(|slot| {
                let mut worker = Worker::new(
                    config.clone(),
                    store.clone(),
                    registry.clone(),
                    runner.clone(),
                    tools.clone(),
                );
                worker.id = format!("{}-{slot}", config.worker_id);
                worker.active = active.clone();
                worker
            })
            .collect()
    }

    pub fn new(
        config: CiConfig,
        store: Arc<dyn BuildStore>,
        registry: Arc<PluginRegistry>,
        runner: Arc<dyn ProcessRunner>,
        tools: Arc<dyn ToolLocator>,
    ) -> Self {
        let collector = ErrorCollector::new(store.clone());
        let pipeline = PipelineRunner::new(
            registry,
            runner.clone(),
            tools,
            collector.clone(),
            config.plugin_timeout(),
        );
        Self {
            id: config.worker_id.clone(),
            config,
            store,
            runner,
            collector,
            pipeline,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Claim the oldest pending build and run it. `Ok(None)` when the
    /// queue is empty.
    pub async fn poll_and_execute(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Option<Build>, WorkerError> {
        let Some(build) = self.store.claim_next(&self.id).await? else {
            return Ok(None);
        };
        self.execute(build, shutdown).await.map(Some)
    }

    /// Run an already claimed build to a terminal status and persist it.
    pub async fn execute(
        &self,
        mut build: Build,
        shutdown: &CancellationToken,
    ) -> Result<Build, WorkerError> {
        tracing::info!(
            build_id = build.id,
            project_id = build.project_id,
            branch = %build.branch,
            worker = %self.id,
            "Executing build"
        );
        crate::metrics::active_builds(self.active.fetch_add(1, Ordering::SeqCst) + 1);
        let build_start = Instant::now();

        let cancel = shutdown.child_token();
        let watcher = tokio::spawn(watch_cancellation(
            self.store.clone(),
            build.id,
            self.config.poll_interval(),
            cancel.clone(),
        ));

        let result = self.run_build(&mut build, &cancel).await;
        watcher.abort();

        let status = match result {
            Ok(PipelineOutcome::Success) => BuildStatus::Success,
            Ok(PipelineOutcome::Failed) => BuildStatus::Failed,
            Ok(PipelineOutcome::Cancelled) => {
                build.log_line("Build cancelled");
                self.record_fault(&mut build, "worker", "Build cancelled").await;
                BuildStatus::Failed
            }
            Err(e) => {
                tracing::error!(build_id = build.id, error = %e, "Build aborted");
                build.log_line(&crate::logging::redact(&e.to_string()));
                self.record_fault(&mut build, e.origin(), &e.to_string()).await;
                BuildStatus::Error
            }
        };

        let finished = self.finish_build(&mut build, status, build_start).await;
        crate::metrics::active_builds(self.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1));
        finished.map(|_| build)
    }

    async fn run_build(
        &self,
        build: &mut Build,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, WorkerError> {
        let project = self.store.project(build.project_id).await?;
        let target = self.config.workspace_dir.join(build.id.to_string());
        remove_dir(&target).await?;

        let checkout = Checkout::new(self.runner.as_ref(), self.config.checkout_timeout(), cancel);
        let working_copy = match checkout.create_working_copy(&project, build, &target).await {
            Ok(wc) => wc,
            Err(CheckoutError::Cancelled) => {
                self.cleanup(&target).await;
                return Ok(PipelineOutcome::Cancelled);
            }
            Err(e) => {
                self.cleanup(&target).await;
                return Err(e.into());
            }
        };
        if build.commit_id.trim().is_empty() && !working_copy.commit.is_empty() {
            build.commit_id = working_copy.commit.clone();
        }
        for line in &working_copy.log {
            build.log_line(&format!("$ {line}"));
        }
        build.log_line(&format!(
            "Working copy ready ({} via {:?}) at {}",
            working_copy.commit,
            working_copy.method,
            working_copy.path.display()
        ));
        let outcome = match self.store.update(build).await {
            Ok(()) => self.pipeline.run(&project, build, &working_copy, cancel).await,
            Err(e) => Err(e.into()),
        };
        self.cleanup(&target).await;
        outcome
    }

    /// Synthetic BuildError describing an infrastructure fault.
    async fn record_fault(&self, build: &mut Build, origin: &str, message: &str) {
        let diagnostic = Diagnostic::new(crate::logging::redact(message), Severity::Critical);
        if let Err(e) = self.collector.record(build, origin, vec![diagnostic]).await {
            tracing::warn!(build_id = build.id, error = %e, "Could not record build fault");
        }
    }

    async fn finish_build(
        &self,
        build: &mut Build,
        status: BuildStatus,
        start: Instant,
    ) -> Result<(), WorkerError> {
        build.finish(status, Utc::now())?;
        self.store.update(build).await?;

        let duration = start.elapsed().as_millis() as u64;
        crate::metrics::build_status_changed(status);
        crate::metrics::build_duration(duration);

        tracing::info!(
            build_id = build.id,
            status = %status,
            errors = build.error_count,
            duration_ms = duration,
            "Build finished"
        );
        Ok(())
    }

    async fn cleanup(&self, path: &Path) {
        if self.config.keep_working_copy {
            return;
        }
        if let Err(e) = remove_dir(path).await {
            tracing::warn!(path = %path.display(), error = %e, "Could not remove working copy");
        }
    }
}

async fn remove_dir(path: &Path) -> Result<(), WorkerError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(WorkerError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Trip `cancel` once the store reports a cancellation request.
async fn watch_cancellation(
    store: Arc<dyn BuildStore>,
    build_id: i64,
    every: std::time::Duration,
    cancel: CancellationToken,
) {
    loop {
        match store.cancel_requested(build_id).await {
            Ok(true) => {
                tracing::info!(build_id, "Cancelling build");
                cancel.cancel();
                return;
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(build_id, error = %e, "Cancellation check failed"),
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(every) => {}
        }
    }
}

/// Run the executor loop until `shutdown`. One task per worker; this task
/// reports stale claims for external reconciliation.
pub async fn run_executor(
    workers: Vec<Worker>,
    store: Arc<dyn BuildStore>,
    config: CiConfig,
    shutdown: CancellationToken,
) {
    tracing::info!(
        workspace = %config.workspace_dir.display(),
        max_concurrent = workers.len(),
        "Build executor started"
    );

    let mut handles = Vec::new();
    for worker in workers {
        let shutdown = shutdown.clone();
        let poll = config.poll_interval();
        handles.push(tokio::spawn(async move {
            loop {
                match worker.poll_and_execute(&shutdown).await {
                    Ok(Some(_)) if !shutdown.is_cancelled() => continue,
                    Ok(_) => {}
                    Err(e) => tracing::error!(worker = %worker.id(), "Executor poll error: {e}"),
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        }));
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.poll_interval()) => {}
        }
        let stale_after = chrono::Duration::from_std(config.stale_claim_after())
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        match store.stale_claims(Utc::now() - stale_after).await {
            Ok(stale) => {
                for build in stale {
                    tracing::warn!(
                        build_id = build.id,
                        claimed_by = ?build.claimed_by,
                        claimed_at = ?build.claimed_at,
                        "Build claim is stale"
                    );
                }
            }
            Err(e) => tracing::error!("Stale claim check failed: {e}"),
        }
    }

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Worker task failed: {e}");
        }
    }
    tracing::info!("Build executor stopped");
}
