//! Pipeline runner — stage-gated, strictly sequential plugin execution.
//!
//! Stage order is fixed: Setup, Test, Complete, then Success or Failure
//! depending on the Test outcome. A Setup failure skips straight to
//! Complete. Every other stage drains its full plugin list so diagnostics
//! are exhaustive. Cancellation is observed between plugins and stages.

pub mod plugin;
pub mod registry;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{PluginError, WorkerError};
use crate::logging::{redact, truncate_tail, MAX_LOGGED_OUTPUT};
use crate::models::build::Build;
use crate::models::pipeline::Stage;
use crate::models::project::Project;
use crate::services::checkout::WorkingCopy;
use crate::services::command::ProcessRunner;
use crate::services::error_service::ErrorCollector;
use crate::services::tool_locator::ToolLocator;

use self::plugin::{Plugin, PluginContext};
use self::registry::{PlannedPlugin, PluginRegistry, StagePlan};

/// Metadata key for the per-plugin run summary.
pub const SUMMARY_KEY: &str = "plugin-summary";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Success,
    Failed,
    Cancelled,
}

/// One plugin invocation, as recorded in the build summary.
#[derive(Debug, Clone, Serialize)]
pub struct PluginRun {
    pub stage: Stage,
    pub plugin: String,
    pub success: bool,
    pub allowed_failure: bool,
    pub duration_ms: u64,
}

pub struct PipelineRunner {
    registry: Arc<PluginRegistry>,
    runner: Arc<dyn ProcessRunner>,
    tools: Arc<dyn ToolLocator>,
    collector: ErrorCollector,
    default_timeout: Duration,
}

impl PipelineRunner {
    pub fn new(
        registry: Arc<PluginRegistry>,
        runner: Arc<dyn ProcessRunner>,
        tools: Arc<dyn ToolLocator>,
        collector: ErrorCollector,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            runner,
            tools,
            collector,
            default_timeout,
        }
    }

    /// Run every stage against `working_copy`. Errors returned here are
    /// infrastructure faults; plugin failures only shape the outcome.
    pub async fn run(
        &self,
        project: &Project,
        build: &mut Build,
        working_copy: &WorkingCopy,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, WorkerError> {
        let plan = self.registry.plan(&project.pipeline);
        let mut runs = Vec::new();
        let exec = StageExec {
            project,
            working_copy,
            cancel,
            plan: &plan,
        };

        let outcome = self.run_stages(&exec, build, &mut runs).await;
        if let Err(e) = build.store_meta(SUMMARY_KEY, serde_json::to_value(&runs).unwrap_or_default()) {
            tracing::warn!(build_id = build.id, error = %e, "Could not store plugin summary");
        }
        outcome
    }

    async fn run_stages(
        &self,
        exec: &StageExec<'_>,
        build: &mut Build,
        runs: &mut Vec<PluginRun>,
    ) -> Result<PipelineOutcome, WorkerError> {
        if exec.cancel.is_cancelled() {
            return Ok(PipelineOutcome::Cancelled);
        }
        if !self.run_stage(exec, Stage::Setup, build, runs).await? {
            if exec.cancel.is_cancelled() {
                return Ok(PipelineOutcome::Cancelled);
            }
            build.log_line("Setup stage failed; skipping to complete stage");
            self.run_post_stage(exec, Stage::Complete, build, runs).await?;
            return Ok(if exec.cancel.is_cancelled() {
                PipelineOutcome::Cancelled
            } else {
                PipelineOutcome::Failed
            });
        }

        if exec.cancel.is_cancelled() {
            return Ok(PipelineOutcome::Cancelled);
        }
        let passed = self.run_stage(exec, Stage::Test, build, runs).await?;

        // Post stages run for side effects only; they cannot change the verdict.
        let branch = if passed { Stage::Success } else { Stage::Failure };
        for stage in [Stage::Complete, branch] {
            if exec.cancel.is_cancelled() {
                return Ok(PipelineOutcome::Cancelled);
            }
            self.run_post_stage(exec, stage, build, runs).await?;
        }
        if exec.cancel.is_cancelled() {
            return Ok(PipelineOutcome::Cancelled);
        }

        Ok(if passed {
            PipelineOutcome::Success
        } else {
            PipelineOutcome::Failed
        })
    }

    async fn run_post_stage(
        &self,
        exec: &StageExec<'_>,
        stage: Stage,
        build: &mut Build,
        runs: &mut Vec<PluginRun>,
    ) -> Result<(), WorkerError> {
        if !self.run_stage(exec, stage, build, runs).await? {
            tracing::warn!(build_id = build.id, %stage, "Post-build stage reported failures");
        }
        Ok(())
    }

    /// Returns whether the stage passed.
    async fn run_stage(
        &self,
        exec: &StageExec<'_>,
        stage: Stage,
        build: &mut Build,
        runs: &mut Vec<PluginRun>,
    ) -> Result<bool, WorkerError> {
        let planned = exec.plan.stage(stage);
        if planned.is_empty() {
            return Ok(true);
        }

        build.log_line(&format!("== {stage} =="));
        tracing::info!(build_id = build.id, %stage, plugins = planned.len(), "Stage started");

        let mut passed = true;
        for entry in planned {
            if exec.cancel.is_cancelled() {
                build.log_line("Build cancelled");
                return Ok(false);
            }

            let started = Instant::now();
            let success = match &entry.plugin {
                Err(e) => {
                    build.log_line(&format!("{}: {e}", entry.name()));
                    false
                }
                Ok(plugin) => {
                    if !plugin.can_execute(stage, exec.project, build) {
                        build.log_line(&format!("{}: skipped, not available in {stage}", entry.name()));
                        continue;
                    }
                    self.execute(exec, stage, entry, plugin.as_ref(), build).await?
                }
            };
            let duration_ms = started.elapsed().as_millis() as u64;
            crate::metrics::plugin_duration(entry.name(), success, duration_ms);

            runs.push(PluginRun {
                stage,
                plugin: entry.name().to_string(),
                success,
                allowed_failure: !success && entry.entry.allow_failure,
                duration_ms,
            });

            if success {
                build.log_line(&format!("{}: passed", entry.name()));
                continue;
            }
            if entry.entry.allow_failure {
                build.log_line(&format!("{}: failed (allowed)", entry.name()));
                continue;
            }
            build.log_line(&format!("{}: failed", entry.name()));
            passed = false;
            if stage == Stage::Setup {
                break;
            }
        }

        tracing::info!(build_id = build.id, %stage, passed, "Stage finished");
        Ok(passed)
    }

    async fn execute(
        &self,
        exec: &StageExec<'_>,
        stage: Stage,
        entry: &PlannedPlugin,
        plugin: &dyn Plugin,
        build: &mut Build,
    ) -> Result<bool, WorkerError> {
        let timeout = entry
            .entry
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let mut ctx = PluginContext::new(
            build,
            exec.project,
            exec.working_copy,
            stage,
            timeout,
            self.runner.as_ref(),
            self.tools.as_ref(),
            exec.cancel,
        );
        let result = plugin.execute(&mut ctx).await;
        let diagnostics = ctx.into_diagnostics();

        let success = match result {
            Ok(success) => success,
            Err(PluginError::Report(e)) => {
                build.log_line(&format!("{}: {e}", entry.name()));
                build.log_line("Raw report:");
                build.log_line(&truncate_tail(&redact(&e.raw), MAX_LOGGED_OUTPUT));
                false
            }
            Err(e) => {
                build.log_line(&format!("{}: {e}", entry.name()));
                false
            }
        };

        self.collector.record(build, entry.name(), diagnostics).await?;
        Ok(success)
    }
}

struct StageExec<'a> {
    project: &'a Project,
    working_copy: &'a WorkingCopy,
    cancel: &'a CancellationToken,
    plan: &'a StagePlan,
}
