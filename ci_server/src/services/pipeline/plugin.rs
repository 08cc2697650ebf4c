//! Plugin contract and the per-invocation context handed to plugins.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

use crate::error::{ExternalToolError, PluginError};
use crate::logging::{redact, truncate_tail, MAX_LOGGED_OUTPUT};
use crate::models::build::Build;
use crate::models::build_error::Diagnostic;
use crate::models::pipeline::Stage;
use crate::models::project::Project;
use crate::services::checkout::WorkingCopy;
use crate::services::command::{CommandSpec, ExecutionResult, ProcessRunner};
use crate::services::tool_locator::ToolLocator;

/// A unit of pipeline work, usually wrapping one external tool.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this plugin may run in `stage`. Ineligible plugins are skipped.
    fn can_execute(&self, stage: Stage, project: &Project, build: &Build) -> bool;

    /// Run the plugin. `Ok(false)` means the tool could not run or ended
    /// abnormally; report-derived warnings alone are not a failure.
    async fn execute(&self, ctx: &mut PluginContext<'_>) -> Result<bool, PluginError>;
}

/// Everything one plugin invocation may touch.
pub struct PluginContext<'a> {
    pub build: &'a mut Build,
    pub project: &'a Project,
    pub working_copy: &'a WorkingCopy,
    pub stage: Stage,
    pub timeout: Duration,
    runner: &'a dyn ProcessRunner,
    tools: &'a dyn ToolLocator,
    cancel: &'a CancellationToken,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> PluginContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        build: &'a mut Build,
        project: &'a Project,
        working_copy: &'a WorkingCopy,
        stage: Stage,
        timeout: Duration,
        runner: &'a dyn ProcessRunner,
        tools: &'a dyn ToolLocator,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            build,
            project,
            working_copy,
            stage,
            timeout,
            runner,
            tools,
            cancel,
            diagnostics: Vec::new(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_copy.path
    }

    /// Working-copy root as tools report it in absolute paths.
    pub fn build_path(&self) -> String {
        self.working_copy.root()
    }

    pub fn log(&mut self, line: &str) {
        self.build.log_line(&redact(line));
    }

    pub fn find_tool(&self, candidates: &[&str]) -> Result<PathBuf, ExternalToolError> {
        self.tools
            .find(candidates, self.working_dir())
            .ok_or_else(|| ExternalToolError::NotFound {
                candidates: candidates.iter().map(|c| c.to_string()).collect(),
            })
    }

    /// A command for `program` running in the working copy under this
    /// plugin's timeout.
    pub fn command(&self, program: &Path) -> CommandSpec {
        CommandSpec::new(program.to_string_lossy(), self.timeout).current_dir(self.working_dir())
    }

    /// Temp file for a tool to write its report into.
    pub fn report_file(&self) -> Result<NamedTempFile, ExternalToolError> {
        NamedTempFile::new().map_err(|source| ExternalToolError::ReportIo {
            path: std::env::temp_dir(),
            source,
        })
    }

    /// Read a report file written by a tool. A missing file reads as empty.
    pub async fn read_report(&self, path: &Path) -> Result<String, ExternalToolError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(ExternalToolError::ReportIo {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Run a tool, copying its output into the build log. A non-zero exit is
    /// returned as `Ok`; expiry, cancellation and spawn failures are errors.
    pub async fn run(&mut self, spec: CommandSpec) -> Result<ExecutionResult, ExternalToolError> {
        self.log(&format!("$ {}", spec.display()));
        let result = self
            .runner
            .run(&spec, self.cancel)
            .await
            .map_err(|source| ExternalToolError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        for stream in [&result.stdout, &result.stderr] {
            if !stream.trim().is_empty() {
                let text = truncate_tail(stream.trim_end(), MAX_LOGGED_OUTPUT);
                self.log(&text);
            }
        }

        if result.cancelled {
            return Err(ExternalToolError::Cancelled {
                program: spec.program,
            });
        }
        if result.timed_out {
            return Err(ExternalToolError::TimedOut {
                program: spec.program,
                after_secs: spec.timeout.as_secs(),
            });
        }
        Ok(result)
    }

    /// Queue diagnostics for the error collector.
    pub fn report(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    /// Store a summary under `key`. When an earlier entry of the same plugin
    /// already wrote it, the first free `key-N` (N >= 2) is used instead.
    pub fn store_meta<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), PluginError> {
        let value = serde_json::to_value(value)?;
        let mut slot = key.to_string();
        let mut n = 2;
        while self.build.meta(&slot).is_some() {
            slot = format!("{key}-{n}");
            n += 1;
        }
        self.build.store_meta(&slot, value)?;
        Ok(())
    }

    pub(crate) fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}
