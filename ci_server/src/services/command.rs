//! Process runner: executes external tools with captured output.
//!
//! Every invocation is bounded by a timeout and observes a cancellation
//! token. On unix the tool runs in its own process group so that expiry or
//! cancellation kills the tool together with anything it spawned.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::logging::redact;

/// What to run.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    /// Command line safe for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        redact(&line)
    }
}

/// Outcome of one process run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && !self.cancelled
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion, timeout or cancellation. `Err` only when the
    /// process could not be started.
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> std::io::Result<ExecutionResult>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> std::io::Result<ExecutionResult> {
        let start = Instant::now();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn()?;
        let pid = child.id();

        let mut result = ExecutionResult::default();
        tokio::select! {
            output = child.wait_with_output() => {
                let output = output?;
                result.exit_code = output.status.code();
                result.stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                result.stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            }
            _ = tokio::time::sleep(spec.timeout) => {
                kill_process_group(pid);
                result.timed_out = true;
                result.stderr = format!("Timed out after {}s", spec.timeout.as_secs());
            }
            _ = cancel.cancelled() => {
                kill_process_group(pid);
                result.cancelled = true;
                result.stderr = "Cancelled".to_string();
            }
        }
        result.duration = start.elapsed();

        tracing::debug!(
            command = %spec.display(),
            exit_code = ?result.exit_code,
            timed_out = result.timed_out,
            cancelled = result.cancelled,
            duration_ms = result.duration.as_millis() as u64,
            "Command finished"
        );

        Ok(result)
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    let Ok(pgid) = libc::pid_t::try_from(pid) else { return };
    // SAFETY: killpg only sends a signal; the group was created for this
    // child via `process_group(0)`, so pgid == child pid.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}
