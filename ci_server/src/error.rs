//! Error taxonomy for the build engine.
//!
//! Plugin-local errors ([`PluginConfigError`], [`ExternalToolError`],
//! [`ReportParseError`]) are recorded and swallowed at the plugin boundary.
//! Everything wrapped by [`WorkerError`] unwinds to the worker, which forces
//! the build into a terminal status.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::build::BuildStatus;
use crate::models::project::VcsKind;

/// Producing a working copy failed. Always fatal to the build.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("{vcs} project has no repository reference")]
    MissingReference { vcs: VcsKind },

    #[error("clone of {url} failed: {stderr}")]
    Clone { url: String, stderr: String },

    #[error("checkout of {target} failed: {stderr}")]
    Checkout { target: String, stderr: String },

    #[error("merge of {remote} {branch} failed: {stderr}")]
    Merge {
        remote: String,
        branch: String,
        stderr: String,
    },

    #[error("post-clone step `{step}` failed: {stderr}")]
    Setup { step: String, stderr: String },

    #[error("could not prepare ssh key: {0}")]
    SshKey(#[source] std::io::Error),

    #[error("working copy i/o on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {after_secs}s")]
    TimedOut { command: String, after_secs: u64 },

    #[error("{field} `{value}` looks like a command-line option")]
    UnsafeArgument { field: &'static str, value: String },

    #[error("checkout cancelled")]
    Cancelled,
}

/// A plugin's configuration is unusable. The plugin is skipped and counted
/// as failed; the stage continues.
#[derive(Debug, Error)]
pub enum PluginConfigError {
    #[error("unknown plugin `{0}`")]
    UnknownPlugin(String),

    #[error("invalid options for `{plugin}`: {source}")]
    InvalidOptions {
        plugin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("`{plugin}` option `{option}` is invalid: {reason}")]
    InvalidValue {
        plugin: String,
        option: &'static str,
        reason: String,
    },
}

/// The backing tool could not run to completion.
#[derive(Debug, Error)]
pub enum ExternalToolError {
    #[error("none of [{}] could be found", candidates.join(", "))]
    NotFound { candidates: Vec<String> },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {after_secs}s")]
    TimedOut { program: String, after_secs: u64 },

    #[error("{program} was cancelled")]
    Cancelled { program: String },

    #[error("report file {}: {source}", path.display())]
    ReportIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A tool's report could not be parsed. The raw report travels with the
/// error so the runner can preserve it in the build log.
#[derive(Debug, Error)]
#[error("{parser} report could not be parsed: {message}")]
pub struct ReportParseError {
    pub parser: &'static str,
    pub message: String,
    pub raw: String,
}

impl ReportParseError {
    pub fn new(parser: &'static str, message: impl Into<String>, raw: &str) -> Self {
        Self {
            parser,
            message: message.into(),
            raw: raw.to_string(),
        }
    }
}

/// A rejected change to a build's state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildStateError {
    #[error("cannot move build from {from} to {to}")]
    InvalidTransition { from: BuildStatus, to: BuildStatus },

    #[error("build is {0} and can no longer be modified")]
    Frozen(BuildStatus),

    #[error("metadata key `{0}` is already set")]
    MetadataKeyExists(String),
}

/// Storage / queue failures (the infrastructure class).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("build {0} does not exist")]
    BuildNotFound(i64),

    #[error("project {0} does not exist")]
    ProjectNotFound(i64),

    #[error("worker `{worker}` no longer holds build {build_id}")]
    LeaseLost { build_id: i64, worker: String },

    #[error("build {0} is already finished")]
    AlreadyFinished(i64),

    #[error("build {build_id} cannot be stored as {to} from {from}")]
    IllegalTransition {
        build_id: i64,
        from: BuildStatus,
        to: BuildStatus,
    },

    #[error("build {0} is {1} but its finished time does not match")]
    FinishedMismatch(i64, BuildStatus),

    #[error("storage backend: {0}")]
    Backend(String),
}

/// Everything a plugin's `execute` may fail with.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error(transparent)]
    Config(#[from] PluginConfigError),

    #[error(transparent)]
    Tool(#[from] ExternalToolError),

    #[error(transparent)]
    Report(#[from] ReportParseError),

    #[error(transparent)]
    State(#[from] BuildStateError),

    #[error("summary could not be serialized: {0}")]
    Summary(#[from] serde_json::Error),
}

/// Errors that abort a build and are handled by the worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    State(#[from] BuildStateError),

    #[error("working copy i/o on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkerError {
    /// Plugin identifier used for the synthetic BuildError describing the fault.
    pub fn origin(&self) -> &'static str {
        match self {
            WorkerError::Checkout(_) => "checkout",
            WorkerError::Store(_) | WorkerError::State(_) | WorkerError::Io { .. } => "worker",
        }
    }
}
