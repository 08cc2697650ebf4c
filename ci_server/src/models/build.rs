//! Build — one execution attempt of a project's pipeline.
//!
//! Status only ever moves forward:
//!
//! ```text
//! Pending ──claim──► Running ──► Success | Failed
//!    │                  │
//!    └──────────────────┴──────► Error
//! ```
//!
//! Entering a terminal status sets `finished` and freezes the log, the
//! error counter and the metadata store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BuildStateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Running,
    Success,
    Failed,
    Error,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Failed | BuildStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
            BuildStatus::Error => "error",
        }
    }

    pub(crate) fn can_become(&self, next: BuildStatus) -> bool {
        use BuildStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Error) | (Running, Success) | (Running, Failed) | (Running, Error)
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source side of a pull-request style build, merged into `branch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestSource {
    pub remote_url: String,
    pub remote_branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: i64,
    pub project_id: i64,
    pub commit_id: String,
    pub branch: String,
    pub pull_request: Option<PullRequestSource>,
    pub status: BuildStatus,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    /// When the current worker claimed the build; lets external
    /// reconciliation spot builds stuck in `Running`.
    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub log: String,
    pub error_count: u32,
    meta: BTreeMap<String, serde_json::Value>,
}

/// Everything needed to enqueue a build.
#[derive(Debug, Clone)]
pub struct NewBuild {
    pub project_id: i64,
    pub commit_id: String,
    pub branch: String,
    pub pull_request: Option<PullRequestSource>,
}

impl Build {
    pub fn new(id: i64, new_build: NewBuild, now: DateTime<Utc>) -> Self {
        Self {
            id,
            project_id: new_build.project_id,
            commit_id: new_build.commit_id,
            branch: new_build.branch,
            pull_request: new_build.pull_request,
            status: BuildStatus::Pending,
            created: now,
            started: None,
            finished: None,
            claimed_at: None,
            claimed_by: None,
            log: String::new(),
            error_count: 0,
            meta: BTreeMap::new(),
        }
    }

    /// Pending → Running, stamping the claim. Only the queue's atomic claim
    /// should call this.
    pub fn start(&mut self, worker: &str, now: DateTime<Utc>) -> Result<(), BuildStateError> {
        self.transition(BuildStatus::Running)?;
        self.started = Some(now);
        self.claimed_at = Some(now);
        self.claimed_by = Some(worker.to_string());
        Ok(())
    }

    /// Move into a terminal status and set `finished`.
    pub fn finish(&mut self, status: BuildStatus, now: DateTime<Utc>) -> Result<(), BuildStateError> {
        if !status.is_terminal() {
            return Err(BuildStateError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        self.transition(status)?;
        self.finished = Some(now);
        Ok(())
    }

    fn transition(&mut self, next: BuildStatus) -> Result<(), BuildStateError> {
        if self.status.is_terminal() {
            return Err(BuildStateError::Frozen(self.status));
        }
        if !self.status.can_become(next) {
            return Err(BuildStateError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// `finished - started`, or zero when either is unset.
    pub fn duration(&self) -> chrono::Duration {
        match (self.started, self.finished) {
            (Some(started), Some(finished)) => finished - started,
            _ => chrono::Duration::zero(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append one line to the build log. Ignored once the build is finished.
    pub fn log_line(&mut self, line: &str) {
        if self.is_terminal() {
            return;
        }
        self.log.push_str(line);
        if !line.ends_with('\n') {
            self.log.push('\n');
        }
    }

    pub fn add_errors(&mut self, count: u32) -> Result<(), BuildStateError> {
        self.ensure_open()?;
        self.error_count = self.error_count.saturating_add(count);
        Ok(())
    }

    /// Store a plugin summary. Each key may be written once per build.
    pub fn store_meta(
        &mut self,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), BuildStateError> {
        self.ensure_open()?;
        if self.meta.contains_key(key) {
            return Err(BuildStateError::MetadataKeyExists(key.to_string()));
        }
        self.meta.insert(key.to_string(), value);
        Ok(())
    }

    pub fn meta(&self, key: &str) -> Option<&serde_json::Value> {
        self.meta.get(key)
    }

    pub fn meta_entries(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.meta
    }

    fn ensure_open(&self) -> Result<(), BuildStateError> {
        if self.is_terminal() {
            return Err(BuildStateError::Frozen(self.status));
        }
        Ok(())
    }
}
