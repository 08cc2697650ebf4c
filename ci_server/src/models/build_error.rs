//! A BuildError is one line-addressable diagnostic attached to a build.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Normal,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Normal => "normal",
            Severity::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A diagnostic as produced by a report parser, before it is bound to a
/// build. `file` is already relative to the working copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub severity: Severity,
    pub file: Option<String>,
    pub line_start: Option<u32>,
    pub line_end: Option<u32>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
            file: None,
            line_start: None,
            line_end: None,
        }
    }

    pub fn at(mut self, file: Option<String>, line_start: Option<u32>, line_end: Option<u32>) -> Self {
        self.file = file;
        self.line_start = line_start;
        self.line_end = line_end;
        self
    }
}

/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildError {
    pub build_id: i64,
    pub plugin: String,
    pub message: String,
    pub severity: Severity,
    pub file: Option<String>,
    pub line_start: Option<u32>,
    pub line_end: Option<u32>,
    /// Stable hash of plugin, location and normalized message.
    pub fingerprint: String,
    pub created: DateTime<Utc>,
}

impl BuildError {
    /// Bind a diagnostic to a build. Absolute paths are dropped rather than
    /// stored, and an inverted line range collapses to its start.
    pub fn from_diagnostic(
        build_id: i64,
        plugin: &str,
        diagnostic: Diagnostic,
        fingerprint: String,
        now: DateTime<Utc>,
    ) -> Self {
        let file = diagnostic
            .file
            .map(|f| f.trim_start_matches("./").to_string())
            .filter(|f| !f.is_empty() && !f.starts_with('/'));
        let line_start = diagnostic.line_start;
        let line_end = match (line_start, diagnostic.line_end) {
            (Some(start), Some(end)) if end < start => Some(start),
            (Some(start), None) => Some(start),
            (_, end) => end,
        };

        Self {
            build_id,
            plugin: plugin.to_string(),
            message: diagnostic.message,
            severity: diagnostic.severity,
            file,
            line_start,
            line_end,
            fingerprint,
            created: now,
        }
    }
}

/// Strip the working-copy root from `path`. Paths outside the root are
/// returned unchanged.
pub fn strip_root<'a>(root: &str, path: &'a str) -> &'a str {
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return path;
    }
    match path.strip_prefix(root) {
        Some(rest) if rest.is_empty() => rest,
        Some(rest) if rest.starts_with('/') => &rest[1..],
        _ => path,
    }
}

/// Path relative to the working copy, or `None` when `path` is absolute and
/// lives outside it.
pub fn relative_path(root: &str, path: &str) -> Option<String> {
    let stripped = strip_root(root, path);
    if stripped.is_empty() || stripped.starts_with('/') {
        None
    } else {
        Some(stripped.to_string())
    }
}
