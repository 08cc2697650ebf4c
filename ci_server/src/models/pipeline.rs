//! Declarative build definition: which plugins run in which stage.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed pipeline phases. `Success` and `Failure` are mutually exclusive and
/// chosen by the outcome of `Test`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    Test,
    Complete,
    Success,
    Failure,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Setup,
        Stage::Test,
        Stage::Complete,
        Stage::Success,
        Stage::Failure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::Test => "test",
            Stage::Complete => "complete",
            Stage::Success => "success",
            Stage::Failure => "failure",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured plugin invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginEntry {
    /// Registry name, e.g. `php_cpd`.
    pub plugin: String,
    /// A failure of this plugin is logged but does not fail its stage.
    #[serde(default)]
    pub allow_failure: bool,
    /// Overrides the default per-plugin timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Plugin-specific options, validated by the plugin registry.
    #[serde(default)]
    pub options: serde_json::Value,
}

impl PluginEntry {
    pub fn new(plugin: &str, options: serde_json::Value) -> Self {
        Self {
            plugin: plugin.to_string(),
            allow_failure: false,
            timeout_secs: None,
            options,
        }
    }
}

/// Settings shared by every plugin of a build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSettings {
    /// Paths (relative to the working copy) analysis tools should skip.
    #[serde(default)]
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDefinition {
    #[serde(default)]
    pub build_settings: BuildSettings,
    #[serde(default)]
    pub setup: Vec<PluginEntry>,
    #[serde(default)]
    pub test: Vec<PluginEntry>,
    #[serde(default)]
    pub complete: Vec<PluginEntry>,
    #[serde(default)]
    pub success: Vec<PluginEntry>,
    #[serde(default)]
    pub failure: Vec<PluginEntry>,
}

impl PipelineDefinition {
    pub fn entries(&self, stage: Stage) -> &[PluginEntry] {
        match stage {
            Stage::Setup => &self.setup,
            Stage::Test => &self.test,
            Stage::Complete => &self.complete,
            Stage::Success => &self.success,
            Stage::Failure => &self.failure,
        }
    }
}
