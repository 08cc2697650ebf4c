//! Unit-test runner plugin (PHPUnit, JSON event log).

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::PluginError;
use crate::models::build::Build;
use crate::models::build_error::{Diagnostic, Severity};
use crate::models::pipeline::Stage;
use crate::models::project::Project;
use crate::reports::unit_test::{self, TestResult, TestSeverity};
use crate::services::pipeline::plugin::{Plugin, PluginContext};

use super::{parse_options, relative_option};

pub const NAME: &str = "php_unit";
const CANDIDATES: &[&str] = &["phpunit", "phpunit.phar"];
const DEFAULT_CONFIGS: &[&str] = &["phpunit.xml", "phpunit.xml.dist"];

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Options {
    /// Configuration file, relative to the working copy.
    #[serde(default)]
    config: Option<String>,
    /// Test directories, each run separately.
    #[serde(default)]
    directories: Vec<String>,
    /// Extra arguments appended to every run.
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug)]
pub struct PhpUnit {
    config: Option<String>,
    directories: Vec<String>,
    args: Vec<String>,
}

impl PhpUnit {
    pub fn from_options(options: &serde_json::Value) -> Result<Self, crate::error::PluginConfigError> {
        let options: Options = parse_options(NAME, options)?;
        let config = options
            .config
            .as_deref()
            .map(|c| relative_option(NAME, "config", c))
            .transpose()?;
        let directories = options
            .directories
            .iter()
            .map(|d| relative_option(NAME, "directories", d))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            config,
            directories,
            args: options.args,
        })
    }

    /// Target arguments for each run.
    fn targets(&self, ctx: &PluginContext<'_>) -> Vec<Vec<String>> {
        if let Some(config) = &self.config {
            return vec![vec!["-c".to_string(), config.clone()]];
        }
        if !self.directories.is_empty() {
            return self.directories.iter().map(|d| vec![d.clone()]).collect();
        }
        let default = DEFAULT_CONFIGS
            .iter()
            .find(|name| ctx.working_dir().join(name).is_file());
        match default {
            Some(name) => vec![vec!["-c".to_string(), name.to_string()]],
            None => vec![Vec::new()],
        }
    }
}

fn severity(severity: TestSeverity) -> Severity {
    match severity {
        TestSeverity::Error => Severity::Critical,
        TestSeverity::Fail => Severity::High,
        TestSeverity::Pass | TestSeverity::Skipped => Severity::Normal,
    }
}

#[async_trait]
impl Plugin for PhpUnit {
    fn name(&self) -> &str {
        NAME
    }

    fn can_execute(&self, stage: Stage, _project: &Project, _build: &Build) -> bool {
        stage == Stage::Test
    }

    async fn execute(&self, ctx: &mut PluginContext<'_>) -> Result<bool, PluginError> {
        let tool = ctx.find_tool(CANDIDATES)?;
        let build_path = ctx.build_path();

        let mut success = true;
        let mut results: Vec<TestResult> = Vec::new();
        let mut failures = 0;

        for target in self.targets(ctx) {
            let report = ctx.report_file()?;
            let spec = ctx
                .command(&tool)
                .arg("--log-json")
                .arg(report.path().to_string_lossy())
                .args(self.args.iter().cloned())
                .args(target);
            let result = ctx.run(spec).await?;
            success &= result.success();

            let raw = ctx.read_report(report.path()).await?;
            let parsed = unit_test::parse(&raw, &build_path)?;
            failures += parsed.failures;
            results.extend(parsed.results);
            ctx.report(parsed.errors.into_iter().map(|failure| {
                Diagnostic::new(failure.message, severity(failure.severity)).at(
                    failure.file,
                    failure.line,
                    failure.line,
                )
            }));
        }

        ctx.store_meta("phpunit-data", &results)?;
        ctx.store_meta("phpunit-errors", &failures)?;
        Ok(success)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn options_are_validated() {
        let plugin = PhpUnit::from_options(&json!({ "directories": ["tests/unit/"] })).expect("ok");
        assert_eq!(plugin.directories, ["tests/unit"]);

        assert!(PhpUnit::from_options(&json!({ "config": "../phpunit.xml" })).is_err());
        assert!(PhpUnit::from_options(&json!({ "coverage": true })).is_err());
        assert!(PhpUnit::from_options(&serde_json::Value::Null).is_ok());
    }

    #[test]
    fn failure_severities() {
        assert_eq!(severity(TestSeverity::Error), Severity::Critical);
        assert_eq!(severity(TestSeverity::Fail), Severity::High);
    }
}
