//! Behaviour-spec runner plugin (phpspec, JUnit XML on stdout).

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{PluginConfigError, PluginError};
use crate::models::build::Build;
use crate::models::pipeline::Stage;
use crate::models::project::Project;
use crate::reports::spec;
use crate::services::pipeline::plugin::{Plugin, PluginContext};

use super::{parse_options, relative_option};

pub const NAME: &str = "php_spec";
const CANDIDATES: &[&str] = &["phpspec", "phpspec.php"];

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Options {
    #[serde(default)]
    config: Option<String>,
}

#[derive(Debug)]
pub struct PhpSpec {
    config: Option<String>,
}

impl PhpSpec {
    pub fn from_options(options: &serde_json::Value) -> Result<Self, PluginConfigError> {
        let options: Options = parse_options(NAME, options)?;
        let config = options
            .config
            .as_deref()
            .map(|c| relative_option(NAME, "config", c))
            .transpose()?;
        Ok(Self { config })
    }
}

#[async_trait]
impl Plugin for PhpSpec {
    fn name(&self) -> &str {
        NAME
    }

    fn can_execute(&self, stage: Stage, _project: &Project, _build: &Build) -> bool {
        stage == Stage::Test
    }

    async fn execute(&self, ctx: &mut PluginContext<'_>) -> Result<bool, PluginError> {
        let tool = ctx.find_tool(CANDIDATES)?;
        let mut command = ctx
            .command(&tool)
            .args(["--format=junit", "--no-code-generation", "run"]);
        if let Some(config) = &self.config {
            command = command.args(["--config", config.as_str()]);
        }

        let result = ctx.run(command).await?;
        if result.stdout.trim().is_empty() {
            ctx.log("phpspec produced no report");
            return Ok(false);
        }

        let summary = spec::parse(&result.stdout)?;
        ctx.log(&format!(
            "{} spec(s), {} failure(s), {} error(s)",
            summary.tests, summary.failures, summary.errors
        ));
        ctx.store_meta("phpspec", &summary)?;
        Ok(result.success())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn options() {
        assert!(PhpSpec::from_options(&serde_json::Value::Null).is_ok());
        assert!(PhpSpec::from_options(&json!({ "config": "/etc/phpspec.yml" })).is_err());
        assert!(PhpSpec::from_options(&json!({ "bootstrap": "x" })).is_err());
    }
}
