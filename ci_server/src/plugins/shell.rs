//! Shell plugin: ordered `bash -c` commands in the working copy.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{PluginConfigError, PluginError};
use crate::models::build::Build;
use crate::models::pipeline::Stage;
use crate::models::project::Project;
use crate::services::pipeline::plugin::{Plugin, PluginContext};

use super::parse_options;

pub const NAME: &str = "shell";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Options {
    #[serde(default)]
    commands: Vec<String>,
}

#[derive(Debug)]
pub struct Shell {
    commands: Vec<String>,
}

impl Shell {
    pub fn from_options(options: &serde_json::Value) -> Result<Self, PluginConfigError> {
        let options: Options = parse_options(NAME, options)?;
        let commands: Vec<String> = options
            .commands
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect();
        if commands.is_empty() {
            return Err(PluginConfigError::InvalidValue {
                plugin: NAME.to_string(),
                option: "commands",
                reason: "at least one command is required".to_string(),
            });
        }
        Ok(Self { commands })
    }
}

#[async_trait]
impl Plugin for Shell {
    fn name(&self) -> &str {
        NAME
    }

    fn can_execute(&self, _stage: Stage, _project: &Project, _build: &Build) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut PluginContext<'_>) -> Result<bool, PluginError> {
        let bash = std::path::Path::new("bash");
        for command in &self.commands {
            let spec = ctx
                .command(bash)
                .args(["-c", command.as_str()])
                .env("CI", "true")
                .env("CI_BUILD_ID", ctx.build.id.to_string())
                .env("CI_BRANCH", ctx.build.branch.clone())
                .env("CI_COMMIT", ctx.working_copy.commit.clone())
                .env("CI_BUILD_PATH", ctx.build_path());
            let result = ctx.run(spec).await?;
            if !result.success() {
                ctx.log(&format!("command exited with {:?}", result.exit_code));
                return Ok(false);
            }
        }
        Ok(true)
    }
}
