//! Copy/paste detector plugin (phpcpd, PMD-CPD XML report).

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{PluginConfigError, PluginError};
use crate::models::build::Build;
use crate::models::pipeline::{BuildSettings, Stage};
use crate::models::project::Project;
use crate::reports::duplication;
use crate::services::pipeline::plugin::{Plugin, PluginContext};

use super::{parse_options, relative_option};

pub const NAME: &str = "php_cpd";
const CANDIDATES: &[&str] = &["phpcpd", "phpcpd.phar"];
/// phpcpd exits 1 when it found duplications.
const EXIT_CLONES_FOUND: i32 = 1;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Options {
    /// Directory to analyse, relative to the working copy.
    #[serde(default)]
    path: Option<String>,
    /// Added to the build-wide ignore list.
    #[serde(default)]
    ignore: Vec<String>,
}

#[derive(Debug)]
pub struct PhpCpd {
    path: String,
    ignore: Vec<String>,
}

impl PhpCpd {
    pub fn from_options(
        options: &serde_json::Value,
        settings: &BuildSettings,
    ) -> Result<Self, PluginConfigError> {
        let options: Options = parse_options(NAME, options)?;
        let path = match options.path.as_deref() {
            Some(path) => relative_option(NAME, "path", path)?,
            None => String::new(),
        };
        let mut ignore = Vec::new();
        for item in settings.ignore.iter().chain(&options.ignore) {
            let item = relative_option(NAME, "ignore", item)?;
            if !item.is_empty() && !ignore.contains(&item) {
                ignore.push(item);
            }
        }
        Ok(Self { path, ignore })
    }

    /// One `--names-exclude` list for ignored files under the analysed
    /// path; everything else is passed as an `--exclude` directory.
    fn ignore_args(&self, target: &Path) -> Vec<String> {
        let mut args = Vec::new();
        let mut names = Vec::new();
        for item in &self.ignore {
            if target.join(item).is_file() {
                let name = item.rsplit('/').next().unwrap_or(item);
                names.push(name.to_string());
            } else {
                args.push("--exclude".to_string());
                args.push(item.clone());
            }
        }
        if !names.is_empty() {
            args.push("--names-exclude".to_string());
            args.push(names.join(","));
        }
        args
    }
}

#[async_trait]
impl Plugin for PhpCpd {
    fn name(&self) -> &str {
        NAME
    }

    fn can_execute(&self, stage: Stage, _project: &Project, _build: &Build) -> bool {
        stage == Stage::Test
    }

    async fn execute(&self, ctx: &mut PluginContext<'_>) -> Result<bool, PluginError> {
        let tool = ctx.find_tool(CANDIDATES)?;
        let report = ctx.report_file()?;
        let target = if self.path.is_empty() {
            ctx.working_dir().to_path_buf()
        } else {
            ctx.working_dir().join(&self.path)
        };

        let spec = ctx
            .command(&tool)
            .arg("--log-pmd")
            .arg(report.path().to_string_lossy())
            .args(self.ignore_args(&target))
            .arg(target.to_string_lossy());
        let result = ctx.run(spec).await?;

        let ran = matches!(result.exit_code, Some(0) | Some(EXIT_CLONES_FOUND));
        if !ran {
            ctx.log(&format!("phpcpd exited abnormally ({:?})", result.exit_code));
            return Ok(false);
        }

        let raw = ctx.read_report(report.path()).await?;
        let parsed = duplication::parse(&raw, &ctx.build_path())?;
        ctx.log(&format!("{} duplication block(s) found", parsed.warnings));
        ctx.store_meta("phpcpd-warnings", &parsed.warnings)?;
        ctx.report(parsed.diagnostics);
        Ok(true)
    }
}
