//! Project definitions: loading from disk and up-front plugin validation.

use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use crate::models::pipeline::Stage;
use crate::models::project::Project;
use crate::services::pipeline::registry::PluginRegistry;

/// Load a project definition (JSON).
pub async fn load_project(path: &Path) -> anyhow::Result<Project> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading project file {}", path.display()))?;
    let project: Project = serde_json::from_str(&raw)
        .with_context(|| format!("parsing project file {}", path.display()))?;
    if project.reference.trim().is_empty() {
        anyhow::bail!("project `{}` has an empty reference", project.name);
    }
    Ok(project)
}

#[derive(Debug, Serialize)]
pub struct ConfigProblem {
    pub stage: Stage,
    pub plugin: String,
    pub error: String,
}

/// Every plugin entry that would fail to configure at run time.
pub fn validate(project: &Project, registry: &PluginRegistry) -> Vec<ConfigProblem> {
    registry
        .plan(&project.pipeline)
        .problems()
        .map(|(stage, plugin, error)| ConfigProblem {
            stage,
            plugin: plugin.to_string(),
            error: error.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_and_validates_project_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("project.json");
        std::fs::write(
            &path,
            r#"{
                "id": 1,
                "name": "widgets",
                "vcs": "github",
                "reference": "acme/widgets",
                "pipeline": {
                    "build_settings": { "ignore": ["vendor"] },
                    "test": [
                        { "plugin": "php_cpd", "options": { "path": "src" } },
                        { "plugin": "php_unit", "options": { "coverage": true } }
                    ],
                    "complete": [ { "plugin": "mailer" } ]
                }
            }"#,
        )
        .expect("write");

        let project = load_project(&path).await.expect("project");
        assert_eq!(project.pipeline.test.len(), 2);

        let problems = validate(&project, &PluginRegistry::with_defaults());
        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0].stage, Stage::Test);
        assert_eq!(problems[0].plugin, "php_unit");
        assert_eq!(problems[1].plugin, "mailer");
    }

    #[tokio::test]
    async fn missing_file_is_reported_with_path() {
        let err = load_project(Path::new("/no/such/project.json")).await.expect_err("missing");
        assert!(format!("{err:#}").contains("/no/such/project.json"));
    }
}
