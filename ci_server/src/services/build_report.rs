//! Read-only build view for reporting consumers (CLI output, dashboards).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;
use crate::models::build::{Build, BuildStatus};
use crate::models::build_error::{BuildError, Severity};
use crate::models::project::Project;
use crate::services::build_service::BuildStore;
use crate::services::checkout::links;

#[derive(Debug, Serialize)]
pub struct BuildReport {
    pub id: i64,
    pub project_id: i64,
    pub project: String,
    pub commit_id: String,
    pub branch: String,
    pub status: BuildStatus,
    /// Pollers stop once this is true.
    pub is_terminal: bool,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub duration_ms: i64,
    pub error_count: u32,
    pub commit_link: Option<String>,
    pub branch_link: Option<String>,
    pub errors: Vec<ErrorJson>,
    pub meta: BTreeMap<String, serde_json::Value>,
    pub log: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorJson {
    pub plugin: String,
    pub severity: Severity,
    pub message: String,
    pub file: Option<String>,
    pub line_start: Option<u32>,
    pub line_end: Option<u32>,
    pub link: Option<String>,
    pub fingerprint: String,
}

impl BuildReport {
    pub fn new(project: &Project, build: &Build, errors: Vec<BuildError>) -> Self {
        let commit = build.commit_id.as_str();
        Self {
            id: build.id,
            project_id: build.project_id,
            project: project.name.clone(),
            commit_id: build.commit_id.clone(),
            branch: build.branch.clone(),
            status: build.status,
            is_terminal: build.is_terminal(),
            created: build.created,
            started: build.started,
            finished: build.finished,
            claimed_by: build.claimed_by.clone(),
            duration_ms: build.duration().num_milliseconds(),
            error_count: build.error_count,
            commit_link: links::commit_link(project, commit),
            branch_link: links::branch_link(project, &build.branch),
            errors: errors
                .into_iter()
                .map(|e| ErrorJson {
                    link: e
                        .file
                        .as_deref()
                        .and_then(|file| links::file_link(project, commit, file, e.line_start.unwrap_or(1))),
                    plugin: e.plugin,
                    severity: e.severity,
                    message: e.message,
                    file: e.file,
                    line_start: e.line_start,
                    line_end: e.line_end,
                    fingerprint: e.fingerprint,
                })
                .collect(),
            meta: build.meta_entries().clone(),
            log: build.log.clone(),
        }
    }
}

/// Load a build with its errors. `Ok(None)` when the build does not exist.
pub async fn get_build(store: &dyn BuildStore, build_id: i64) -> Result<Option<BuildReport>, StoreError> {
    let Some(build) = store.get(build_id).await? else {
        return Ok(None);
    };
    let project = store.project(build.project_id).await?;
    let errors = store.errors(build_id).await?;
    Ok(Some(BuildReport::new(&project, &build, errors)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::build::NewBuild;
    use crate::models::build_error::Diagnostic;
    use crate::models::project::VcsKind;
    use crate::services::build_service::MemoryBuildStore;
    use crate::services::error_service::ErrorCollector;

    #[tokio::test]
    async fn report_links_diagnostics() {
        let store = std::sync::Arc::new(MemoryBuildStore::new());
        store
            .insert_project(Project::new(1, "widgets", VcsKind::GitHub, "acme/widgets"))
            .await;
        store
            .enqueue(NewBuild {
                project_id: 1,
                commit_id: "abc".to_string(),
                branch: "main".to_string(),
                pull_request: None,
            })
            .await
            .expect("enqueue");
        let mut build = store.claim_next("w").await.expect("claim").expect("build");
        ErrorCollector::new(store.clone())
            .record(
                &mut build,
                "php_cpd",
                vec![Diagnostic::new("dup", Severity::Normal).at(Some("src/A.php".to_string()), Some(4), Some(9))],
            )
            .await
            .expect("record");
        build.finish(BuildStatus::Failed, Utc::now()).expect("finish");
        store.update(&build).await.expect("update");

        let report = get_build(store.as_ref(), build.id).await.expect("load").expect("some");
        assert!(report.is_terminal);
        assert_eq!(report.error_count, 1);
        assert_eq!(
            report.commit_link.as_deref(),
            Some("https://github.com/acme/widgets/commit/abc")
        );
        assert_eq!(
            report.errors[0].link.as_deref(),
            Some("https://github.com/acme/widgets/blob/abc/src/A.php#L4")
        );

        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["status"], "failed");
        assert!(get_build(store.as_ref(), 42).await.expect("load").is_none());
    }
}
