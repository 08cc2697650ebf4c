//! Error collector: binds parser diagnostics to a build, fingerprints them
//! for cross-build deduplication and persists them.

use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::Regex;

use crate::error::WorkerError;
use crate::models::build::Build;
use crate::models::build_error::{BuildError, Diagnostic};
use crate::services::build_service::BuildStore;

static NUMERIC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+\b").expect("valid regex"));
static PATH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/[a-zA-Z0-9_./-]+").expect("valid regex"));

/// Normalize error text for fingerprinting: remove numbers, paths, whitespace.
pub fn normalize(text: &str) -> String {
    let text = NUMERIC_REGEX.replace_all(text, "N");
    let text = PATH_REGEX.replace_all(&text, "PATH");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fingerprint of a diagnostic. Line numbers are left out so the same
/// problem keeps its identity when surrounding code moves.
pub fn fingerprint(plugin: &str, file: Option<&str>, message: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(plugin.as_bytes());
    hasher.update([0]);
    hasher.update(file.unwrap_or_default().as_bytes());
    hasher.update([0]);
    hasher.update(normalize(message).as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..16])
}

/// Turn diagnostics into BuildErrors owned by `build_id`.
pub fn bind(build_id: i64, plugin: &str, diagnostics: Vec<Diagnostic>) -> Vec<BuildError> {
    let now = Utc::now();
    diagnostics
        .into_iter()
        .map(|diagnostic| {
            let fp = fingerprint(plugin, diagnostic.file.as_deref(), &diagnostic.message);
            BuildError::from_diagnostic(build_id, plugin, diagnostic, fp, now)
        })
        .collect()
}

/// Persists diagnostics against a build and keeps its error counter in step.
#[derive(Clone)]
pub struct ErrorCollector {
    store: Arc<dyn BuildStore>,
}

impl ErrorCollector {
    pub fn new(store: Arc<dyn BuildStore>) -> Self {
        Self { store }
    }

    /// Record `diagnostics` from `plugin`. Returns how many were stored.
    pub async fn record(
        &self,
        build: &mut Build,
        plugin: &str,
        diagnostics: Vec<Diagnostic>,
    ) -> Result<usize, WorkerError> {
        if diagnostics.is_empty() {
            return Ok(0);
        }

        let errors = bind(build.id, plugin, diagnostics);
        let count = errors.len();
        self.store.add_errors(build.id, errors).await?;
        build.add_errors(u32::try_from(count).unwrap_or(u32::MAX))?;

        crate::metrics::error_recorded(plugin, count as u64);
        tracing::info!(build_id = build.id, plugin, count, "Build errors recorded");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::build::NewBuild;
    use crate::models::build_error::Severity;
    use crate::models::project::{Project, VcsKind};
    use crate::services::build_service::MemoryBuildStore;

    #[test]
    fn normalize_strips_volatile_parts() {
        assert_eq!(
            normalize("Failed at /tmp/build/42/src/a.php line 17"),
            "Failed at PATH line N"
        );
    }

    #[test]
    fn fingerprint_ignores_line_numbers_in_messages() {
        let a = fingerprint("php_unit", Some("src/a.php"), "expected 1 got 2");
        let b = fingerprint("php_unit", Some("src/a.php"), "expected 3 got 4");
        let c = fingerprint("php_unit", Some("src/b.php"), "expected 1 got 2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn record_persists_and_counts() {
        let store = Arc::new(MemoryBuildStore::new());
        store
            .insert_project(Project::new(1, "demo", VcsKind::Local, "/srv/demo"))
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

        let collector = ErrorCollector::new(store.clone());
        let stored = collector
            .record(
                &mut build,
                "php_cpd",
                vec![
                    Diagnostic::new("dup", Severity::Normal).at(Some("src/a.php".to_string()), Some(1), Some(5)),
                    Diagnostic::new("dup", Severity::Normal).at(Some("src/b.php".to_string()), Some(9), Some(13)),
                ],
            )
            .await
            .expect("record");

        assert_eq!(stored, 2);
        assert_eq!(build.error_count, 2);
        let errors = store.errors(build.id).await.expect("errors");
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.plugin == "php_cpd" && e.build_id == build.id));

        assert_eq!(collector.record(&mut build, "php_cpd", Vec::new()).await.expect("noop"), 0);
    }
}
