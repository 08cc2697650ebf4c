//! Subversion checkout.

use std::path::Path;
use std::time::Duration;

use super::{failure_output, Checkout, CloneMethod, CloneUrl, SshKeyFile};
use crate::error::CheckoutError;
use crate::logging::redact;
use crate::models::build::Build;
use crate::models::project::Project;
use crate::services::command::CommandSpec;

pub(super) async fn checkout(
    co: &Checkout<'_>,
    project: &Project,
    build: &Build,
    source: &CloneUrl,
    target: &Path,
    log: &mut Vec<String>,
) -> Result<String, CheckoutError> {
    if let Some(pr) = &build.pull_request {
        return Err(CheckoutError::Merge {
            remote: redact(&pr.remote_url),
            branch: pr.remote_branch.clone(),
            stderr: "pull-request builds are only supported for git repositories".to_string(),
        });
    }

    let key = match (source.method, project.credentials.private_key()) {
        (CloneMethod::Ssh, Some(key)) => Some(SshKeyFile::write(key)?),
        _ => None,
    };

    let mut spec = CommandSpec::new("svn", Duration::ZERO).args(["checkout", "--non-interactive"]);
    let revision = build.commit_id.trim();
    if !revision.is_empty() {
        spec = spec.args(["-r", revision]);
    }
    spec = spec.arg(source.url.as_str()).arg(target.to_string_lossy());
    if let Some(key) = &key {
        spec = spec.env("SVN_SSH", key.ssh_command());
    }

    let result = co.run(spec, log).await?;
    if !result.success() {
        return Err(CheckoutError::Clone {
            url: redact(&source.url),
            stderr: failure_output(&result),
        });
    }
    Ok(build.commit_id.clone())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    use super::super::testing::ScriptedRunner;
    use super::*;
    use crate::models::build::NewBuild;
    use crate::models::project::{Credentials, VcsKind};

    #[tokio::test]
    async fn ssh_checkout_sets_svn_ssh() {
        let runner = ScriptedRunner::default();
        let cancel = CancellationToken::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let mut project = Project::new(1, "demo", VcsKind::Subversion, "svn+ssh://svn.example.com/app/trunk");
        project.credentials = Credentials {
            ssh_private_key: Some("key".to_string()),
            access_token: None,
        };
        let build = Build::new(
            4,
            NewBuild {
                project_id: 1,
                commit_id: "1200".to_string(),
                branch: String::new(),
                pull_request: None,
            },
            Utc::now(),
        );

        Checkout::new(&runner, Duration::from_secs(5), &cancel)
            .create_working_copy(&project, &build, &dir.path().join("4"))
            .await
            .expect("working copy");

        let calls = runner.calls.lock().expect("lock");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args[..4], ["checkout", "--non-interactive", "-r", "1200"]);
        assert!(calls[0].env.iter().any(|(k, _)| k == "SVN_SSH"));
    }
}
