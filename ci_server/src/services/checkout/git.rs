//! Git family checkout (Git, GitHub, GitLab, Bitbucket, generic remotes).

use std::path::Path;
use std::time::Duration;

use super::{failure_output, Checkout, CloneMethod, CloneUrl, SshKeyFile};
use crate::error::CheckoutError;
use crate::logging::redact;
use crate::models::build::Build;
use crate::models::project::Project;
use crate::services::command::CommandSpec;

fn git(dir: Option<&Path>, key: Option<&SshKeyFile>) -> CommandSpec {
    let mut spec = CommandSpec::new("git", Duration::ZERO).env("GIT_TERMINAL_PROMPT", "0");
    if let Some(dir) = dir {
        spec = spec.current_dir(dir);
    }
    if let Some(key) = key {
        spec = spec.env("GIT_SSH_COMMAND", key.ssh_command());
    }
    spec
}

pub(super) async fn checkout(
    co: &Checkout<'_>,
    project: &Project,
    build: &Build,
    source: &CloneUrl,
    target: &Path,
    log: &mut Vec<String>,
) -> Result<String, CheckoutError> {
    let key = match (source.method, project.credentials.private_key()) {
        (CloneMethod::Ssh, Some(key)) => Some(SshKeyFile::write(key)?),
        _ => None,
    };
    let key = key.as_ref();
    let branch = if build.branch.trim().is_empty() {
        project.default_branch.as_str()
    } else {
        build.branch.as_str()
    };

    let clone = git(None, key)
        .args(["clone", "--recursive", "-b", branch, "--", source.url.as_str()])
        .arg(target.to_string_lossy());
    let result = co.run(clone, log).await?;
    if !result.success() {
        return Err(CheckoutError::Clone {
            url: redact(&source.url),
            stderr: failure_output(&result),
        });
    }

    match &build.pull_request {
        Some(pr) => {
            let local = format!("ci/{}", build.id);
            let result = co
                .run(git(Some(target), key).args(["checkout", "-b", local.as_str(), branch]), log)
                .await?;
            if !result.success() {
                return Err(CheckoutError::Checkout {
                    target: local,
                    stderr: failure_output(&result),
                });
            }

            let pull = git(Some(target), key).args([
                "-c",
                "user.name=sentinel-ci",
                "-c",
                "user.email=ci@localhost",
                "pull",
                "--no-edit",
                pr.remote_url.as_str(),
                pr.remote_branch.as_str(),
            ]);
            let result = co.run(pull, log).await?;
            if !result.success() {
                return Err(CheckoutError::Merge {
                    remote: redact(&pr.remote_url),
                    branch: pr.remote_branch.clone(),
                    stderr: failure_output(&result),
                });
            }
        }
        None if !build.commit_id.trim().is_empty() => {
            let commit = build.commit_id.trim();
            let result = co
                .run(git(Some(target), key).args(["checkout", "--quiet", commit]), log)
                .await?;
            if !result.success() {
                return Err(CheckoutError::Checkout {
                    target: commit.to_string(),
                    stderr: failure_output(&result),
                });
            }
        }
        None => {}
    }

    post_clone(co, target, key, log).await?;

    let result = co.run(git(Some(target), None).args(["rev-parse", "HEAD"]), log).await?;
    let head = result.stdout.trim();
    if result.success() && !head.is_empty() {
        Ok(head.to_string())
    } else {
        Ok(build.commit_id.clone())
    }
}

/// Submodules and LFS objects, each only when the repository declares them.
async fn post_clone(
    co: &Checkout<'_>,
    target: &Path,
    key: Option<&SshKeyFile>,
    log: &mut Vec<String>,
) -> Result<(), CheckoutError> {
    let mut steps: Vec<&[&str]> = Vec::new();
    if tokio::fs::try_exists(target.join(".gitmodules")).await.unwrap_or(false) {
        steps.push(&["submodule", "update", "--init", "--recursive"]);
    }
    let attributes = tokio::fs::read_to_string(target.join(".gitattributes"))
        .await
        .unwrap_or_default();
    if attributes.contains("filter=lfs") {
        steps.push(&["lfs", "pull"]);
    }

    for step in steps {
        let result = co.run(git(Some(target), key).args(step.iter().copied()), log).await?;
        if !result.success() {
            return Err(CheckoutError::Setup {
                step: format!("git {}", step.join(" ")),
                stderr: failure_output(&result),
            });
        }
    }
    Ok(())
}
