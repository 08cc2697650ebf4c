//! Mercurial checkout.

use std::path::Path;
use std::time::Duration;

use super::{failure_output, Checkout, CloneMethod, CloneUrl, SshKeyFile};
use crate::error::CheckoutError;
use crate::logging::redact;
use crate::models::build::Build;
use crate::models::project::Project;
use crate::services::command::CommandSpec;

fn hg(key: Option<&SshKeyFile>) -> CommandSpec {
    let spec = CommandSpec::new("hg", Duration::ZERO).env("HGPLAIN", "1");
    match key {
        Some(key) => spec.args(["--ssh", key.ssh_command().as_str()]),
        None => spec,
    }
}

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

    let clone = hg(key.as_ref())
        .args(["clone", "--noupdate", source.url.as_str()])
        .arg(target.to_string_lossy());
    let result = co.run(clone, log).await?;
    if !result.success() {
        return Err(CheckoutError::Clone {
            url: redact(&source.url),
            stderr: failure_output(&result),
        });
    }

    let revision = [build.commit_id.trim(), build.branch.trim(), project.default_branch.trim()]
        .into_iter()
        .find(|r| !r.is_empty())
        .unwrap_or("tip");
    let update = hg(None)
        .current_dir(target)
        .args(["update", "--clean", revision]);
    let result = co.run(update, log).await?;
    if !result.success() {
        return Err(CheckoutError::Checkout {
            target: revision.to_string(),
            stderr: failure_output(&result),
        });
    }

    let result = co
        .run(hg(None).current_dir(target).args(["id", "--id", "--debug"]), log)
        .await?;
    let id = result.stdout.trim().trim_end_matches('+');
    if result.success() && !id.is_empty() {
        Ok(id.to_string())
    } else {
        Ok(build.commit_id.clone())
    }
}
