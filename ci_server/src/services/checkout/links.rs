//! Hosting links for commits, branches and diagnostics.
//!
//! Pure functions of project reference, revision and kind. No network.

use super::{host_domain, repo_path};
use crate::models::project::{Project, VcsKind};

/// Web root of the repository on its hosting service.
fn base_url(project: &Project) -> Option<String> {
    match project.vcs {
        VcsKind::GitHub | VcsKind::GitLab | VcsKind::Bitbucket | VcsKind::GenericRemote => {
            let domain = host_domain(project)?;
            let path = repo_path(&project.reference);
            if path.is_empty() {
                return None;
            }
            Some(format!("https://{domain}/{path}"))
        }
        VcsKind::Git | VcsKind::Mercurial | VcsKind::Subversion | VcsKind::Local => None,
    }
}

fn known(revision: &str) -> Option<&str> {
    Some(revision.trim()).filter(|r| !r.is_empty())
}

/// `None` when the commit is still unknown.
pub fn commit_link(project: &Project, commit: &str) -> Option<String> {
    let commit = known(commit)?;
    let base = base_url(project)?;
    match project.vcs {
        VcsKind::Bitbucket => Some(format!("{base}/commits/{commit}")),
        _ => Some(format!("{base}/commit/{commit}")),
    }
}

pub fn branch_link(project: &Project, branch: &str) -> Option<String> {
    let branch = known(branch)?;
    let base = base_url(project)?;
    match project.vcs {
        VcsKind::Bitbucket => Some(format!("{base}/branch/{branch}")),
        _ => Some(format!("{base}/tree/{branch}")),
    }
}

/// URL template with `{FILE}` and `{LINE}` placeholders.
pub fn file_link_template(project: &Project, commit: &str) -> Option<String> {
    let commit = known(commit)?;
    let base = base_url(project)?;
    match project.vcs {
        VcsKind::Bitbucket => Some(format!("{base}/src/{commit}/{{FILE}}#{{FILE}}-{{LINE}}")),
        _ => Some(format!("{base}/blob/{commit}/{{FILE}}#L{{LINE}}")),
    }
}

/// Link for a working-copy-relative file and line.
pub fn file_link(project: &Project, commit: &str, file: &str, line: u32) -> Option<String> {
    let template = file_link_template(project, commit)?;
    let file = file.trim_start_matches("./").trim_start_matches('/');
    Some(
        template
            .replace("{FILE}", file)
            .replace("{LINE}", &line.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_revisions_have_no_links() {
        let project = Project::new(1, "demo", VcsKind::GitHub, "acme/widgets");
        assert_eq!(commit_link(&project, ""), None);
        assert_eq!(commit_link(&project, "  "), None);
        assert_eq!(file_link_template(&project, ""), None);
        assert_eq!(file_link(&project, "", "src/A.php", 3), None);
        assert_eq!(branch_link(&project, ""), None);
    }

    #[test]
    fn github_links() {
        let project = Project::new(1, "demo", VcsKind::GitHub, "acme/widgets");
        assert_eq!(
            commit_link(&project, "abc").as_deref(),
            Some("https://github.com/acme/widgets/commit/abc")
        );
        assert_eq!(
            branch_link(&project, "main").as_deref(),
            Some("https://github.com/acme/widgets/tree/main")
        );
        assert_eq!(
            file_link(&project, "abc", "src/A.php", 12).as_deref(),
            Some("https://github.com/acme/widgets/blob/abc/src/A.php#L12")
        );
    }

    #[test]
    fn bitbucket_links() {
        let project = Project::new(1, "demo", VcsKind::Bitbucket, "team/app");
        assert_eq!(
            commit_link(&project, "abc").as_deref(),
            Some("https://bitbucket.org/team/app/commits/abc")
        );
        assert_eq!(
            file_link(&project, "abc", "src/A.php", 3).as_deref(),
            Some("https://bitbucket.org/team/app/src/abc/src/A.php#src/A.php-3")
        );
    }

    #[test]
    fn self_hosted_links_follow_configured_domain() {
        let mut project = Project::new(1, "demo", VcsKind::GitLab, "git@git.example.com:team/app.git");
        project.access.domain = Some("git.example.com".to_string());
        assert_eq!(
            branch_link(&project, "dev").as_deref(),
            Some("https://git.example.com/team/app/tree/dev")
        );

        let generic = Project::new(1, "demo", VcsKind::GenericRemote, "team/app");
        assert_eq!(commit_link(&generic, "abc"), None);
    }

    #[test]
    fn plain_kinds_have_no_links() {
        for vcs in [VcsKind::Git, VcsKind::Mercurial, VcsKind::Subversion, VcsKind::Local] {
            let project = Project::new(1, "demo", vcs, "https://example.com/r.git");
            assert_eq!(commit_link(&project, "abc"), None);
            assert_eq!(file_link_template(&project, "abc"), None);
        }
    }
}
