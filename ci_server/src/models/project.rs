//! Project — a registered repository with its build definition.
//!
//! Owned by the system of record; the engine only reads it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::pipeline::PipelineDefinition;

/// Version-control backend a project is checked out from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VcsKind {
    Git,
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "gitlab")]
    GitLab,
    Bitbucket,
    Mercurial,
    Subversion,
    Local,
    GenericRemote,
}

impl VcsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VcsKind::Git => "git",
            VcsKind::GitHub => "github",
            VcsKind::GitLab => "gitlab",
            VcsKind::Bitbucket => "bitbucket",
            VcsKind::Mercurial => "mercurial",
            VcsKind::Subversion => "subversion",
            VcsKind::Local => "local",
            VcsKind::GenericRemote => "generic_remote",
        }
    }
}

impl fmt::Display for VcsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host details used to build SSH clone URLs and hosting links.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessInformation {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Credential material. Consumed only by checkout; never logged.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    #[serde(default)]
    pub ssh_private_key: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl Credentials {
    /// The private key, if one is present after trimming.
    pub fn private_key(&self) -> Option<&str> {
        self.ssh_private_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssh_private_key", &self.private_key().map(|_| "<redacted>"))
            .field("access_token", &self.token().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub vcs: VcsKind,
    /// URL, `owner/repo` slug or local path, depending on `vcs`.
    pub reference: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default)]
    pub access: AccessInformation,
    #[serde(default, skip_serializing)]
    pub credentials: Credentials,
    #[serde(default)]
    pub pipeline: PipelineDefinition,
}

fn default_branch() -> String {
    "main".to_string()
}

impl Project {
    pub fn new(id: i64, name: &str, vcs: VcsKind, reference: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            vcs,
            reference: reference.to_string(),
            default_branch: default_branch(),
            access: AccessInformation::default(),
            credentials: Credentials::default(),
            pipeline: PipelineDefinition::default(),
        }
    }
}
