//! Build queue and storage.
//!
//! [`BuildStore`] is the only persistence seam of the engine. Claiming is a
//! single conditional update (Pending → Running under one lock), never a
//! read followed by a write, so concurrent workers get exactly one winner.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::models::build::{Build, BuildStatus, NewBuild};
use crate::models::build_error::BuildError;
use crate::models::project::Project;

/// Result of trying to claim a specific build.
#[derive(Debug)]
pub enum ClaimOutcome {
    Claimed(Box<Build>),
    /// Someone else moved it out of Pending first.
    AlreadyClaimed { status: BuildStatus, by: Option<String> },
}

#[async_trait]
pub trait BuildStore: Send + Sync {
    async fn project(&self, project_id: i64) -> Result<Project, StoreError>;

    async fn enqueue(&self, new_build: NewBuild) -> Result<Build, StoreError>;

    /// Claim the oldest pending build, if any.
    async fn claim_next(&self, worker: &str) -> Result<Option<Build>, StoreError>;

    /// Claim one specific build.
    async fn claim(&self, build_id: i64, worker: &str) -> Result<ClaimOutcome, StoreError>;

    /// Persist a build held by `build.claimed_by`. Rejected if another worker
    /// holds it, the stored copy is already terminal, the status change is
    /// not a legal transition, or `finished` disagrees with the status.
    async fn update(&self, build: &Build) -> Result<(), StoreError>;

    async fn get(&self, build_id: i64) -> Result<Option<Build>, StoreError>;

    async fn add_errors(&self, build_id: i64, errors: Vec<BuildError>) -> Result<(), StoreError>;

    async fn errors(&self, build_id: i64) -> Result<Vec<BuildError>, StoreError>;

    /// Ask the owning worker to stop. Returns false if the build is finished.
    async fn request_cancel(&self, build_id: i64) -> Result<bool, StoreError>;

    async fn cancel_requested(&self, build_id: i64) -> Result<bool, StoreError>;

    /// Running builds claimed before `cutoff`; input for external reconciliation.
    async fn stale_claims(&self, cutoff: DateTime<Utc>) -> Result<Vec<Build>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    projects: HashMap<i64, Project>,
    builds: BTreeMap<i64, Build>,
    errors: HashMap<i64, Vec<BuildError>>,
    cancelled: HashSet<i64>,
}

/// In-process store.
#[derive(Default)]
pub struct MemoryBuildStore {
    state: Mutex<MemoryState>,
}

impl MemoryBuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_project(&self, project: Project) {
        let mut state = self.state.lock().await;
        tracing::debug!(project_id = project.id, name = %project.name, "Project registered");
        state.projects.insert(project.id, project);
    }
}

fn claim_in(state: &mut MemoryState, build_id: i64, worker: &str) -> Result<ClaimOutcome, StoreError> {
    let build = state
        .builds
        .get_mut(&build_id)
        .ok_or(StoreError::BuildNotFound(build_id))?;

    if build.status != BuildStatus::Pending {
        return Ok(ClaimOutcome::AlreadyClaimed {
            status: build.status,
            by: build.claimed_by.clone(),
        });
    }

    build
        .start(worker, Utc::now())
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    crate::metrics::build_status_changed(BuildStatus::Running);
    Ok(ClaimOutcome::Claimed(Box::new(build.clone())))
}

#[async_trait]
impl BuildStore for MemoryBuildStore {
    async fn project(&self, project_id: i64) -> Result<Project, StoreError> {
        let state = self.state.lock().await;
        state
            .projects
            .get(&project_id)
            .cloned()
            .ok_or(StoreError::ProjectNotFound(project_id))
    }

    async fn enqueue(&self, new_build: NewBuild) -> Result<Build, StoreError> {
        let mut state = self.state.lock().await;
        if !state.projects.contains_key(&new_build.project_id) {
            return Err(StoreError::ProjectNotFound(new_build.project_id));
        }

        state.next_id += 1;
        let build = Build::new(state.next_id, new_build, Utc::now());
        state.builds.insert(build.id, build.clone());

        crate::metrics::build_status_changed(BuildStatus::Pending);
        tracing::info!(
            build_id = build.id,
            project_id = build.project_id,
            branch = %build.branch,
            "Build created"
        );
        Ok(build)
    }

    async fn claim_next(&self, worker: &str) -> Result<Option<Build>, StoreError> {
        let mut state = self.state.lock().await;
        let pending = state
            .builds
            .values()
            .find(|b| b.status == BuildStatus::Pending)
            .map(|b| b.id);

        match pending {
            Some(build_id) => match claim_in(&mut state, build_id, worker)? {
                ClaimOutcome::Claimed(build) => Ok(Some(*build)),
                ClaimOutcome::AlreadyClaimed { .. } => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn claim(&self, build_id: i64, worker: &str) -> Result<ClaimOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let outcome = claim_in(&mut state, build_id, worker)?;
        if let ClaimOutcome::AlreadyClaimed { by, .. } = &outcome {
            crate::metrics::claim_conflict();
            tracing::debug!(build_id, worker, holder = ?by, "Build already claimed");
        }
        Ok(outcome)
    }

    async fn update(&self, build: &Build) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let stored = state
            .builds
            .get_mut(&build.id)
            .ok_or(StoreError::BuildNotFound(build.id))?;

        if stored.is_terminal() {
            return Err(StoreError::AlreadyFinished(build.id));
        }
        if stored.claimed_by != build.claimed_by {
            return Err(StoreError::LeaseLost {
                build_id: build.id,
                worker: build.claimed_by.clone().unwrap_or_default(),
            });
        }

        if stored.status != build.status && !stored.status.can_become(build.status) {
            return Err(StoreError::IllegalTransition {
                build_id: build.id,
                from: stored.status,
                to: build.status,
            });
        }
        if build.finished.is_some() != build.is_terminal() {
            return Err(StoreError::FinishedMismatch(build.id, build.status));
        }

        *stored = build.clone();
        if build.is_terminal() {
            state.cancelled.remove(&build.id);
        }
        Ok(())
    }

    async fn get(&self, build_id: i64) -> Result<Option<Build>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.builds.get(&build_id).cloned())
    }

    async fn add_errors(&self, build_id: i64, errors: Vec<BuildError>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.builds.contains_key(&build_id) {
            return Err(StoreError::BuildNotFound(build_id));
        }
        if let Some(foreign) = errors.iter().find(|e| e.build_id != build_id) {
            return Err(StoreError::BuildNotFound(foreign.build_id));
        }
        state.errors.entry(build_id).or_default().extend(errors);
        Ok(())
    }

    async fn errors(&self, build_id: i64) -> Result<Vec<BuildError>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.errors.get(&build_id).cloned().unwrap_or_default())
    }

    async fn request_cancel(&self, build_id: i64) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let build = state
            .builds
            .get(&build_id)
            .ok_or(StoreError::BuildNotFound(build_id))?;
        if build.is_terminal() {
            return Ok(false);
        }
        state.cancelled.insert(build_id);
        tracing::info!(build_id, "Cancellation requested");
        Ok(true)
    }

    async fn cancel_requested(&self, build_id: i64) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state.cancelled.contains(&build_id))
    }

    async fn stale_claims(&self, cutoff: DateTime<Utc>) -> Result<Vec<Build>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .builds
            .values()
            .filter(|b| b.status == BuildStatus::Running)
            .filter(|b| b.claimed_at.is_some_and(|at| at < cutoff))
            .cloned()
            .collect())
    }
}
