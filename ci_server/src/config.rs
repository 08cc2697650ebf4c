//! Build engine configuration, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct CiConfig {
    /// Root under which per-build working copies are created.
    pub workspace_dir: PathBuf,
    /// Builds executed at the same time by one worker process.
    pub max_concurrent_builds: usize,
    /// Seconds between queue polls when idle.
    pub poll_interval_secs: u64,
    /// Default bound on a single plugin tool invocation.
    pub plugin_timeout_secs: u64,
    /// Bound on each VCS command during checkout.
    pub checkout_timeout_secs: u64,
    /// Running claims older than this are reported as stale.
    pub stale_claim_secs: u64,
    /// Extra directories searched for plugin tools, before `PATH`.
    pub tool_path: Vec<PathBuf>,
    /// Leave working copies on disk after the build.
    pub keep_working_copy: bool,
    /// Identity written into `claimed_by`.
    pub worker_id: String,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("/tmp/sentinel-ci/builds"),
            max_concurrent_builds: 1,
            poll_interval_secs: 5,
            plugin_timeout_secs: 600,
            checkout_timeout_secs: 900,
            stale_claim_secs: 3600,
            tool_path: Vec::new(),
            keep_working_copy: false,
            worker_id: default_worker_id(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("{key}={raw:?} is not valid -- using default");
            default
        }),
        Err(_) => default,
    }
}

/// A zero timeout would expire every command at once.
fn nonzero_secs(key: &str, value: u64, default: u64) -> u64 {
    if value == 0 {
        tracing::warn!("{key}=0 is not a usable timeout -- using {default}s");
        default
    } else {
        value
    }
}

fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}-{}", &suffix[..8])
}

impl CiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let workspace_dir = std::env::var_os("CI_WORKSPACE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace_dir);
        let max_concurrent_builds = env_parse("CI_MAX_CONCURRENT", defaults.max_concurrent_builds);
        let poll_interval_secs = env_parse("CI_POLL_INTERVAL", defaults.poll_interval_secs);
        let plugin_timeout_secs = nonzero_secs(
            "CI_PLUGIN_TIMEOUT",
            env_parse("CI_PLUGIN_TIMEOUT", defaults.plugin_timeout_secs),
            defaults.plugin_timeout_secs,
        );
        let checkout_timeout_secs = nonzero_secs(
            "CI_CHECKOUT_TIMEOUT",
            env_parse("CI_CHECKOUT_TIMEOUT", defaults.checkout_timeout_secs),
            defaults.checkout_timeout_secs,
        );
        let stale_claim_secs = env_parse("CI_STALE_CLAIM_SECS", defaults.stale_claim_secs);
        let tool_path = std::env::var_os("CI_TOOL_PATH")
            .map(|raw| std::env::split_paths(&raw).collect())
            .unwrap_or_default();
        let keep_working_copy = std::env::var("CI_KEEP_WORKING_COPY")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let worker_id = std::env::var("CI_WORKER_ID").unwrap_or(defaults.worker_id);

        if max_concurrent_builds == 0 {
            tracing::warn!("CI_MAX_CONCURRENT=0 -- no builds will run");
        }
        if keep_working_copy {
            tracing::warn!("CI_KEEP_WORKING_COPY set -- working copies are not removed after builds");
        }

        Self {
            workspace_dir,
            max_concurrent_builds,
            poll_interval_secs,
            plugin_timeout_secs,
            checkout_timeout_secs,
            stale_claim_secs,
            tool_path,
            keep_working_copy,
            worker_id,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_secs(self.plugin_timeout_secs)
    }

    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_secs(self.checkout_timeout_secs)
    }

    pub fn stale_claim_after(&self) -> Duration {
        Duration::from_secs(self.stale_claim_secs)
    }
}
