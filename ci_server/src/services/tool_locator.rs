//! Resolves plugin tool names to executables.
//!
//! Candidates are looked up in the working copy first (`vendor/bin`, then
//! the root), then in the configured search directories. Search-directory
//! hits are cached for the life of the process until [`PathToolLocator::invalidate`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait ToolLocator: Send + Sync {
    /// First existing executable among `candidates`, in order.
    fn find(&self, candidates: &[&str], working_copy: &Path) -> Option<PathBuf>;
}

#[derive(Debug, Default)]
pub struct PathToolLocator {
    search_dirs: Vec<PathBuf>,
    cache: Mutex<HashMap<String, PathBuf>>,
}

impl PathToolLocator {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// `extra_dirs` followed by every `PATH` entry.
    pub fn from_env(extra_dirs: &[PathBuf]) -> Self {
        let mut dirs = extra_dirs.to_vec();
        if let Some(path) = std::env::var_os("PATH") {
            dirs.extend(std::env::split_paths(&path));
        }
        Self::new(dirs)
    }

    /// Forget cached lookups, e.g. after tools were installed or removed.
    pub fn invalidate(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn search(&self, name: &str) -> Option<PathBuf> {
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            return Some(hit.clone());
        }

        let found = self
            .search_dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))?;

        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), found.clone());
        Some(found)
    }
}

impl ToolLocator for PathToolLocator {
    fn find(&self, candidates: &[&str], working_copy: &Path) -> Option<PathBuf> {
        for name in candidates {
            for local in [working_copy.join("vendor").join("bin").join(name), working_copy.join(name)] {
                if is_executable(&local) {
                    return Some(local);
                }
            }
        }
        candidates.iter().find_map(|name| self.search(name))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn touch_executable(path: &Path) {
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, "#!/bin/sh\n").expect("write");
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    }

    #[test]
    fn prefers_working_copy_vendor_bin() {
        let wc = tempfile::tempdir().expect("tempdir");
        let tools = tempfile::tempdir().expect("tempdir");
        touch_executable(&wc.path().join("vendor/bin/phpunit"));
        touch_executable(&tools.path().join("phpunit"));

        let locator = PathToolLocator::new(vec![tools.path().to_path_buf()]);
        assert_eq!(
            locator.find(&["phpunit"], wc.path()),
            Some(wc.path().join("vendor/bin/phpunit"))
        );
    }

    #[test]
    fn falls_back_through_candidates() {
        let wc = tempfile::tempdir().expect("tempdir");
        let tools = tempfile::tempdir().expect("tempdir");
        touch_executable(&tools.path().join("phpspec.php"));

        let locator = PathToolLocator::new(vec![tools.path().to_path_buf()]);
        assert_eq!(
            locator.find(&["phpspec", "phpspec.php"], wc.path()),
            Some(tools.path().join("phpspec.php"))
        );
        assert_eq!(locator.find(&["phpcpd"], wc.path()), None);
    }

    #[test]
    fn ignores_non_executable_files() {
        let wc = tempfile::tempdir().expect("tempdir");
        std::fs::write(wc.path().join("phpcpd"), "not executable").expect("write");
        let locator = PathToolLocator::new(Vec::new());
        assert_eq!(locator.find(&["phpcpd"], wc.path()), None);
    }

    #[test]
    fn cache_survives_until_invalidated() {
        let wc = tempfile::tempdir().expect("tempdir");
        let tools = tempfile::tempdir().expect("tempdir");
        let tool = tools.path().join("phpcpd");
        touch_executable(&tool);

        let locator = PathToolLocator::new(vec![tools.path().to_path_buf()]);
        assert_eq!(locator.find(&["phpcpd"], wc.path()), Some(tool.clone()));

        std::fs::remove_file(&tool).expect("remove");
        assert_eq!(locator.find(&["phpcpd"], wc.path()), Some(tool.clone()));

        locator.invalidate();
        assert_eq!(locator.find(&["phpcpd"], wc.path()), None);
    }
}
