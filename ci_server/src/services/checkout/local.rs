//! Local directory "checkout": a copy of the referenced tree.

use std::path::{Path, PathBuf};

use crate::error::CheckoutError;

pub(super) async fn copy(
    source: &Path,
    target: &Path,
    log: &mut Vec<String>,
) -> Result<(), CheckoutError> {
    log.push(format!("copy {} -> {}", source.display(), target.display()));
    let (source, target) = (source.to_path_buf(), target.to_path_buf());
    tokio::task::spawn_blocking(move || copy_tree(&source, &target))
        .await
        .map_err(|e| CheckoutError::Io {
            path: PathBuf::new(),
            source: std::io::Error::other(e),
        })?
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CheckoutError + '_ {
    move |source| CheckoutError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Recursive copy that leaves out `.git` and does not follow symlinks.
fn copy_tree(source: &Path, target: &Path) -> Result<(), CheckoutError> {
    let meta = std::fs::metadata(source).map_err(io_err(source))?;
    if !meta.is_dir() {
        return Err(CheckoutError::Io {
            path: source.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
        });
    }
    std::fs::create_dir_all(target).map_err(io_err(target))?;

    for entry in std::fs::read_dir(source).map_err(io_err(source))? {
        let entry = entry.map_err(io_err(source))?;
        let from = entry.path();
        if entry.file_name() == ".git" {
            continue;
        }
        let to = target.join(entry.file_name());
        let file_type = entry.file_type().map_err(io_err(&from))?;

        if file_type.is_dir() {
            copy_tree(&from, &to)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            {
                let link = std::fs::read_link(&from).map_err(io_err(&from))?;
                std::os::unix::fs::symlink(link, &to).map_err(io_err(&to))?;
            }
        } else {
            std::fs::copy(&from, &to).map_err(io_err(&from))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copies_tree_without_git_dir() {
        let source = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(source.path().join("src/nested")).expect("mkdir");
        std::fs::create_dir_all(source.path().join(".git/objects")).expect("mkdir");
        std::fs::write(source.path().join("src/nested/a.php"), "<?php\n").expect("write");
        std::fs::write(source.path().join(".git/HEAD"), "ref: refs/heads/main\n").expect("write");

        let dest = tempfile::tempdir().expect("tempdir");
        let target = dest.path().join("build-1");
        let mut log = Vec::new();
        copy(source.path(), &target, &mut log).await.expect("copy");

        assert_eq!(
            std::fs::read_to_string(target.join("src/nested/a.php")).expect("read"),
            "<?php\n"
        );
        assert!(!target.join(".git").exists());
        assert!(source.path().join(".git/HEAD").exists());
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn missing_source_is_an_io_error() {
        let dest = tempfile::tempdir().expect("tempdir");
        let err = copy(Path::new("/definitely/not/here"), &dest.path().join("x"), &mut Vec::new())
            .await
            .expect_err("missing");
        assert!(matches!(err, CheckoutError::Io { .. }));
    }
}
