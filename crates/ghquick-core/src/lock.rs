//! Stale lock sanitizer (internal).
//!
//! An interrupted git process can leave `index.lock` or `HEAD.lock` behind,
//! after which every mutating command fails with "repository locked". This
//! tool assumes one invocation per directory at a time, so such locks are
//! removed before each mutating operation.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::CoreError;

/// Lock artifacts removed from the repository metadata directory.
const LOCK_FILES: &[&str] = &["index.lock", "HEAD.lock"];

/// Remove stale lock files under `git_dir`.
///
/// Returns the paths that were removed. A missing `git_dir` is not an error.
///
/// # Errors
///
/// Returns `CoreError::LockCleanupFailed` if a present lock cannot be deleted.
pub(crate) fn remove_stale_locks(git_dir: &Path) -> Result<Vec<PathBuf>, CoreError> {
    let mut removed = Vec::new();

    for name in LOCK_FILES {
        let path = git_dir.join(name);
        if !path.exists() {
            continue;
        }

        warn!(path = %path.display(), "found stale lock file");
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "removed stale lock file");
                removed.push(path);
            }
            // Another process released it between the check and the delete.
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(CoreError::LockCleanupFailed { path, source }),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_remove_both_lock_files() {
        let dir = tempfile::TempDir::new().expect("should create temp dir");
        let git_dir = dir.path().join(".git");
        fs::create_dir_all(&git_dir).expect("should create .git");
        fs::write(git_dir.join("index.lock"), "").expect("should write");
        fs::write(git_dir.join("HEAD.lock"), "").expect("should write");
        fs::write(git_dir.join("config"), "").expect("should write");

        let removed = remove_stale_locks(&git_dir).expect("should clean locks");

        assert_eq!(removed.len(), 2);
        assert!(!git_dir.join("index.lock").exists());
        assert!(!git_dir.join("HEAD.lock").exists());
        assert!(git_dir.join("config").exists(), "other files are untouched");
    }

    #[test]
    fn test_should_noop_without_locks() {
        let dir = tempfile::TempDir::new().expect("should create temp dir");
        let git_dir = dir.path().join(".git");
        fs::create_dir_all(&git_dir).expect("should create .git");

        let removed = remove_stale_locks(&git_dir).expect("should succeed");
        assert!(removed.is_empty());
    }

    #[test]
    fn test_should_noop_without_git_dir() {
        let dir = tempfile::TempDir::new().expect("should create temp dir");
        let removed = remove_stale_locks(&dir.path().join(".git")).expect("should succeed");
        assert!(removed.is_empty());
    }

    #[test]
    fn test_should_fail_when_lock_cannot_be_removed() {
        let dir = tempfile::TempDir::new().expect("should create temp dir");
        let git_dir = dir.path().join(".git");
        // A non-empty directory named like the lock cannot be removed with remove_file.
        let blocker = git_dir.join("index.lock");
        fs::create_dir_all(blocker.join("nested")).expect("should create blocker");

        let err = remove_stale_locks(&git_dir).unwrap_err();
        assert!(matches!(err, CoreError::LockCleanupFailed { path, .. } if path == blocker));
    }
}
