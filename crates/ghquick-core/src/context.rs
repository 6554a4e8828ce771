//! Per-invocation working context.
//!
//! A [`WorkingContext`] is built once per command and passed by reference to
//! every component. It binds child processes to a working directory and every
//! external call to the same deadline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

/// Immutable per-invocation values shared by every component.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ghquick_core::WorkingContext;
///
/// let ctx = WorkingContext::new("/tmp/repo", false, Duration::from_secs(120));
/// assert!(!ctx.is_expired());
/// ```
#[derive(Debug, Clone)]
pub struct WorkingContext {
    workdir: PathBuf,
    debug: bool,
    deadline: Instant,
    envs: Vec<(String, String)>,
}

impl WorkingContext {
    /// Create a context whose deadline is `timeout` from now.
    pub fn new(workdir: impl Into<PathBuf>, debug: bool, timeout: Duration) -> Self {
        Self::with_deadline(workdir, debug, Instant::now() + timeout)
    }

    /// Create a context with an explicit deadline.
    pub fn with_deadline(workdir: impl Into<PathBuf>, debug: bool, deadline: Instant) -> Self {
        Self {
            workdir: workdir.into(),
            debug,
            deadline,
            envs: Vec::new(),
        }
    }

    /// Add an environment variable applied to every child process.
    ///
    /// Consumes and returns the context so it stays immutable once handed out.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Returns the working directory.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Returns the repository metadata directory (`<workdir>/.git`).
    pub fn git_dir(&self) -> PathBuf {
        self.workdir.join(".git")
    }

    /// Returns whether verbose output is enabled.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Returns the invocation deadline.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Returns extra environment variables for child processes.
    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Returns whether the deadline has elapsed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Name of the working directory, used as the default repository name.
    pub fn dir_name(&self) -> Option<&str> {
        self.workdir.file_name().and_then(|n| n.to_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_compute_git_dir() {
        let ctx = WorkingContext::new("/home/user/project", false, Duration::from_secs(1));
        assert_eq!(ctx.git_dir(), PathBuf::from("/home/user/project/.git"));
        assert_eq!(ctx.dir_name(), Some("project"));
    }

    #[tokio::test]
    async fn test_should_report_expired_deadline() {
        let ctx = WorkingContext::with_deadline("/tmp", false, Instant::now());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_should_collect_child_envs() {
        let ctx = WorkingContext::new("/tmp", true, Duration::from_secs(5))
            .env("GIT_CONFIG_GLOBAL", "/tmp/gitconfig")
            .env("GIT_TERMINAL_PROMPT", "0");
        assert!(ctx.debug());
        assert_eq!(ctx.envs().len(), 2);
        assert_eq!(ctx.envs()[0].0, "GIT_CONFIG_GLOBAL");
        assert!(ctx.remaining() > Duration::ZERO);
    }
}
