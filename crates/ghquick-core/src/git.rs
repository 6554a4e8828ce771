//! Git operations module (internal).
//!
//! Provides repository setup, staging, diffing, committing, branch creation,
//! and the push retry policy. All git commands go through a
//! [`CommandRunner`]; mutating commands clear stale lock files first.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use backon::{ConstantBuilder, Retryable};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::Credentials;
use crate::context::WorkingContext;
use crate::engine::SyncState;
use crate::error::CoreError;
use crate::exec::{CommandError, CommandResult, CommandRunner};
use crate::lock::remove_stale_locks;

/// Result of a successful push step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The plain push succeeded.
    Pushed,
    /// The push failed but the remote already had every local commit.
    AlreadyUpToDate,
    /// The remote diverged and was overwritten with a forced push.
    ForcePushed,
}

/// Push retry settings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PushPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

/// Runs git commands for one working directory.
///
/// Holds the command runner only; every call takes the per-invocation
/// [`WorkingContext`], so one `GitOps` can serve any number of invocations.
#[derive(Debug, Clone)]
pub(crate) struct GitOps {
    runner: Arc<dyn CommandRunner>,
}

impl GitOps {
    /// Create a new `GitOps` backed by the given runner.
    pub(crate) fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Run a git command without touching lock files.
    pub(crate) async fn git(
        &self,
        ctx: &WorkingContext,
        args: &[&str],
    ) -> Result<CommandResult, CommandError> {
        self.runner.run(ctx, "git", args).await
    }

    /// Clear stale locks, then run a mutating git command.
    pub(crate) async fn git_mut(
        &self,
        ctx: &WorkingContext,
        args: &[&str],
        on_error: impl FnOnce(CommandError) -> CoreError,
    ) -> Result<CommandResult, CoreError> {
        remove_stale_locks(&ctx.git_dir())?;
        self.git(ctx, args).await.map_err(on_error)
    }

    /// Bring the working directory to a configured repository.
    ///
    /// Runs `init` when `.git` is missing, always sets the global user name,
    /// and adds or overwrites the remote with a credential-embedded URL.
    /// Repeated calls only rewrite the remote URL to the same value.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Git` naming the failing step, or `CoreError::Timeout`.
    #[instrument(skip(self, ctx, credentials), fields(workdir = %ctx.workdir().display()))]
    pub(crate) async fn ensure_setup(
        &self,
        ctx: &WorkingContext,
        credentials: &Credentials,
        host: &str,
        remote: &str,
        repo_name: &str,
    ) -> Result<(), CoreError> {
        if ctx.git_dir().exists() {
            info!("git repository already initialized");
        } else {
            info!("initializing git repository");
            self.git(ctx, &["init"])
                .await
                .map_err(|e| CoreError::git("git init", e))?;
            info!("git repository initialized");
        }
        SyncState::Initialized.enter();

        info!("configuring git user");
        self.git(
            ctx,
            &["config", "--global", "user.name", credentials.github_username()],
        )
        .await
        .map_err(|e| CoreError::git("configure git user", e))?;
        SyncState::UserConfigured.enter();

        info!(remote, "checking remote configuration");
        let url = credentials.remote_url(host, repo_name);
        match self.git(ctx, &["remote", "get-url", remote]).await {
            Ok(_) => {
                info!(remote, "updating remote");
                self.git_mut(ctx, &["remote", "set-url", remote, &url], |e| {
                    CoreError::git("update remote", e)
                })
                .await?;
                info!(remote, "remote updated");
            }
            Err(CommandError::Failed(_)) => {
                info!(remote, "adding remote");
                self.git_mut(ctx, &["remote", "add", remote, &url], |e| {
                    CoreError::git("add remote", e)
                })
                .await?;
                info!(remote, "remote added");
            }
            Err(e) => return Err(CoreError::git("check remote", e)),
        }
        SyncState::RemoteConfigured.enter();

        Ok(())
    }

    /// Stage every change in the working tree.
    ///
    /// Tries `add -A` and falls back once to `add <workdir>`. Returns the
    /// `status --porcelain` output captured after staging.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NothingToCommit` when the status is empty and
    /// `CoreError::StagingFailed` when both staging strategies fail.
    #[instrument(skip_all)]
    pub(crate) async fn stage_all(&self, ctx: &WorkingContext) -> Result<String, CoreError> {
        info!("staging all changes");

        if let Err(err) = self
            .git_mut(ctx, &["add", "-A"], |e| {
                CoreError::from_command(e, CoreError::StagingFailed)
            })
            .await
        {
            if err.is_structural() {
                return Err(err);
            }
            warn!(error = %err, "failed to stage with -A, trying explicit path");
            let path = ctx.workdir().to_string_lossy().into_owned();
            self.git_mut(ctx, &["add", &path], |e| {
                CoreError::from_command(e, CoreError::StagingFailed)
            })
            .await?;
        }

        let status = self
            .git(ctx, &["status", "--porcelain"])
            .await
            .map_err(|e| CoreError::from_command(e, CoreError::StagingFailed))?;

        if status.stdout.trim().is_empty() {
            warn!("no changes to stage");
            return Err(CoreError::NothingToCommit);
        }

        info!("changes staged");
        debug!(files = %status.stdout.trim_end(), "staged files");
        Ok(status.stdout)
    }

    /// Get the staged diff, falling back to the unstaged diff on failure.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::DiffUnavailable` if both diff commands fail.
    #[instrument(skip_all)]
    pub(crate) async fn diff(&self, ctx: &WorkingContext) -> Result<String, CoreError> {
        info!("getting changes");
        let output = match self.git(ctx, &["diff", "--cached"]).await {
            Ok(output) => output,
            Err(CommandError::Timeout { command, .. }) => {
                return Err(CoreError::Timeout { step: command });
            }
            Err(err) => {
                debug!(error = %err, "no staged diff, checking unstaged changes");
                self.git(ctx, &["diff"])
                    .await
                    .map_err(|e| CoreError::from_command(e, CoreError::DiffUnavailable))?
            }
        };

        if output.stdout.is_empty() {
            warn!("no changes detected in diff");
        } else {
            debug!(bytes = output.stdout.len(), "changes detected");
        }
        Ok(output.stdout)
    }

    /// Commit staged changes with the given message.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::CommitFailed` with the captured git output.
    #[instrument(skip(self, ctx))]
    pub(crate) async fn commit(&self, ctx: &WorkingContext, message: &str) -> Result<(), CoreError> {
        info!("committing changes");
        self.git_mut(ctx, &["commit", "-m", message], |e| {
            CoreError::from_command(e, CoreError::CommitFailed)
        })
        .await?;
        info!("changes committed");
        Ok(())
    }

    /// Push `branch` to `remote` under the retry and force policy.
    ///
    /// Each attempt pushes normally; on failure the probe decides whether the
    /// remote is already up to date (success, no force) or diverged (exactly
    /// one forced push). Attempts are separated by a fixed backoff and stop
    /// as soon as the deadline has passed.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Timeout` when the deadline passes, structural errors
    /// unchanged, and `CoreError::PushFailed` wrapping the last attempt's error
    /// once all attempts are used.
    #[instrument(skip(self, ctx, policy))]
    pub(crate) async fn push(
        &self,
        ctx: &WorkingContext,
        remote: &str,
        branch: &str,
        policy: PushPolicy,
    ) -> Result<PushOutcome, CoreError> {
        let attempts = policy.attempts.max(1);
        let deadline = ctx.deadline();
        let backoff = ConstantBuilder::default()
            .with_delay(policy.backoff)
            .with_max_times(attempts as usize - 1);

        let mut attempt = 0u32;
        let result = (|| {
            attempt += 1;
            let current = attempt;
            async move {
                if current > 1 {
                    check_deadline(ctx, "push retry")?;
                    warn!(attempt = current, attempts, "retrying push");
                }
                self.push_attempt(ctx, remote, branch).await
            }
        })
        .retry(backoff)
        .sleep(move |delay: Duration| {
            tokio::time::sleep(delay.min(deadline.saturating_duration_since(Instant::now())))
        })
        .when(|err: &CoreError| !err.is_structural())
        .notify(|err: &CoreError, delay: Duration| {
            warn!(error = %err, ?delay, "push attempt failed");
        })
        .await;

        match result {
            Ok(outcome) => {
                info!(?outcome, "changes pushed successfully");
                Ok(outcome)
            }
            Err(err) if err.is_structural() => Err(err),
            Err(err) => Err(CoreError::PushFailed {
                attempts,
                source: Box::new(err),
            }),
        }
    }

    async fn push_attempt(
        &self,
        ctx: &WorkingContext,
        remote: &str,
        branch: &str,
    ) -> Result<PushOutcome, CoreError> {
        info!(remote, branch, "pushing");
        let err = match self
            .git_mut(ctx, &["push", "-u", remote, branch], |e| CoreError::git("push", e))
            .await
        {
            Ok(_) => return Ok(PushOutcome::Pushed),
            Err(err) if err.is_structural() => return Err(err),
            Err(err) => err,
        };
        debug!(error = %err, "push rejected, checking remote state");

        if !self.has_unpushed_commits(ctx, remote, branch).await? {
            info!("already up to date");
            return Ok(PushOutcome::AlreadyUpToDate);
        }

        info!(remote, branch, "retrying push with force");
        self.git_mut(ctx, &["push", "-u", "-f", remote, branch], |e| {
            CoreError::git("force push", e)
        })
        .await?;
        Ok(PushOutcome::ForcePushed)
    }

    /// Create and switch to a fresh `update-<timestamp>` branch.
    ///
    /// The branch starts from the fetched `remote/base` tip rather than the
    /// possibly stale local base branch.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotARepository` outside a repository and
    /// `CoreError::Git` if fetching or checkout fails.
    #[instrument(skip(self, ctx))]
    pub(crate) async fn create_branch(
        &self,
        ctx: &WorkingContext,
        remote: &str,
        base: &str,
    ) -> Result<String, CoreError> {
        if !self.is_repository(ctx).await? {
            return Err(CoreError::NotARepository);
        }

        let branch = branch_name(SystemTime::now());

        info!(remote, base, "fetching latest changes");
        self.git_mut(ctx, &["fetch", remote, base], |e| {
            CoreError::git("fetch base branch", e)
        })
        .await?;

        info!(branch = %branch, "creating new branch");
        let start_point = format!("{remote}/{base}");
        self.git_mut(ctx, &["checkout", "-b", &branch, &start_point], |e| {
            CoreError::git("create branch", e)
        })
        .await?;
        info!(branch = %branch, "created and switched to new branch");

        Ok(branch)
    }
}

/// Branch name for a pull request created at `now`.
///
/// Second granularity: two invocations within the same second collide.
pub(crate) fn branch_name(now: SystemTime) -> String {
    let secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    format!("update-{secs}")
}

fn check_deadline(ctx: &WorkingContext, step: &str) -> Result<(), CoreError> {
    if ctx.is_expired() {
        warn!(step, "operation timed out");
        return Err(CoreError::Timeout {
            step: step.to_owned(),
        });
    }
    Ok(())
}
