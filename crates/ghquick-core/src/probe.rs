//! Remote state probe (internal).

use tracing::{debug, info, instrument, warn};

use crate::context::WorkingContext;
use crate::error::CoreError;
use crate::exec::{CommandError, CommandFailure};
use crate::git::GitOps;
use crate::lock::remove_stale_locks;

/// Output fragments git prints when the remote branch does not exist yet.
const MISSING_REF_MARKERS: &[&str] = &[
    "couldn't find remote ref",
    "unknown revision",
    "bad revision",
];

/// How a failed probe command is interpreted.
#[derive(Debug)]
enum ProbeFailure {
    /// The remote branch does not exist, so every local commit is unpushed.
    MissingRemoteRef,
    Other(CoreError),
}

impl ProbeFailure {
    fn classify(err: CommandError) -> Self {
        let missing = matches!(&err, CommandError::Failed(failure)
            if MISSING_REF_MARKERS.iter().any(|m| failure.output.contains(m)));
        if missing {
            ProbeFailure::MissingRemoteRef
        } else {
            ProbeFailure::Other(CoreError::from_command(err, CoreError::RemoteProbeFailed))
        }
    }
}

impl GitOps {
    /// Whether the working directory is inside a git repository.
    ///
    /// # Errors
    ///
    /// Only a deadline expiry or a spawn failure is an error; a non-zero exit
    /// means "not a repository".
    pub(crate) async fn is_repository(&self, ctx: &WorkingContext) -> Result<bool, CoreError> {
        match self.git(ctx, &["rev-parse", "--git-dir"]).await {
            Ok(_) => Ok(true),
            Err(CommandError::Failed(_)) => Ok(false),
            Err(e) => Err(CoreError::git("check repository", e)),
        }
    }

    /// Name of the checked-out branch.
    pub(crate) async fn current_branch(&self, ctx: &WorkingContext) -> Result<String, CoreError> {
        let output = self
            .git(ctx, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await
            .map_err(|e| CoreError::git("get current branch", e))?;
        Ok(output.stdout.trim().to_owned())
    }

    /// Whether local `HEAD` has commits the remote branch lacks.
    ///
    /// Fetches `branch` from `remote` first. A missing remote branch counts
    /// as unpushed, so a first push to a new branch is never reported as up
    /// to date.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::RemoteProbeFailed` for any other fetch or
    /// rev-list failure, and `CoreError::Timeout` on deadline expiry.
    #[instrument(skip(self, ctx))]
    pub(crate) async fn has_unpushed_commits(
        &self,
        ctx: &WorkingContext,
        remote: &str,
        branch: &str,
    ) -> Result<bool, CoreError> {
        remove_stale_locks(&ctx.git_dir())?;

        info!("fetching remote state");
        if let Err(err) = self.git(ctx, &["fetch", remote, branch]).await {
            return missing_ref_or_error(err);
        }

        let range = format!("^{remote}/{branch}");
        let output = match self.git(ctx, &["rev-list", "HEAD", &range, "--count"]).await {
            Ok(output) => output,
            Err(err) => return missing_ref_or_error(err),
        };

        let count = output.stdout.trim();
        match count.parse::<u64>() {
            Ok(n) => {
                debug!(unpushed = n, "counted unpushed commits");
                Ok(n > 0)
            }
            Err(_) => {
                warn!(output = count, "unexpected rev-list output");
                Err(CoreError::RemoteProbeFailed(CommandError::Failed(
                    CommandFailure {
                        command: format!("git rev-list HEAD {range} --count"),
                        code: output.code,
                        output: output.output,
                    },
                )))
            }
        }
    }
}

fn missing_ref_or_error(err: CommandError) -> Result<bool, CoreError> {
    match ProbeFailure::classify(err) {
        ProbeFailure::MissingRemoteRef => {
            info!("remote branch doesn't exist yet");
            Ok(true)
        }
        ProbeFailure::Other(err) => Err(err),
    }
}
