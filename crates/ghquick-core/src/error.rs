use std::path::PathBuf;

use thiserror::Error;

use crate::exec::CommandError;
use crate::github::ApiError;
use crate::message::GenerateError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not a git repository - please run this command from within a git repository")]
    NotARepository,

    #[error("failed to remove lock file {}: {source}", .path.display())]
    LockCleanupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stage files: {0}")]
    StagingFailed(#[source] CommandError),

    #[error("no changes to commit")]
    NothingToCommit,

    #[error("failed to get diff: {0}")]
    DiffUnavailable(#[source] CommandError),

    #[error("failed to generate commit message: {0}")]
    GenerationFailed(#[from] GenerateError),

    #[error("failed to commit: {0}")]
    CommitFailed(#[source] CommandError),

    #[error("failed to push after {attempts} attempt(s): {source}")]
    PushFailed {
        attempts: u32,
        #[source]
        source: Box<CoreError>,
    },

    #[error("failed to check remote: {0}")]
    RemoteProbeFailed(#[source] CommandError),

    #[error("operation timed out during {step}")]
    Timeout { step: String },

    #[error("{0} environment variable is required")]
    ConfigurationMissing(&'static str),

    #[error(transparent)]
    RemoteApi(#[from] ApiError),

    #[error("{step} failed: {source}")]
    Git {
        step: &'static str,
        #[source]
        source: CommandError,
    },

    #[error("prompt error: {0}")]
    Prompt(#[from] ghquick_pm::PmError),

    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Wrap a command failure for the given step.
    ///
    /// A deadline expiry always becomes [`CoreError::Timeout`] regardless of
    /// the step, so callers never retry past the deadline.
    pub(crate) fn from_command(err: CommandError, wrap: fn(CommandError) -> CoreError) -> Self {
        match err {
            CommandError::Timeout { command, .. } => CoreError::Timeout { step: command },
            other => wrap(other),
        }
    }

    /// Wrap a command failure from a git step outside the named taxonomy
    /// (init, config, remote, fetch, branch, single push attempts).
    pub(crate) fn git(step: &'static str, err: CommandError) -> Self {
        match err {
            CommandError::Timeout { command, .. } => CoreError::Timeout { step: command },
            source => CoreError::Git { step, source },
        }
    }

    /// Returns whether the error is fatal regardless of retry policy.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            CoreError::NotARepository
                | CoreError::LockCleanupFailed { .. }
                | CoreError::ConfigurationMissing(_)
                | CoreError::Timeout { .. }
        )
    }
}
