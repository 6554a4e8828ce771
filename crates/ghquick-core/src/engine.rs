//! Synchronization engine.
//!
//! The [`Engine`] is the main entry point for ghquick-core. It drives one
//! working directory from "dirty, possibly stale" to either "committed and
//! pushed" ([`Engine::sync`]) or "branched and ready for a pull request"
//! ([`Engine::prepare_pull_request`]).

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use ghquick_pm::{PR_BODY, PromptManager};
use tracing::{info, instrument, warn};
use typed_builder::TypedBuilder;

use crate::cache::{RepoCache, RepoInfo};
use crate::config::{Credentials, SyncConfig, load_project_config, project_config_path};
use crate::context::WorkingContext;
use crate::error::CoreError;
use crate::exec::{CommandRunner, ProcessRunner};
use crate::git::{GitOps, PushOutcome, PushPolicy};
use crate::message::{CommitMessageGenerator, load_prompts};
use crate::openai::OpenAiClient;

/// Commit message used when none could be resolved.
const FALLBACK_MESSAGE: &str = "update";

/// Steps of one synchronization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    Initialized,
    UserConfigured,
    RemoteConfigured,
    Staged,
    MessageResolved,
    Committed,
    Pushed,
    Failed,
}

impl SyncState {
    pub(crate) fn enter(self) {
        info!(state = %self, "sync state reached");
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Uninitialized => "uninitialized",
            SyncState::Initialized => "initialized",
            SyncState::UserConfigured => "user_configured",
            SyncState::RemoteConfigured => "remote_configured",
            SyncState::Staged => "staged",
            SyncState::MessageResolved => "message_resolved",
            SyncState::Committed => "committed",
            SyncState::Pushed => "pushed",
            SyncState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Input of [`Engine::sync`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct SyncRequest {
    /// Remote repository name.
    #[builder(setter(into))]
    pub repo_name: String,
    /// Explicit commit message; generated from the diff when absent.
    #[builder(default)]
    pub message: Option<String>,
}

/// Result of [`Engine::sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The working tree was clean; nothing was committed or pushed.
    NothingToCommit,
    Pushed {
        branch: String,
        message: String,
        push: PushOutcome,
    },
}

/// Input of [`Engine::prepare_pull_request`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct PullRequestRequest {
    #[builder(setter(into))]
    pub repo_name: String,
    /// Base branch; the configured base branch when absent.
    #[builder(default)]
    pub base: Option<String>,
    #[builder(default)]
    pub message: Option<String>,
    #[builder(default)]
    pub title: Option<String>,
}

/// A pushed branch ready to be opened as a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDraft {
    pub branch: String,
    pub base: String,
    pub title: String,
    pub message: String,
    pub push: PushOutcome,
}

/// Core engine that drives the push and pull request flows.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use ghquick_core::{Credentials, Engine, SyncRequest, WorkingContext};
///
/// # async fn example() -> Result<(), ghquick_core::CoreError> {
/// let credentials = Credentials::from_env()?;
/// let ctx = WorkingContext::new(".", false, Duration::from_secs(120));
/// let engine = Engine::new(credentials, ctx.workdir())?;
///
/// let request = SyncRequest::builder().repo_name("demo").build();
/// engine.sync(&ctx, &request).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Engine {
    credentials: Credentials,
    config: SyncConfig,
    git: GitOps,
    prompts: Arc<PromptManager>,
    /// Shared with spawned generation tasks.
    generator: Arc<CommitMessageGenerator>,
    cache: Arc<RepoCache>,
}

impl Engine {
    /// Create an engine for `workdir`.
    ///
    /// Loads `.ghquick/config.yaml` (defaults if absent), the prompt
    /// templates, and an OpenAI-backed generator.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Yaml` for an invalid config file and
    /// `CoreError::Prompt` if templates cannot be loaded.
    #[instrument(skip_all)]
    pub fn new(credentials: Credentials, workdir: &Path) -> Result<Self, CoreError> {
        info!(workdir = %workdir.display(), "initializing engine");

        let project = load_project_config(&project_config_path(workdir))?;
        let prompts = Arc::new(load_prompts(workdir, &project.prompts)?);

        let generator_config = project.generator_config();
        let client = OpenAiClient::new(credentials.openai_key(), generator_config.api_base.clone());
        let generator =
            CommitMessageGenerator::new(Arc::new(client), Arc::clone(&prompts), generator_config);

        Ok(Self::with_parts(
            credentials,
            project.sync_config(),
            Arc::new(ProcessRunner),
            prompts,
            Arc::new(generator),
        ))
    }

    /// Assemble an engine from explicit components.
    pub fn with_parts(
        credentials: Credentials,
        config: SyncConfig,
        runner: Arc<dyn CommandRunner>,
        prompts: Arc<PromptManager>,
        generator: Arc<CommitMessageGenerator>,
    ) -> Self {
        Self {
            credentials,
            config,
            git: GitOps::new(runner),
            prompts,
            generator,
            cache: Arc::new(RepoCache::new()),
        }
    }

    /// Share an existing repository info cache.
    pub fn with_cache(mut self, cache: Arc<RepoCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cache(&self) -> &RepoCache {
        &self.cache
    }

    /// Stage, commit, and push all changes to the configured base branch.
    ///
    /// A clean working tree is a successful no-op.
    ///
    /// # Errors
    ///
    /// Returns the typed error of the first failing step.
    #[instrument(skip_all, fields(repo = %request.repo_name))]
    pub async fn sync(
        &self,
        ctx: &WorkingContext,
        request: &SyncRequest,
    ) -> Result<SyncOutcome, CoreError> {
        let result = self.run_sync(ctx, request).await;
        if let Err(e) = &result {
            warn!(state = %SyncState::Failed, error = %e, "sync failed");
        }
        result
    }

    async fn run_sync(
        &self,
        ctx: &WorkingContext,
        request: &SyncRequest,
    ) -> Result<SyncOutcome, CoreError> {
        SyncState::Uninitialized.enter();
        self.git
            .ensure_setup(
                ctx,
                &self.credentials,
                self.config.host(),
                self.config.remote(),
                &request.repo_name,
            )
            .await?;

        match self.git.stage_all(ctx).await {
            Ok(_) => SyncState::Staged.enter(),
            Err(CoreError::NothingToCommit) => {
                warn!("no changes to commit");
                return Ok(SyncOutcome::NothingToCommit);
            }
            Err(e) => return Err(e),
        }

        let message = self.resolve_message(ctx, request.message.as_deref()).await?;
        let message = if message.trim().is_empty() {
            FALLBACK_MESSAGE.to_owned()
        } else {
            message
        };
        SyncState::MessageResolved.enter();

        self.git.commit(ctx, &message).await?;
        SyncState::Committed.enter();

        let branch = self.config.base_branch().to_owned();
        let push = self
            .git
            .push(ctx, self.config.remote(), &branch, self.push_policy())
            .await?;
        SyncState::Pushed.enter();

        self.remember(ctx, &request.repo_name, &branch);
        info!(branch = %branch, "successfully pushed changes");
        Ok(SyncOutcome::Pushed {
            branch,
            message,
            push,
        })
    }

    /// Create a fresh branch from the remote base, commit everything, and push it.
    ///
    /// The commit message is the explicit message, else the title, else a
    /// generated one. The title defaults to the commit message.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotARepository` outside a repository and
    /// `CoreError::NothingToCommit` when there is nothing to put in the PR.
    #[instrument(skip_all, fields(repo = %request.repo_name))]
    pub async fn prepare_pull_request(
        &self,
        ctx: &WorkingContext,
        request: &PullRequestRequest,
    ) -> Result<PullRequestDraft, CoreError> {
        let base = request
            .base
            .clone()
            .unwrap_or_else(|| self.config.base_branch().to_owned());
        let remote = self.config.remote();

        let branch = self.git.create_branch(ctx, remote, &base).await?;

        if let Err(e) = self.git.stage_all(ctx).await {
            if matches!(e, CoreError::NothingToCommit) {
                warn!("no changes to create a pull request from");
            }
            return Err(e);
        }
        SyncState::Staged.enter();

        let explicit = request.message.as_deref().or(request.title.as_deref());
        let message = self.resolve_message(ctx, explicit).await?;
        let message = if message.trim().is_empty() {
            FALLBACK_MESSAGE.to_owned()
        } else {
            message
        };
        SyncState::MessageResolved.enter();

        self.git.commit(ctx, &message).await?;
        SyncState::Committed.enter();

        let push = self.git.push(ctx, remote, &branch, self.push_policy()).await?;
        SyncState::Pushed.enter();

        self.remember(ctx, &request.repo_name, &branch);

        let title = request
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| message.clone());

        Ok(PullRequestDraft {
            branch,
            base,
            title,
            message,
            push,
        })
    }

    /// Repository facts for the working directory, cached for a few minutes.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotARepository` outside a repository.
    pub async fn repo_info(
        &self,
        ctx: &WorkingContext,
        repo_name: &str,
    ) -> Result<RepoInfo, CoreError> {
        if let Some(info) = self.cache.get(ctx.workdir()) {
            return Ok(info);
        }
        if !self.git.is_repository(ctx).await? {
            return Err(CoreError::NotARepository);
        }
        let branch = self.git.current_branch(ctx).await?;
        Ok(self.remember(ctx, repo_name, &branch))
    }

    /// Render the default pull request body.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Prompt` if the template fails to render.
    pub fn render_pr_body(&self, message: &str, branch: &str) -> Result<String, CoreError> {
        let context = serde_json::json!({ "message": message, "branch": branch });
        Ok(self.prompts.render(PR_BODY, &context)?)
    }

    async fn resolve_message(
        &self,
        ctx: &WorkingContext,
        explicit: Option<&str>,
    ) -> Result<String, CoreError> {
        if let Some(message) = explicit.map(str::trim).filter(|m| !m.is_empty()) {
            info!(message, "using provided commit message");
            return Ok(message.to_owned());
        }

        let diff = self.git.diff(ctx).await?;
        info!("generating commit message");
        self.generator
            .spawn(ctx, diff)
            .wait_until(ctx.deadline())
            .await
    }

    fn push_policy(&self) -> PushPolicy {
        PushPolicy {
            attempts: self.config.push_attempts(),
            backoff: self.config.push_backoff(),
        }
    }

    fn remember(&self, ctx: &WorkingContext, repo_name: &str, branch: &str) -> RepoInfo {
        let info = RepoInfo::new(
            repo_name,
            ctx.workdir(),
            self.credentials.public_url(self.config.host(), repo_name),
            branch,
        );
        self.cache.set(ctx.workdir(), info.clone());
        info
    }
}

/// Await `future` but fail with `CoreError::Timeout` once the context
/// deadline passes.
///
/// # Errors
///
/// Returns `CoreError::Timeout` naming `step`, or the future's own error.
pub async fn within_deadline<T, E, F>(
    ctx: &WorkingContext,
    step: &str,
    future: F,
) -> Result<T, CoreError>
where
    F: Future<Output = Result<T, E>>,
    CoreError: From<E>,
{
    match tokio::time::timeout_at(ctx.deadline(), future).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            warn!(step, "operation timed out");
            Err(CoreError::Timeout {
                step: step.to_owned(),
            })
        }
    }
}
