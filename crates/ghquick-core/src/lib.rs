mod cache;
mod config;
mod context;
mod engine;
mod error;
mod exec;
mod git;
mod github;
mod lock;
mod message;
mod openai;
mod probe;
#[cfg(test)]
mod stub;

pub use cache::{DEFAULT_TTL, RepoCache, RepoInfo};
pub use config::{
    AiConfig, Credentials, ENV_GITHUB_TOKEN, ENV_GITHUB_USERNAME, ENV_OPENAI_KEY, GeneratorConfig,
    GitConfig, ProjectConfig, PromptsConfig, SyncConfig, load_project_config, project_config_path,
};
pub use context::WorkingContext;
pub use engine::{
    Engine, PullRequestDraft, PullRequestRequest, SyncOutcome, SyncRequest, SyncState,
    within_deadline,
};
pub use error::CoreError;
pub use exec::{CommandError, CommandFailure, CommandResult, CommandRunner, ProcessRunner};
pub use git::PushOutcome;
pub use github::{ApiError, GitHubClient, PullRequest, Repository, RepositoryStatus};
pub use message::{
    CommitMessageGenerator, CompletionClient, CompletionRequest, GenerateError, GenerateResult,
    GenerationTask, load_prompts,
};
pub use openai::OpenAiClient;
