//! Commit message generation.
//!
//! Sends the staged diff to a completion API and normalizes the reply into a
//! short commit message. Generation runs on its own task so the caller can
//! race it against the invocation deadline.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ghquick_pm::{COMMIT_SYSTEM, COMMIT_USER, PmError, PromptManager};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::{GeneratorConfig, PromptsConfig};
use crate::context::WorkingContext;
use crate::error::CoreError;

/// Maximum number of words kept from the model reply.
const MAX_WORDS: usize = 3;

/// Diffs longer than this many bytes are cut before being sent.
const MAX_DIFF_BYTES: usize = 16 * 1024;

/// Errors from commit message generation.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("completion API error: {0}")]
    Api(String),

    #[error("no commit message generated")]
    NoMessageGenerated,

    #[error("failed to render prompt: {0}")]
    Prompt(#[from] PmError),

    #[error("completion request timed out")]
    Timeout,

    #[error("generation task ended without a result")]
    TaskAborted,
}

/// Outcome delivered by a generation task.
pub type GenerateResult = Result<String, GenerateError>;

/// One chat completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A chat completion backend.
#[async_trait]
pub trait CompletionClient: Send + Sync + std::fmt::Debug {
    /// Send one request and return the text of every choice.
    async fn complete(&self, request: &CompletionRequest) -> Result<Vec<String>, GenerateError>;
}

/// Generates commit messages from diffs.
#[derive(Debug)]
pub struct CommitMessageGenerator {
    client: Arc<dyn CompletionClient>,
    prompts: Arc<PromptManager>,
    config: GeneratorConfig,
}

impl CommitMessageGenerator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        prompts: Arc<PromptManager>,
        config: GeneratorConfig,
    ) -> Self {
        Self {
            client,
            prompts,
            config,
        }
    }

    /// Generate a commit message for `diff`.
    ///
    /// Issues exactly one completion request bounded by the context deadline.
    ///
    /// # Errors
    ///
    /// Returns `GenerateError::NoMessageGenerated` when no choice survives
    /// normalization, `GenerateError::Timeout` on deadline expiry, and the
    /// client's error otherwise.
    #[instrument(skip_all, fields(diff_bytes = diff.len()))]
    pub async fn generate(&self, ctx: &WorkingContext, diff: &str) -> GenerateResult {
        let request = self.build_request(diff)?;
        debug!(model = %request.model, "requesting commit message");

        let choices =
            match tokio::time::timeout_at(ctx.deadline(), self.client.complete(&request)).await {
                Ok(choices) => choices?,
                Err(_) => return Err(GenerateError::Timeout),
            };

        let message = choices
            .iter()
            .find_map(|choice| normalize_message(choice))
            .ok_or(GenerateError::NoMessageGenerated)?;

        info!(message = %message, "generated commit message");
        Ok(message)
    }

    /// Run [`generate`](Self::generate) on a spawned task.
    ///
    /// The task delivers exactly one [`GenerateResult`]; if the receiver is
    /// gone the result is dropped.
    pub fn spawn(self: &Arc<Self>, ctx: &WorkingContext, diff: String) -> GenerationTask {
        let (tx, rx) = oneshot::channel();
        let generator = Arc::clone(self);
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let result = generator.generate(&ctx, &diff).await;
            if tx.send(result).is_err() {
                debug!("generation result discarded");
            }
        });

        GenerationTask { rx }
    }

    fn build_request(&self, diff: &str) -> Result<CompletionRequest, GenerateError> {
        let diff = truncate_diff(diff);
        let system = self.prompts.render(COMMIT_SYSTEM, &serde_json::json!({}))?;
        let user = self
            .prompts
            .render(COMMIT_USER, &serde_json::json!({ "diff": diff }))?;

        Ok(CompletionRequest {
            model: self.config.model.clone(),
            system,
            user,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        })
    }
}

/// Handle to a running generation task.
#[derive(Debug)]
pub struct GenerationTask {
    rx: oneshot::Receiver<GenerateResult>,
}

impl GenerationTask {
    /// Wait for the result or the deadline, whichever comes first.
    ///
    /// On deadline the task is left to finish on its own and its late
    /// result is discarded.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Timeout` on deadline expiry and
    /// `CoreError::GenerationFailed` for every other generation failure.
    pub async fn wait_until(mut self, deadline: Instant) -> Result<String, CoreError> {
        tokio::select! {
            biased;
            result = &mut self.rx => match result {
                Ok(Ok(message)) => Ok(message),
                Ok(Err(GenerateError::Timeout)) => Err(generation_timeout()),
                Ok(Err(err)) => Err(CoreError::GenerationFailed(err)),
                Err(_) => Err(CoreError::GenerationFailed(GenerateError::TaskAborted)),
            },
            () = tokio::time::sleep_until(deadline) => {
                warn!("commit message generation timed out");
                Err(generation_timeout())
            }
        }
    }
}

fn generation_timeout() -> CoreError {
    CoreError::Timeout {
        step: "commit message generation".to_owned(),
    }
}

/// Reduce a model reply to a short single-line commit message.
///
/// Keeps the first non-blank line, strips quotes around every word, keeps
/// at most three words, and drops trailing punctuation. Returns `None` when nothing remains.
pub(crate) fn normalize_message(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;

    let message = line
        .split_whitespace()
        .map(|word| word.trim_matches(['"', '\'', '`']))
        .filter(|word| !word.is_empty())
        .take(MAX_WORDS)
        .collect::<Vec<_>>()
        .join(" ");
    let message = message
        .trim_end_matches(['.', '!', '?', ',', ';', ':'])
        .trim();

    (!message.is_empty()).then(|| message.to_owned())
}

fn truncate_diff(diff: &str) -> &str {
    if diff.len() <= MAX_DIFF_BYTES {
        return diff;
    }
    let mut end = MAX_DIFF_BYTES;
    while !diff.is_char_boundary(end) {
        end -= 1;
    }
    debug!(bytes = diff.len(), kept = end, "truncated diff");
    &diff[..end]
}

/// Build a prompt manager with built-ins plus the configured include dirs.
///
/// Relative include directories resolve against `workdir`; missing ones are
/// skipped.
///
/// # Errors
///
/// Returns `CoreError::Prompt` if a template fails to load.
pub fn load_prompts(workdir: &Path, config: &PromptsConfig) -> Result<PromptManager, CoreError> {
    let mut pm = PromptManager::new()?;

    for dir in &config.include {
        let resolved = if dir.is_absolute() {
            dir.clone()
        } else {
            workdir.join(dir)
        };
        if resolved.is_dir() {
            pm.load_dir(&resolved)?;
            debug!(dir = %resolved.display(), "loaded custom prompt directory");
        }
    }

    Ok(pm)
}


#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::testing::FakeCompletion;
    use super::*;

    fn generator(client: Arc<FakeCompletion>) -> Arc<CommitMessageGenerator> {
        let prompts = PromptManager::new().expect("should create prompt manager");
        Arc::new(CommitMessageGenerator::new(
            client,
            Arc::new(prompts),
            GeneratorConfig::default(),
        ))
    }

    fn ctx(timeout: Duration) -> WorkingContext {
        WorkingContext::new(std::env::temp_dir(), false, timeout)
    }

    #[test]
    fn test_should_normalize_model_replies() {
        assert_eq!(normalize_message("\"Fix parser bug.\"").as_deref(), Some("Fix parser bug"));
        assert_eq!(normalize_message("  add tests\n").as_deref(), Some("add tests"));
        assert_eq!(
            normalize_message("add user auth flow").as_deref(),
            Some("add user auth")
        );
        assert_eq!(
            normalize_message("\n\n`optimize queries`\nexplanation").as_deref(),
            Some("optimize queries")
        );
        assert_eq!(normalize_message("   \n  "), None);
        assert_eq!(normalize_message("\"...\""), None);
    }

    #[test]
    fn test_should_strip_quotes_inside_reply() {
        assert_eq!(
            normalize_message("add \"user auth\" flow").as_deref(),
            Some("add user auth")
        );
        assert_eq!(
            normalize_message("`fix` 'cache' \"eviction\" bug").as_deref(),
            Some("fix cache eviction")
        );
        assert_eq!(normalize_message("\" update \"").as_deref(), Some("update"));
    }

    #[test]
    fn test_should_truncate_long_diff_on_char_boundary() {
        let diff = "é".repeat(MAX_DIFF_BYTES);
        let cut = truncate_diff(&diff);
        assert!(cut.len() <= MAX_DIFF_BYTES);
        assert!(cut.chars().all(|c| c == 'é'));
        assert_eq!(truncate_diff("short"), "short");
    }

    #[tokio::test]
    async fn test_should_send_one_request_with_configured_parameters() {
        let client = Arc::new(FakeCompletion::new().reply("Fix parser bug."));
        let generator = generator(client.clone());

        let message = generator
            .generate(&ctx(Duration::from_secs(5)), "+fn parse() {}")
            .await
            .expect("should generate");

        assert_eq!(message, "Fix parser bug");
        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "gpt-4o-mini");
        assert_eq!(requests[0].max_tokens, 10);
        assert!((requests[0].temperature - 0.7).abs() < f32::EPSILON);
        assert!(requests[0].system.contains("1-3 words"));
        assert!(requests[0].user.contains("+fn parse() {}"));
    }

    #[tokio::test]
    async fn test_should_reject_empty_choices() {
        let client = Arc::new(FakeCompletion::new().push(Ok(vec![])));
        let err = generator(client)
            .generate(&ctx(Duration::from_secs(5)), "diff")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::NoMessageGenerated));
    }

    #[tokio::test]
    async fn test_should_reject_blank_choice() {
        let client = Arc::new(FakeCompletion::new().reply("  \n "));
        let err = generator(client)
            .generate(&ctx(Duration::from_secs(5)), "diff")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::NoMessageGenerated));
    }

    #[tokio::test]
    async fn test_should_deliver_result_through_task() {
        let client = Arc::new(FakeCompletion::new().reply("add tests"));
        let ctx = ctx(Duration::from_secs(5));
        let task = generator(client).spawn(&ctx, "diff".to_owned());

        let message = task
            .wait_until(ctx.deadline())
            .await
            .expect("should generate");
        assert_eq!(message, "add tests");
    }

    #[tokio::test]
    async fn test_should_report_api_failure_as_generation_failed() {
        let client = Arc::new(
            FakeCompletion::new().push(Err(GenerateError::Api("HTTP 401".to_owned()))),
        );
        let ctx = ctx(Duration::from_secs(5));
        let err = generator(client)
            .spawn(&ctx, "diff".to_owned())
            .wait_until(ctx.deadline())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::GenerationFailed(GenerateError::Api(_))
        ));
    }

    #[tokio::test]
    async fn test_should_time_out_slow_generation() {
        let client = Arc::new(
            FakeCompletion::new()
                .reply("too late")
                .with_delay(Duration::from_secs(5)),
        );
        let ctx = ctx(Duration::from_millis(50));
        let started = std::time::Instant::now();

        let err = generator(client)
            .spawn(&ctx, "diff".to_owned())
            .wait_until(ctx.deadline())
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_should_load_prompt_overrides_from_include_dirs() {
        let dir = tempfile::TempDir::new().expect("should create temp dir");
        let prompts = dir.path().join("prompts").join("commit");
        fs::create_dir_all(&prompts).expect("should create prompt dir");
        fs::write(prompts.join("system.j2"), "Answer in one word.").expect("should write");

        let config = PromptsConfig {
            include: vec!["prompts".into(), "missing".into()],
        };
        let pm = load_prompts(dir.path(), &config).expect("should load prompts");

        let system = pm
            .render(COMMIT_SYSTEM, &serde_json::json!({}))
            .expect("should render");
        assert_eq!(system, "Answer in one word.");
    }
}
