//! Template types and the built-in prompt set.
//!
//! Defines [`PromptTemplate`] for representing template sources and the
//! built-in templates registered by every [`PromptManager`](crate::PromptManager).

/// Name of the system instruction for commit message generation.
pub const COMMIT_SYSTEM: &str = "commit/system";

/// Name of the user prompt wrapping the diff.
pub const COMMIT_USER: &str = "commit/user";

/// Name of the default pull request body.
pub const PR_BODY: &str = "pr/body";

/// File extension recognized when loading override directories.
pub const TEMPLATE_EXTENSION: &str = "j2";

const COMMIT_SYSTEM_SOURCE: &str = r#"You are a commit message generator. Your task is to create concise, descriptive commit messages that are 1-3 words long.
Rules:
1. Be extremely concise and straightforward
2. Focus on the core change or feature
3. No fluff or unnecessary words
4. No emojis or special characters
5. No conventional commit prefixes (feat:, fix:, etc.)

Examples:
- "fix memory leak"
- "add user auth"
- "optimize queries"
- "remove legacy code"
- "add tests""#;

const COMMIT_USER_SOURCE: &str = "Generate a commit message for this diff:\n\n{{ diff }}";

const PR_BODY_SOURCE: &str =
    "{% if message %}{{ message }}\n\n{% endif %}Created with ghquick{% if branch %} from `{{ branch }}`{% endif %}";

/// Metadata about a prompt template, including its name and source content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    /// Template name used for lookup (e.g., `commit/system`).
    pub name: String,

    /// Raw Jinja2 template source.
    pub source: String,
}

impl PromptTemplate {
    /// Create a template from a name and source.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// Returns the built-in templates in registration order.
pub fn builtin_templates() -> Vec<PromptTemplate> {
    vec![
        PromptTemplate::new(COMMIT_SYSTEM, COMMIT_SYSTEM_SOURCE),
        PromptTemplate::new(COMMIT_USER, COMMIT_USER_SOURCE),
        PromptTemplate::new(PR_BODY, PR_BODY_SOURCE),
    ]
}
