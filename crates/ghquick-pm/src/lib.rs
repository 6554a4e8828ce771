mod error;
mod manager;
mod template;

pub use error::PmError;
pub use manager::PromptManager;
pub use template::{COMMIT_SYSTEM, COMMIT_USER, PR_BODY, PromptTemplate, builtin_templates};
