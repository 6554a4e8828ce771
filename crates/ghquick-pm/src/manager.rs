use std::fs;
use std::path::Path;

use minijinja::{Environment, ErrorKind};
use tracing::debug;

use crate::error::PmError;
use crate::template::{PromptTemplate, TEMPLATE_EXTENSION, builtin_templates};

/// Manages prompt templates and renders them with context variables.
///
/// A new manager holds the built-in templates. Templates loaded later with the
/// same name replace the built-in version.
#[derive(Debug)]
pub struct PromptManager {
    env: Environment<'static>,
}

impl PromptManager {
    /// Create a manager with the built-in templates registered.
    ///
    /// # Errors
    ///
    /// Returns `PmError::InvalidTemplate` if a built-in template fails to parse.
    pub fn new() -> Result<Self, PmError> {
        let mut manager = Self {
            env: Environment::new(),
        };
        for template in builtin_templates() {
            manager.add_template(template)?;
        }
        Ok(manager)
    }

    /// Load all `.j2` templates from a directory, recursively.
    ///
    /// The template name is the path relative to `dir` without the extension,
    /// using `/` as separator, so `dir/commit/system.j2` becomes `commit/system`.
    ///
    /// # Errors
    ///
    /// Returns `PmError::Io` if the directory cannot be read and
    /// `PmError::InvalidTemplate` if a file does not parse.
    pub fn load_dir(&mut self, dir: &Path) -> Result<(), PmError> {
        self.load_dir_with_prefix(dir, "")
    }

    fn load_dir_with_prefix(&mut self, dir: &Path, prefix: &str) -> Result<(), PmError> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            if path.is_dir() {
                let nested = format!("{prefix}{stem}/");
                self.load_dir_with_prefix(&path, &nested)?;
                continue;
            }

            if path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXTENSION) {
                continue;
            }

            let source = fs::read_to_string(&path)?;
            let name = format!("{prefix}{stem}");
            debug!(name = %name, path = %path.display(), "loaded prompt override");
            self.add_template(PromptTemplate::new(name, source))?;
        }
        Ok(())
    }

    /// Register a single template, replacing any template with the same name.
    ///
    /// # Errors
    ///
    /// Returns `PmError::InvalidTemplate` if the source does not parse.
    pub fn add_template(&mut self, template: PromptTemplate) -> Result<(), PmError> {
        self.env
            .add_template_owned(template.name.clone(), template.source)
            .map_err(|e| PmError::InvalidTemplate(format!("{}: {e}", template.name)))
    }

    /// Returns whether a template with the given name is registered.
    pub fn has_template(&self, name: &str) -> bool {
        self.env.get_template(name).is_ok()
    }

    /// Render a template by name with the given context.
    ///
    /// # Errors
    ///
    /// Returns `PmError::TemplateNotFound` for unknown names and
    /// `PmError::RenderError` if rendering fails.
    pub fn render(&self, name: &str, ctx: &serde_json::Value) -> Result<String, PmError> {
        let template = self.env.get_template(name).map_err(|e| match e.kind() {
            ErrorKind::TemplateNotFound => PmError::TemplateNotFound(name.to_owned()),
            _ => PmError::RenderError(e.to_string()),
        })?;
        template
            .render(ctx)
            .map_err(|e| PmError::RenderError(format!("{name}: {e}")))
    }
}
