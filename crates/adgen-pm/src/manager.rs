use std::collections::BTreeSet;
use std::path::Path;

use minijinja::{AutoEscape, Environment, ErrorKind, UndefinedBehavior};
use tracing::debug;

use crate::error::PmError;
use crate::template::{PromptTemplate, builtin_templates};

/// Manages prompt templates and renders them with context variables.
///
/// A new manager starts with the built-in stage instructions registered.
/// Templates added later with the same name replace the built-in ones, which
/// is how user override directories take effect.
#[derive(Debug)]
pub struct PromptManager {
    env: Environment<'static>,
    names: BTreeSet<String>,
}

impl PromptManager {
    /// Create a manager preloaded with the built-in templates.
    ///
    /// # Errors
    ///
    /// Returns `PmError::InvalidTemplate` if a built-in template fails to parse.
    pub fn new() -> Result<Self, PmError> {
        let mut pm = Self::empty();
        for template in builtin_templates() {
            pm.add_template(template)?;
        }
        Ok(pm)
    }

    /// Create a manager with no templates registered.
    pub fn empty() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        Self {
            env,
            names: BTreeSet::new(),
        }
    }

    /// Load all `.j2` / `.jinja` templates from a directory.
    ///
    /// Each file is registered under its file stem, so `market.j2` overrides
    /// the built-in `market` template. Subdirectories are ignored.
    ///
    /// # Errors
    ///
    /// Returns `PmError::Io` if the directory or a file cannot be read.
    /// Returns `PmError::InvalidTemplate` if a template fails to parse.
    pub fn load_dir(&mut self, dir: &Path) -> Result<(), PmError> {
        let mut paths = std::fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()?;
        paths.sort();

        for path in paths {
            if !path.is_file() {
                continue;
            }
            if let Some(template) = PromptTemplate::from_path(&path)? {
                debug!(name = %template.name, path = %path.display(), "loaded template");
                self.add_template(template)?;
            }
        }
        Ok(())
    }

    /// Register a single template.
    ///
    /// # Errors
    ///
    /// Returns `PmError::InvalidTemplate` if the source fails to parse.
    pub fn add_template(&mut self, template: PromptTemplate) -> Result<(), PmError> {
        let PromptTemplate { name, source } = template;
        self.env
            .add_template_owned(name.clone(), source)
            .map_err(|e| PmError::InvalidTemplate(format!("{name}: {e}")))?;
        self.names.insert(name);
        Ok(())
    }

    /// Render a template by name with the given context.
    ///
    /// # Errors
    ///
    /// Returns `PmError::TemplateNotFound` if no template has that name.
    /// Returns `PmError::RenderError` if rendering fails, including when the
    /// template references a variable missing from `ctx`.
    pub fn render(&self, name: &str, ctx: &serde_json::Value) -> Result<String, PmError> {
        let template = self.env.get_template(name).map_err(|e| match e.kind() {
            ErrorKind::TemplateNotFound => PmError::TemplateNotFound(name.to_owned()),
            _ => PmError::RenderError(format!("{name}: {e}")),
        })?;

        template
            .render(ctx)
            .map_err(|e| PmError::RenderError(format!("{name}: {e}")))
    }

    /// Returns the names of all registered templates, sorted.
    pub fn list_templates(&self) -> Vec<&str> {
        self.names.iter().map(String::as_str).collect()
    }
}
