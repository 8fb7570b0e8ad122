//! Template types used by the prompt manager.
//!
//! Defines [`PromptTemplate`] for representing template sources and the
//! built-in instruction templates that ship with the crate.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// File extensions recognized by [`PromptManager::load_dir`](crate::PromptManager::load_dir).
pub const TEMPLATE_EXTENSIONS: &[&str] = &["j2", "jinja"];

/// Metadata about a prompt template, including its name and source content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Template name used for lookup (e.g., `market`).
    pub name: String,

    /// Raw Jinja2 template source.
    pub source: String,
}

impl PromptTemplate {
    /// Create a template from a name and its source.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Build a template from a file on disk, named after the file stem.
    ///
    /// Returns `Ok(None)` when the file does not carry a template extension.
    pub(crate) fn from_path(path: &Path) -> Result<Option<Self>, crate::PmError> {
        let is_template = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| TEMPLATE_EXTENSIONS.contains(&ext));
        if !is_template {
            return Ok(None);
        }

        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            return Ok(None);
        };

        let source = std::fs::read_to_string(path)?;
        Ok(Some(Self::new(name, source)))
    }
}

/// Instruction templates bundled with the crate, one per pipeline stage.
pub(crate) fn builtin_templates() -> Vec<PromptTemplate> {
    vec![
        PromptTemplate::new("extraction", include_str!("../templates/extraction.j2")),
        PromptTemplate::new("market", include_str!("../templates/market.j2")),
        PromptTemplate::new("script", include_str!("../templates/script.j2")),
        PromptTemplate::new("refine", include_str!("../templates/refine.j2")),
        PromptTemplate::new("aroll", include_str!("../templates/aroll.j2")),
        PromptTemplate::new("broll", include_str!("../templates/broll.j2")),
        PromptTemplate::new("compose", include_str!("../templates/compose.j2")),
    ]
}
