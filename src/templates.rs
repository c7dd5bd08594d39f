//! # Templates Module
//!
//! HTML rendering is reached only through [`TemplateRenderer`]. Responses whose
//! envelope names a template are rendered when a renderer is configured and the
//! client accepts HTML; JSON clients get the envelope instead.
//!
//! [`TemplateDir`] is the bundled implementation: it loads `<dir>/<name>.html`
//! and renders it with `minijinja`, using the envelope payload as context.

use minijinja::Environment;
use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),
    #[error("invalid template name: {0:?}")]
    InvalidName(String),
    #[error("failed to read template {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render template {name}: {source}")]
    Render {
        name: String,
        #[source]
        source: minijinja::Error,
    },
}

/// Renders a named view with a JSON context.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, name: &str, context: &Value) -> Result<String, TemplateError>;
}

/// Templates read from a directory on every render, so edits show up without a
/// restart.
#[derive(Debug, Clone)]
pub struct TemplateDir {
    base_dir: PathBuf,
}

impl TemplateDir {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self { base_dir: base.into() }
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `name` may use `/` to reach subdirectories; `..`, absolute paths and
    /// empty names are rejected.
    fn map_name(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() {
            return None;
        }
        let mut pb = self.base_dir.clone();
        for comp in Path::new(name).components() {
            match comp {
                Component::Normal(s) => pb.push(s),
                _ => return None,
            }
        }
        pb.set_extension("html");
        Some(pb)
    }
}

impl TemplateRenderer for TemplateDir {
    fn render(&self, name: &str, context: &Value) -> Result<String, TemplateError> {
        let path = self
            .map_name(name)
            .ok_or_else(|| TemplateError::InvalidName(name.to_string()))?;
        if !path.is_file() {
            return Err(TemplateError::NotFound(name.to_string()));
        }
        let source = fs::read_to_string(&path).map_err(|source| TemplateError::Io {
            name: name.to_string(),
            source,
        })?;

        let render_err = |source| TemplateError::Render {
            name: name.to_string(),
            source,
        };
        let mut env = Environment::new();
        env.add_template(name, &source).map_err(render_err)?;
        let html = env
            .get_template(name)
            .and_then(|tmpl| tmpl.render(context))
            .map_err(render_err)?;

        debug!(template = %name, html_size_bytes = html.len(), "Template rendered");
        Ok(html)
    }
}
