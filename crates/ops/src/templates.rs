use std::path::PathBuf;

use anyhow::{Context, Result};
use handlebars::Handlebars;
use serde_json::Value as Json;

/// Renders a named template file with a set of variables.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, vars: &Json) -> Result<String>;
}

/// Handlebars templates loaded from a directory on every render, so edits
/// are picked up without a restart.
pub struct HandlebarsRenderer {
    dir: PathBuf,
    hb: Handlebars<'static>,
}

impl HandlebarsRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let mut hb = Handlebars::new();
        // Manifests are YAML, not HTML.
        hb.register_escape_fn(handlebars::no_escape);
        Self { dir: dir.into(), hb }
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render(&self, template: &str, vars: &Json) -> Result<String> {
        let path = self.dir.join(template);
        let src = std::fs::read_to_string(&path).with_context(|| format!("unable to parse template {}", path.display()))?;
        self.hb
            .render_template(&src, vars)
            .with_context(|| format!("unable to execute template {}", template))
    }
}
