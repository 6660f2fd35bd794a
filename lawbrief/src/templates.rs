//! Embedded minijinja templates for pages and prompts.
//!
//! Everything under `templates/` is compiled into the binary. Files ending in `.html` are
//! auto-escaped; prompt templates (`prompts/*.txt`) are rendered verbatim.

use minijinja::Environment;
use rust_embed::RustEmbed;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::errors::Result;

#[derive(RustEmbed)]
#[folder = "templates/"]
struct TemplateAssets;

pub const INDEX_PAGE: &str = "index.html";
pub const RESULT_PAGE: &str = "result.html";
pub const BRIEF_PROMPT: &str = "prompts/brief.txt";
pub const REVISION_PROMPT: &str = "prompts/revision.txt";

/// Shared, immutable template environment.
#[derive(Clone)]
pub struct Templates {
    env: Arc<Environment<'static>>,
}

impl Templates {
    /// Parse every embedded template up front so syntax errors fail at startup.
    pub fn load() -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);

        for name in TemplateAssets::iter() {
            let Some(file) = TemplateAssets::get(&name) else {
                continue;
            };
            let source = String::from_utf8(file.data.into_owned()).map_err(|e| crate::errors::Error::Internal {
                operation: format!("decode template {name}: {e}"),
            })?;
            debug!("Loaded template {}", name);
            env.add_template_owned(name.into_owned(), source)?;
        }

        Ok(Self { env: Arc::new(env) })
    }

    /// Render a named template with a serializable context.
    pub fn render<S: Serialize>(&self, name: &str, context: S) -> Result<String> {
        let template = self.env.get_template(name)?;
        Ok(template.render(context)?)
    }
}
