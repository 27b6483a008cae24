//! Template rendering for message views.
//!
//! This module provides:
//! - `TemplateEngine`: the contract a mailer uses to render pending views
//! - `HandlebarsEngine`: Handlebars-based implementation

use async_trait::async_trait;
use eyre::{eyre, Result};
use handlebars::Handlebars;
use serde_json::Value;
use std::path::Path;
use std::sync::RwLock;

/// Renders a template reference into a string.
#[async_trait]
pub trait TemplateEngine: Send + Sync {
    /// Render `template` with `data`
    async fn render(&self, template: &str, data: &Value) -> Result<String>;
}

/// Handlebars-based template engine
///
/// Supports:
/// - Variables: `{{name}}`
/// - Conditionals: `{{#if condition}}...{{/if}}`
/// - Loops: `{{#each items}}...{{/each}}`
/// - HTML escaping: `{{{unescaped}}}` for raw HTML
///
/// Templates are addressed by the name they were registered under, so a view
/// such as `html_view("emails/welcome", data)` renders the template registered
/// as `emails/welcome`.
pub struct HandlebarsEngine {
    handlebars: RwLock<Handlebars<'static>>,
}

impl HandlebarsEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);

        Self {
            handlebars: RwLock::new(handlebars),
        }
    }

    /// Missing variables fail the render instead of rendering empty.
    pub fn strict(self) -> Self {
        self.handlebars
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .set_strict_mode(true);
        self
    }

    /// Register a template from a string
    pub fn register(&self, name: &str, source: &str) -> Result<()> {
        self.handlebars
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .register_template_string(name, source)
            .map_err(|e| eyre!("Failed to register template {}: {}", name, e))
    }

    /// Register a template from a file on disk
    pub fn register_file(&self, name: &str, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.handlebars
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .register_template_file(name, path)
            .map_err(|e| {
                eyre!(
                    "Failed to register template {} from {}: {}",
                    name,
                    path.display(),
                    e
                )
            })
    }

    /// Check if a template exists
    pub fn has_template(&self, name: &str) -> bool {
        self.handlebars
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .has_template(name)
    }
}

impl Default for HandlebarsEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateEngine for HandlebarsEngine {
    async fn render(&self, template: &str, data: &Value) -> Result<String> {
        let handlebars = self.handlebars.read().unwrap_or_else(|e| e.into_inner());

        if !handlebars.has_template(template) {
            return Err(eyre!("Template not found: {}", template));
        }

        handlebars
            .render(template, data)
            .map_err(|e| eyre!("Failed to render {}: {}", template, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_template_rendering() {
        let engine = HandlebarsEngine::new();
        engine
            .register("emails/welcome", "<h1>Welcome, {{name}}!</h1>")
            .unwrap();

        assert!(engine.has_template("emails/welcome"));

        let html = engine
            .render("emails/welcome", &json!({ "name": "John" }))
            .await
            .unwrap();
        assert_eq!(html, "<h1>Welcome, John!</h1>");
    }

    #[tokio::test]
    async fn test_missing_template_fails() {
        let engine = HandlebarsEngine::new();

        let err = engine.render("missing", &Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("Template not found"));
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_missing_variables() {
        let engine = HandlebarsEngine::new().strict();
        engine.register("greeting", "Hello {{name}}").unwrap();

        assert!(engine.render("greeting", &json!({})).await.is_err());
        assert_eq!(
            engine
                .render("greeting", &json!({ "name": "Ada" }))
                .await
                .unwrap(),
            "Hello Ada"
        );
    }
}
