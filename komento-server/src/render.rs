use anyhow::Context;
use komento_api::{RenderContext, Renderer};

/// Renderer for API-driven frontends: the configured template lives
/// client-side, so the server hands over the fully assembled context as
/// JSON and lets the client do the templating.
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, _template: &str, context: &RenderContext) -> anyhow::Result<String> {
        serde_json::to_string(context).context("serializing render context")
    }
}
