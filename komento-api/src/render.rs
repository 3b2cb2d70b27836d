use crate::{CommentNode, CommentVersion, NodeAuth, Options, ParentRef};

/// One node as handed to the renderer: the node itself, its displayed
/// content, and what the requesting user may do with it.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct RenderNode {
    pub node: CommentNode,
    /// The synthetic root has no versions; every real comment has at least one.
    pub latest_version: Option<CommentVersion>,
    pub auth: NodeAuth,
}

/// Everything a template needs; the engine fills this in so templates (and
/// API clients) never query the store themselves.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct RenderContext {
    pub parent: ParentRef,
    pub max_depth: i32,
    /// Pre-order: every node appears after its parent.
    pub nodes: Vec<RenderNode>,
    pub options: Options,
}

/// Template rendering is an external concern; the engine only supplies the
/// context and the configured template reference.
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, context: &RenderContext) -> anyhow::Result<String>;
}
