use std::{collections::HashMap, sync::Arc};

use crate::{Options, RenderNode};

/// Hook letting a parent-object type reshape the node list before it is
/// rendered; receives the client's options payload for context.
pub type NodeFilter = Arc<dyn Fn(Vec<RenderNode>, &Options) -> Vec<RenderNode> + Send + Sync>;

#[derive(Clone)]
pub struct TreeConfig {
    /// Deepest level a comment may sit at (root is level 0).
    pub max_depth: i32,
    /// Upper bound on comment body size, in bytes.
    pub max_comment_length: usize,
    /// Template for full-tree renders (load, post).
    pub comments_template: String,
    /// Template for single-node renders (edit).
    pub single_comment_template: String,
    /// None means the default filter: drop soft-deleted nodes.
    pub filter_nodes: Option<NodeFilter>,
}

impl Default for TreeConfig {
    fn default() -> TreeConfig {
        TreeConfig {
            max_depth: 3,
            max_comment_length: 10_000,
            comments_template: String::from("comments/comments.html"),
            single_comment_template: String::from("comments/single_comment.html"),
            filter_nodes: None,
        }
    }
}

/// Tree configuration resolved by parent-object type, with a fallback for
/// types nobody registered explicitly.
#[derive(Clone, Default)]
pub struct ConfigRegistry {
    by_type: HashMap<String, TreeConfig>,
    fallback: TreeConfig,
}

impl ConfigRegistry {
    pub fn new(fallback: TreeConfig) -> ConfigRegistry {
        ConfigRegistry {
            by_type: HashMap::new(),
            fallback,
        }
    }

    pub fn register(&mut self, object_type: impl Into<String>, config: TreeConfig) {
        self.by_type.insert(object_type.into(), config);
    }

    pub fn config_for(&self, object_type: &str) -> &TreeConfig {
        self.by_type.get(object_type).unwrap_or(&self.fallback)
    }
}
