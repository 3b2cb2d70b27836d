use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;

use crate::{CommentNode, ParentRef, UserId};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CanViewComments,
    CanPostComment,
    CanDeleteComment,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::CanViewComments => "can_view_comments",
            Capability::CanPostComment => "can_post_comment",
            Capability::CanDeleteComment => "can_delete_comment",
        })
    }
}

/// Capability check on the parent object. Implementations live with the
/// site owning the parent-object type; the engine only asks questions.
/// `node` is the comment being acted on when the question is node-scoped
/// (for a not-yet-created reply it is the parent node).
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn check(
        &self,
        actor: UserId,
        parent: &ParentRef,
        capability: Capability,
        node: Option<&CommentNode>,
    ) -> anyhow::Result<bool>;
}

/// Default gate: everything is allowed. Deployments register their own
/// gate per parent-object type and keep this only where comments really
/// are world-writable.
pub struct OpenGate;

#[async_trait]
impl PermissionGate for OpenGate {
    async fn check(
        &self,
        _actor: UserId,
        _parent: &ParentRef,
        _capability: Capability,
        _node: Option<&CommentNode>,
    ) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Gates resolved by parent-object type, with an explicit fallback.
#[derive(Clone)]
pub struct GateRegistry {
    by_type: HashMap<String, Arc<dyn PermissionGate>>,
    fallback: Arc<dyn PermissionGate>,
}

impl GateRegistry {
    pub fn new(fallback: Arc<dyn PermissionGate>) -> GateRegistry {
        GateRegistry {
            by_type: HashMap::new(),
            fallback,
        }
    }

    pub fn register(&mut self, object_type: impl Into<String>, gate: Arc<dyn PermissionGate>) {
        self.by_type.insert(object_type.into(), gate);
    }

    pub fn gate_for(&self, object_type: &str) -> &Arc<dyn PermissionGate> {
        self.by_type.get(object_type).unwrap_or(&self.fallback)
    }
}

impl Default for GateRegistry {
    fn default() -> GateRegistry {
        GateRegistry::new(Arc::new(OpenGate))
    }
}

/// Per-node permissions precomputed for rendering, so templates don't have
/// to call back into the gate.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NodeAuth {
    pub can_edit: bool,
    pub can_delete: bool,
}
