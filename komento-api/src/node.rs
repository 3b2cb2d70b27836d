use uuid::Uuid;

use crate::{Time, UserId, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn stub() -> NodeId {
        NodeId(STUB_UUID)
    }
}

/// The content object a discussion tree hangs off of. Comments never look
/// inside it; it is only an addressing key and the value handed to
/// permission gates.
#[derive(Clone, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ParentRef {
    pub object_type: String,
    pub object_id: Uuid,
}

/// The root record of one discussion tree. Stored as a synthetic node at
/// level 0 that carries the parent-object reference and the depth limit;
/// it has no author and no content and is neither editable nor deletable.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TreeRoot {
    pub id: NodeId,
    pub parent: ParentRef,
    pub max_depth: i32,
    pub date: Time,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentNode {
    pub id: NodeId,
    /// Root node of the tree this node belongs to (self for the root).
    pub root: NodeId,
    /// None only for the synthetic root.
    pub parent: Option<NodeId>,
    /// Root is 0; always parent.level + 1.
    pub level: i32,
    pub deleted: bool,
    /// Who soft-deleted this node; kept from the first deletion.
    pub deleted_by: Option<UserId>,
    /// None only for the synthetic root.
    pub created_by: Option<UserId>,
    pub date: Time,
}

impl CommentNode {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
