use uuid::Uuid;

use crate::{NodeId, Time, UserId, STUB_UUID};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct VersionId(pub Uuid);

impl VersionId {
    pub fn stub() -> VersionId {
        VersionId(STUB_UUID)
    }
}

/// One immutable content snapshot of a node. A node's displayed content is
/// always its latest version; editing appends a new one.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentVersion {
    pub id: VersionId,
    pub node: NodeId,
    pub body: String,
    pub author: UserId,
    pub date: Time,
}
