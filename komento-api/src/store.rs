use async_trait::async_trait;

use crate::{CommentNode, CommentVersion, NodeId, ParentRef, Time, TreeRoot, UserId};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockStatus {
    Acquired,
    /// Another transaction already holds the lock; the caller fails fast
    /// instead of queueing behind it.
    Busy,
}

/// The transactional store a comment tree lives in. One engine operation
/// runs against one store transaction; implementations roll back every
/// write when the transaction is abandoned, and release node locks when it
/// ends either way.
#[async_trait]
pub trait TreeStore: Send {
    /// Insert-or-fetch under a uniqueness constraint: concurrent callers
    /// for the same parent object converge on a single root.
    async fn get_or_create_root(
        &mut self,
        parent: &ParentRef,
        max_depth: i32,
        now: Time,
    ) -> anyhow::Result<TreeRoot>;

    /// The root of the tree `node` belongs to, with the parent object and
    /// depth limit.
    async fn root_of(&mut self, node: &CommentNode) -> anyhow::Result<TreeRoot>;

    async fn node(&mut self, id: NodeId) -> anyhow::Result<Option<CommentNode>>;

    /// Appends a node as the last child of `parent`, at `parent.level + 1`.
    /// Depth limits are the engine's concern and are checked before this
    /// is called.
    async fn insert_node(
        &mut self,
        parent: &CommentNode,
        author: UserId,
        now: Time,
    ) -> anyhow::Result<CommentNode>;

    /// The subtree strictly below `id`, parent before children. Each call
    /// re-queries: the result reflects current state, not a frozen snapshot.
    async fn descendants(&mut self, id: NodeId) -> anyhow::Result<Vec<CommentNode>>;

    /// Number of non-root nodes in the tree, soft-deleted ones included.
    async fn count_descendants(&mut self, root: &TreeRoot) -> anyhow::Result<i64>;

    /// Non-blocking exclusive lock on a node, held until the surrounding
    /// transaction commits or rolls back. Never waits.
    async fn try_lock(&mut self, id: NodeId) -> anyhow::Result<LockStatus>;

    async fn latest_version(&mut self, id: NodeId) -> anyhow::Result<Option<CommentVersion>>;

    /// All versions of a node in chronological order.
    async fn versions(&mut self, id: NodeId) -> anyhow::Result<Vec<CommentVersion>>;

    /// Appends a new version row; never overwrites an existing one.
    async fn append_version(
        &mut self,
        id: NodeId,
        body: &str,
        author: UserId,
        now: Time,
    ) -> anyhow::Result<CommentVersion>;

    /// Flips the soft-delete flag on every listed node. Monotonic: already
    /// deleted nodes keep their original deleter. Returns how many rows
    /// were newly marked.
    async fn mark_deleted(&mut self, ids: &[NodeId], actor: UserId) -> anyhow::Result<u64>;
}
