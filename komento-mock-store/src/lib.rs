//! In-memory [`TreeStore`] with real transaction semantics, plus the
//! permission-gate and event-sink doubles the engine tests drive. Begin a
//! transaction with [`MemStore::begin`]; writes land in a scratch copy that
//! only replaces the shared state on [`MemTxn::commit`]. Dropping the
//! transaction discards the scratch and releases its node locks, the same
//! way a rolled-back database transaction would.

use std::collections::{HashMap, HashSet};

use anyhow::anyhow;
use async_trait::async_trait;
use komento_api::{
    Capability, CommentEvent, CommentNode, CommentVersion, LockStatus, NodeId, ParentRef,
    PermissionGate, Time, TreeRoot, TreeStore, UserId, Uuid, VersionId,
};
use parking_lot::Mutex;

#[derive(Clone, Debug)]
struct RootInfo {
    parent: ParentRef,
    max_depth: i32,
}

#[derive(Clone, Debug)]
struct NodeRow {
    node: CommentNode,
    /// Set only on the synthetic root node.
    root_info: Option<RootInfo>,
    /// Child ids in insertion order.
    children: Vec<NodeId>,
}

#[derive(Clone, Debug, Default)]
struct State {
    nodes: HashMap<NodeId, NodeRow>,
    roots: HashMap<(String, Uuid), NodeId>,
    versions: HashMap<NodeId, Vec<CommentVersion>>,
}

impl State {
    fn tree_root(&self, id: NodeId) -> anyhow::Result<TreeRoot> {
        let row = self
            .nodes
            .get(&id)
            .ok_or_else(|| anyhow!("no node {id:?} in store"))?;
        let info = row
            .root_info
            .as_ref()
            .ok_or_else(|| anyhow!("node {id:?} is not a tree root"))?;
        Ok(TreeRoot {
            id,
            parent: info.parent.clone(),
            max_depth: info.max_depth,
            date: row.node.date,
        })
    }

    fn preorder_below(&self, id: NodeId, out: &mut Vec<CommentNode>) {
        if let Some(row) = self.nodes.get(&id) {
            for child in &row.children {
                if let Some(c) = self.nodes.get(child) {
                    out.push(c.node.clone());
                }
                self.preorder_below(*child, out);
            }
        }
    }
}

#[derive(Default)]
pub struct MemStore {
    state: Mutex<State>,
    locks: Mutex<HashSet<NodeId>>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }

    pub fn begin(&self) -> MemTxn<'_> {
        MemTxn {
            store: self,
            scratch: self.state.lock().clone(),
            held: Vec::new(),
        }
    }

    // Committed-state inspection, for asserting what survived a transaction.

    pub fn node(&self, id: NodeId) -> Option<CommentNode> {
        self.state.lock().nodes.get(&id).map(|r| r.node.clone())
    }

    pub fn root_id(&self, parent: &ParentRef) -> Option<NodeId> {
        self.state
            .lock()
            .roots
            .get(&(parent.object_type.clone(), parent.object_id))
            .copied()
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    pub fn version_count(&self, id: NodeId) -> usize {
        self.state.lock().versions.get(&id).map_or(0, Vec::len)
    }
}

pub struct MemTxn<'s> {
    store: &'s MemStore,
    scratch: State,
    held: Vec<NodeId>,
}

impl MemTxn<'_> {
    pub fn commit(mut self) {
        *self.store.state.lock() = std::mem::take(&mut self.scratch);
        // locks are released by the Drop impl
    }
}

impl Drop for MemTxn<'_> {
    fn drop(&mut self) {
        let mut locks = self.store.locks.lock();
        for id in self.held.drain(..) {
            locks.remove(&id);
        }
    }
}

#[async_trait]
impl TreeStore for MemTxn<'_> {
    async fn get_or_create_root(
        &mut self,
        parent: &ParentRef,
        max_depth: i32,
        now: Time,
    ) -> anyhow::Result<TreeRoot> {
        let key = (parent.object_type.clone(), parent.object_id);
        if let Some(id) = self.scratch.roots.get(&key) {
            return self.scratch.tree_root(*id);
        }
        let id = NodeId(Uuid::new_v4());
        self.scratch.nodes.insert(
            id,
            NodeRow {
                node: CommentNode {
                    id,
                    root: id,
                    parent: None,
                    level: 0,
                    deleted: false,
                    deleted_by: None,
                    created_by: None,
                    date: now,
                },
                root_info: Some(RootInfo {
                    parent: parent.clone(),
                    max_depth,
                }),
                children: Vec::new(),
            },
        );
        self.scratch.roots.insert(key, id);
        self.scratch.tree_root(id)
    }

    async fn root_of(&mut self, node: &CommentNode) -> anyhow::Result<TreeRoot> {
        self.scratch.tree_root(node.root)
    }

    async fn node(&mut self, id: NodeId) -> anyhow::Result<Option<CommentNode>> {
        Ok(self.scratch.nodes.get(&id).map(|r| r.node.clone()))
    }

    async fn insert_node(
        &mut self,
        parent: &CommentNode,
        author: UserId,
        now: Time,
    ) -> anyhow::Result<CommentNode> {
        let id = NodeId(Uuid::new_v4());
        let node = CommentNode {
            id,
            root: parent.root,
            parent: Some(parent.id),
            level: parent.level + 1,
            deleted: false,
            deleted_by: None,
            created_by: Some(author),
            date: now,
        };
        let parent_row = self
            .scratch
            .nodes
            .get_mut(&parent.id)
            .ok_or_else(|| anyhow!("parent node {:?} is not in the store", parent.id))?;
        parent_row.children.push(id);
        self.scratch.nodes.insert(
            id,
            NodeRow {
                node: node.clone(),
                root_info: None,
                children: Vec::new(),
            },
        );
        Ok(node)
    }

    async fn descendants(&mut self, id: NodeId) -> anyhow::Result<Vec<CommentNode>> {
        if !self.scratch.nodes.contains_key(&id) {
            return Err(anyhow!("no node {id:?} in store"));
        }
        let mut out = Vec::new();
        self.scratch.preorder_below(id, &mut out);
        Ok(out)
    }

    async fn count_descendants(&mut self, root: &TreeRoot) -> anyhow::Result<i64> {
        Ok(self
            .scratch
            .nodes
            .values()
            .filter(|r| r.node.root == root.id && r.node.id != root.id)
            .count() as i64)
    }

    async fn try_lock(&mut self, id: NodeId) -> anyhow::Result<LockStatus> {
        if self.held.contains(&id) {
            return Ok(LockStatus::Acquired);
        }
        let mut locks = self.store.locks.lock();
        if locks.contains(&id) {
            return Ok(LockStatus::Busy);
        }
        locks.insert(id);
        self.held.push(id);
        Ok(LockStatus::Acquired)
    }

    async fn latest_version(&mut self, id: NodeId) -> anyhow::Result<Option<CommentVersion>> {
        Ok(self
            .scratch
            .versions
            .get(&id)
            .and_then(|v| v.last())
            .cloned())
    }

    async fn versions(&mut self, id: NodeId) -> anyhow::Result<Vec<CommentVersion>> {
        Ok(self.scratch.versions.get(&id).cloned().unwrap_or_default())
    }

    async fn append_version(
        &mut self,
        id: NodeId,
        body: &str,
        author: UserId,
        now: Time,
    ) -> anyhow::Result<CommentVersion> {
        if !self.scratch.nodes.contains_key(&id) {
            return Err(anyhow!("no node {id:?} in store"));
        }
        let version = CommentVersion {
            id: VersionId(Uuid::new_v4()),
            node: id,
            body: body.to_string(),
            author,
            date: now,
        };
        self.scratch
            .versions
            .entry(id)
            .or_default()
            .push(version.clone());
        Ok(version)
    }

    async fn mark_deleted(&mut self, ids: &[NodeId], actor: UserId) -> anyhow::Result<u64> {
        let mut flipped = 0;
        for id in ids {
            let row = self
                .scratch
                .nodes
                .get_mut(id)
                .ok_or_else(|| anyhow!("no node {id:?} in store"))?;
            if !row.node.deleted {
                row.node.deleted = true;
                row.node.deleted_by = Some(actor);
                flipped += 1;
            }
        }
        Ok(flipped)
    }
}

/// Gate with fixed answers per capability, for exercising denial paths.
pub struct StaticGate {
    pub can_view: bool,
    pub can_post: bool,
    pub can_delete: bool,
}

impl StaticGate {
    pub fn allow_all() -> StaticGate {
        StaticGate {
            can_view: true,
            can_post: true,
            can_delete: true,
        }
    }
}

#[async_trait]
impl PermissionGate for StaticGate {
    async fn check(
        &self,
        _actor: UserId,
        _parent: &ParentRef,
        capability: Capability,
        _node: Option<&CommentNode>,
    ) -> anyhow::Result<bool> {
        Ok(match capability {
            Capability::CanViewComments => self.can_view,
            Capability::CanPostComment => self.can_post,
            Capability::CanDeleteComment => self.can_delete,
        })
    }
}

/// Observer that records everything published to it; can be told to fail,
/// which aborts the operation being observed (the veto path for
/// `pre_delete`).
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CommentEvent>>,
    pub veto: bool,
}

impl RecordingSink {
    pub fn new() -> RecordingSink {
        RecordingSink::default()
    }

    pub fn vetoing() -> RecordingSink {
        RecordingSink {
            events: Mutex::new(Vec::new()),
            veto: true,
        }
    }

    pub fn events(&self) -> Vec<CommentEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl komento_api::EventSink for RecordingSink {
    async fn publish(&self, event: &CommentEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        if self.veto {
            return Err(anyhow!("observer rejected {} event", event.action.name()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use komento_api::Time;

    fn now() -> Time {
        // Fixed timestamp; ordering in the store is append order, not wall clock.
        chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn parent_ref() -> ParentRef {
        ParentRef {
            object_type: String::from("article"),
            object_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn commit_persists_and_drop_discards() {
        let store = MemStore::new();
        let parent = parent_ref();

        let mut txn = store.begin();
        let root = txn.get_or_create_root(&parent, 3, now()).await.unwrap();
        txn.commit();
        assert!(store.node(root.id).is_some());

        let mut txn = store.begin();
        let root_node = txn.node(root.id).await.unwrap().unwrap();
        txn.insert_node(&root_node, UserId::stub(), now())
            .await
            .unwrap();
        drop(txn);
        assert_eq!(store.node_count(), 1, "rolled-back insert must not persist");
    }

    #[tokio::test]
    async fn second_transaction_sees_busy_until_first_ends() {
        let store = MemStore::new();
        let parent = parent_ref();
        let mut setup = store.begin();
        let root = setup.get_or_create_root(&parent, 3, now()).await.unwrap();
        setup.commit();

        let mut a = store.begin();
        let mut b = store.begin();
        assert_eq!(a.try_lock(root.id).await.unwrap(), LockStatus::Acquired);
        assert_eq!(a.try_lock(root.id).await.unwrap(), LockStatus::Acquired);
        assert_eq!(b.try_lock(root.id).await.unwrap(), LockStatus::Busy);
        drop(a);
        assert_eq!(b.try_lock(root.id).await.unwrap(), LockStatus::Acquired);
    }

    #[tokio::test]
    async fn descendants_come_back_in_preorder() {
        let store = MemStore::new();
        let parent = parent_ref();
        let mut txn = store.begin();
        let root = txn.get_or_create_root(&parent, 5, now()).await.unwrap();
        let root_node = txn.node(root.id).await.unwrap().unwrap();
        let a = txn
            .insert_node(&root_node, UserId::stub(), now())
            .await
            .unwrap();
        let a1 = txn.insert_node(&a, UserId::stub(), now()).await.unwrap();
        let b = txn
            .insert_node(&root_node, UserId::stub(), now())
            .await
            .unwrap();
        let got: Vec<NodeId> = txn
            .descendants(root.id)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(got, vec![a.id, a1.id, b.id]);
    }
}
