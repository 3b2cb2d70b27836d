use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use komento_api::{
    validate_body, Capability, CommentAction, CommentEvent, CommentNode, CommentRequest,
    CommentResponse, CommentVersion, ConfigRegistry, EventSink, GateRegistry, LockStatus,
    NodeAuth, Options, ParentRef, PermissionGate, RenderContext, RenderNode, Renderer, TreeRoot,
    TreeStore, UserId, VersionId,
};

use crate::Error;

/// Orchestrates one comment operation per store transaction. The caller
/// owns the transaction: commit on `Ok`, roll back on `Err` — nothing here
/// is partially applied on failure.
#[derive(Clone)]
pub struct CommentEngine {
    gates: Arc<GateRegistry>,
    config: Arc<ConfigRegistry>,
    renderer: Arc<dyn Renderer>,
    observers: Arc<Vec<Arc<dyn EventSink>>>,
}

/// What the request turned out to name: a reply not yet persisted, or an
/// existing node together with the version the client last saw.
enum Target {
    Draft {
        parent: CommentNode,
    },
    Existing {
        node: CommentNode,
        previous: Option<VersionId>,
    },
}

impl CommentEngine {
    pub fn new(
        gates: GateRegistry,
        config: ConfigRegistry,
        renderer: Arc<dyn Renderer>,
        observers: Vec<Arc<dyn EventSink>>,
    ) -> CommentEngine {
        CommentEngine {
            gates: Arc::new(gates),
            config: Arc::new(config),
            renderer,
            observers: Arc::new(observers),
        }
    }

    /// Returns the rendered tree for a parent object, creating the root on
    /// first access. Concurrent first loads converge on a single root
    /// through the store's insert-or-fetch.
    pub async fn load<S: TreeStore>(
        &self,
        store: &mut S,
        actor: UserId,
        parent: &ParentRef,
        options: Options,
    ) -> Result<CommentResponse, Error> {
        let cfg = self.config.config_for(&parent.object_type);
        let root = store
            .get_or_create_root(parent, cfg.max_depth, Utc::now())
            .await
            .context("creating tree root")?;

        let gate = self.gates.gate_for(&parent.object_type);
        if !gate
            .check(actor, parent, Capability::CanViewComments, None)
            .await
            .context("checking view permission")?
        {
            return Err(Error::permission_denied(Capability::CanViewComments));
        }

        let root_node = store
            .node(root.id)
            .await
            .context("fetching root node")?
            .ok_or_else(|| anyhow::anyhow!("tree root {:?} has no node row", root.id))?;
        let mut nodes = vec![root_node];
        nodes.extend(store.descendants(root.id).await.context("fetching tree")?);

        let mut rendered = Vec::with_capacity(nodes.len());
        for node in nodes {
            let latest_version = if node.is_root() {
                None
            } else {
                store
                    .latest_version(node.id)
                    .await
                    .with_context(|| format!("fetching latest version of {:?}", node.id))?
            };
            let auth = self.node_auth(gate.as_ref(), actor, parent, &node).await?;
            rendered.push(RenderNode {
                node,
                latest_version,
                auth,
            });
        }
        let rendered = match &cfg.filter_nodes {
            Some(filter) => filter(rendered, &options),
            None => rendered.into_iter().filter(|n| !n.node.deleted).collect(),
        };

        let count = store
            .count_descendants(&root)
            .await
            .context("counting comments")?;
        let context = RenderContext {
            parent: parent.clone(),
            max_depth: root.max_depth,
            nodes: rendered,
            options,
        };
        let html = self
            .renderer
            .render(&cfg.comments_template, &context)
            .context("rendering comment tree")?;
        Ok(CommentResponse {
            number_of_comments: Some(count),
            ..CommentResponse::with_content(html)
        })
    }

    /// Posts a new reply or edits an existing comment, depending on what
    /// the request names. Either way the node's content afterwards is one
    /// appended version; history is never rewritten.
    pub async fn submit<S: TreeStore>(
        &self,
        store: &mut S,
        actor: UserId,
        req: &CommentRequest,
    ) -> Result<CommentResponse, Error> {
        let target = self.resolve_target(store, req).await?;

        // A draft has no persisted row yet, so its tree root (and with it
        // the parent object and depth limit) is reached through the parent
        // node.
        let anchor = match &target {
            Target::Draft { parent } => parent,
            Target::Existing { node, .. } => node,
        };
        let root = store.root_of(anchor).await.context("resolving tree root")?;
        let cfg = self.config.config_for(&root.parent.object_type);
        let gate = self.gates.gate_for(&root.parent.object_type);
        if !gate
            .check(actor, &root.parent, Capability::CanPostComment, Some(anchor))
            .await
            .context("checking post permission")?
        {
            return Err(Error::permission_denied(Capability::CanPostComment));
        }

        match target {
            Target::Draft { parent } => {
                // Checked before any insertion happens, so a too-deep
                // request never creates a node.
                if parent.level >= root.max_depth {
                    return Err(Error::depth_exceeded());
                }
                validate_body(&req.body, cfg.max_comment_length)?;
                let now = Utc::now();
                let node = store
                    .insert_node(&parent, actor, now)
                    .await
                    .context("inserting comment node")?;
                let version = store
                    .append_version(node.id, &req.body, actor, now)
                    .await
                    .context("saving comment version")?;
                self.publish(CommentAction::Post, &node, Some(&version), actor, &req.options)
                    .await?;
                let html = self
                    .render_node(gate.as_ref(), &root, &cfg.comments_template, actor, node, version, &req.options)
                    .await?;
                Ok(CommentResponse::with_content(html))
            }
            Target::Existing { node, previous } => {
                if let LockStatus::Busy = store
                    .try_lock(node.id)
                    .await
                    .context("locking comment node")?
                {
                    return Err(Error::concurrent_edit());
                }
                // Re-read under the lock: the client's captured version may
                // have been superseded between its page load and now.
                let latest = store
                    .latest_version(node.id)
                    .await
                    .context("fetching latest version")?
                    .ok_or_else(Error::not_found)?;
                if previous.map_or(false, |p| p != latest.id) {
                    return Err(Error::stale_edit());
                }
                validate_body(&req.body, cfg.max_comment_length)?;
                let version = store
                    .append_version(node.id, &req.body, actor, Utc::now())
                    .await
                    .context("saving comment version")?;
                self.publish(CommentAction::Edit, &node, Some(&version), actor, &req.options)
                    .await?;
                let html = self
                    .render_node(gate.as_ref(), &root, &cfg.single_comment_template, actor, node, version, &req.options)
                    .await?;
                Ok(CommentResponse::with_content(html))
            }
        }
    }

    /// Soft-deletes a comment and all of its current descendants. Takes no
    /// lock: the flag only ever flips one way, so racing deletes are
    /// harmless, and re-deleting an already-deleted node still succeeds.
    pub async fn delete<S: TreeStore>(
        &self,
        store: &mut S,
        actor: UserId,
        req: &CommentRequest,
    ) -> Result<CommentResponse, Error> {
        let id = req
            .node
            .ok_or_else(|| Error::invalid_target("The request does not name a comment to delete."))?;
        let node = store
            .node(id)
            .await
            .context("fetching comment node")?
            .ok_or_else(Error::not_found)?;
        if node.is_root() {
            return Err(Error::invalid_target("The discussion root cannot be deleted."));
        }
        let root = store.root_of(&node).await.context("resolving tree root")?;
        let gate = self.gates.gate_for(&root.parent.object_type);
        if !gate
            .check(actor, &root.parent, Capability::CanDeleteComment, Some(&node))
            .await
            .context("checking delete permission")?
        {
            return Err(Error::permission_denied(Capability::CanDeleteComment));
        }

        // Observers hear about the delete before anything flips and can
        // abort it by failing. From here on failures surface generically;
        // the chain goes to the log.
        let result: anyhow::Result<()> = async {
            self.publish(CommentAction::PreDelete, &node, None, actor, &req.options)
                .await?;
            let mut targets = vec![node.id];
            targets.extend(
                store
                    .descendants(node.id)
                    .await
                    .context("collecting descendants")?
                    .into_iter()
                    .map(|n| n.id),
            );
            store
                .mark_deleted(&targets, actor)
                .await
                .context("marking nodes deleted")?;
            Ok(())
        }
        .await;
        match result {
            Ok(()) => Ok(CommentResponse::ok()),
            Err(err) => {
                tracing::error!(?err, node = ?node.id, "comment deletion failed");
                Err(Error::delete_failed())
            }
        }
    }

    async fn resolve_target<S: TreeStore>(
        &self,
        store: &mut S,
        req: &CommentRequest,
    ) -> Result<Target, Error> {
        match (req.node, req.parent) {
            (Some(id), _) => {
                let node = store
                    .node(id)
                    .await
                    .context("fetching target node")?
                    .ok_or_else(Error::not_found)?;
                if node.is_root() {
                    return Err(Error::invalid_target("The discussion root cannot be edited."));
                }
                if node.deleted {
                    return Err(Error::invalid_target("You cannot edit a deleted comment."));
                }
                Ok(Target::Existing {
                    node,
                    previous: req.previous_version,
                })
            }
            (None, Some(parent_id)) => {
                let parent = store
                    .node(parent_id)
                    .await
                    .context("fetching parent node")?
                    .ok_or_else(Error::not_found)?;
                if parent.deleted {
                    return Err(Error::invalid_target("You cannot reply to a deleted comment."));
                }
                Ok(Target::Draft { parent })
            }
            (None, None) => Err(Error::invalid_target(
                "The request names neither a comment nor a parent to reply under.",
            )),
        }
    }

    async fn node_auth(
        &self,
        gate: &dyn PermissionGate,
        actor: UserId,
        parent: &ParentRef,
        node: &CommentNode,
    ) -> Result<NodeAuth, Error> {
        Ok(NodeAuth {
            can_edit: gate
                .check(actor, parent, Capability::CanPostComment, Some(node))
                .await
                .context("checking per-node edit permission")?,
            can_delete: gate
                .check(actor, parent, Capability::CanDeleteComment, Some(node))
                .await
                .context("checking per-node delete permission")?,
        })
    }

    async fn render_node(
        &self,
        gate: &dyn PermissionGate,
        root: &TreeRoot,
        template: &str,
        actor: UserId,
        node: CommentNode,
        version: CommentVersion,
        options: &Options,
    ) -> Result<String, Error> {
        let auth = self.node_auth(gate, actor, &root.parent, &node).await?;
        let context = RenderContext {
            parent: root.parent.clone(),
            max_depth: root.max_depth,
            nodes: vec![RenderNode {
                node,
                latest_version: Some(version),
                auth,
            }],
            options: options.clone(),
        };
        Ok(self
            .renderer
            .render(template, &context)
            .context("rendering comment")?)
    }

    async fn publish(
        &self,
        action: CommentAction,
        node: &CommentNode,
        version: Option<&CommentVersion>,
        actor: UserId,
        options: &Options,
    ) -> anyhow::Result<()> {
        let event = CommentEvent {
            action,
            node: node.clone(),
            actor,
            version: version.cloned(),
            options: options.clone(),
        };
        for sink in self.observers.iter() {
            sink.publish(&event)
                .await
                .with_context(|| format!("delivering {} event", action.name()))?;
        }
        Ok(())
    }
}
