#![cfg(test)]

use std::sync::Arc;

use komento_api::{
    Capability, CommentAction, CommentNode, CommentRequest, CommentResponse, ConfigRegistry,
    Error as ApiError, EventSink, GateRegistry, LockStatus, NodeId, Options, ParentRef,
    RenderContext, TreeConfig, TreeStore, UserId, Uuid, VersionId,
};
use komento_mock_store::{MemStore, RecordingSink, StaticGate};

use crate::{engine::CommentEngine, render::JsonRenderer, Error};

fn engine_with(gate: StaticGate, observers: Vec<Arc<dyn EventSink>>) -> CommentEngine {
    let mut config = ConfigRegistry::default();
    config.register(
        "article",
        TreeConfig {
            max_depth: 2,
            ..TreeConfig::default()
        },
    );
    CommentEngine::new(
        GateRegistry::new(Arc::new(gate)),
        config,
        Arc::new(JsonRenderer),
        observers,
    )
}

fn engine() -> CommentEngine {
    engine_with(StaticGate::allow_all(), Vec::new())
}

fn article() -> ParentRef {
    ParentRef {
        object_type: String::from("article"),
        object_id: Uuid::new_v4(),
    }
}

fn user() -> UserId {
    UserId(Uuid::new_v4())
}

fn post_req(parent: NodeId, body: &str) -> CommentRequest {
    CommentRequest {
        parent: Some(parent),
        node: None,
        previous_version: None,
        body: String::from(body),
        options: Options::new(),
    }
}

fn edit_req(node: NodeId, previous: Option<VersionId>, body: &str) -> CommentRequest {
    CommentRequest {
        parent: None,
        node: Some(node),
        previous_version: previous,
        body: String::from(body),
        options: Options::new(),
    }
}

fn delete_req(node: NodeId) -> CommentRequest {
    CommentRequest {
        parent: None,
        node: Some(node),
        previous_version: None,
        body: String::new(),
        options: Options::new(),
    }
}

async fn load(
    engine: &CommentEngine,
    store: &MemStore,
    actor: UserId,
    parent: &ParentRef,
) -> Result<CommentResponse, Error> {
    let mut txn = store.begin();
    match engine.load(&mut txn, actor, parent, Options::new()).await {
        Ok(resp) => {
            txn.commit();
            Ok(resp)
        }
        Err(err) => Err(err),
    }
}

async fn submit(
    engine: &CommentEngine,
    store: &MemStore,
    actor: UserId,
    req: CommentRequest,
) -> Result<CommentResponse, Error> {
    let mut txn = store.begin();
    match engine.submit(&mut txn, actor, &req).await {
        Ok(resp) => {
            txn.commit();
            Ok(resp)
        }
        Err(err) => Err(err),
    }
}

async fn delete(
    engine: &CommentEngine,
    store: &MemStore,
    actor: UserId,
    req: CommentRequest,
) -> Result<CommentResponse, Error> {
    let mut txn = store.begin();
    match engine.delete(&mut txn, actor, &req).await {
        Ok(resp) => {
            txn.commit();
            Ok(resp)
        }
        Err(err) => Err(err),
    }
}

/// The JsonRenderer serializes the render context, so responses can be
/// decoded right back for inspection.
fn context_of(resp: &CommentResponse) -> RenderContext {
    serde_json::from_str(resp.html_content.as_ref().expect("response had no content"))
        .expect("response content was not a render context")
}

fn node_of(resp: &CommentResponse) -> CommentNode {
    context_of(resp).nodes[0].node.clone()
}

/// Sets up a tree and returns its root node id.
async fn rooted(engine: &CommentEngine, store: &MemStore, actor: UserId) -> (ParentRef, NodeId) {
    let parent = article();
    load(engine, store, actor, &parent).await.unwrap();
    let root = store.root_id(&parent).expect("load did not create a root");
    (parent, root)
}

#[tokio::test]
async fn load_creates_the_root_lazily_and_only_once() {
    let store = MemStore::new();
    let engine = engine();
    let parent = article();
    let actor = user();

    assert!(store.root_id(&parent).is_none());
    let first = load(&engine, &store, actor, &parent).await.unwrap();
    assert_eq!(first.number_of_comments, Some(0));
    let root = store.root_id(&parent).unwrap();

    load(&engine, &store, actor, &parent).await.unwrap();
    assert_eq!(store.root_id(&parent), Some(root));
    assert_eq!(store.node_count(), 1);
}

#[tokio::test]
async fn replies_nest_until_the_depth_limit() {
    let store = MemStore::new();
    let engine = engine();
    let actor = user();
    let (_, root) = rooted(&engine, &store, actor).await;

    // max_depth is 2: two levels of replies fit, the third does not.
    let a = node_of(&submit(&engine, &store, actor, post_req(root, "first")).await.unwrap());
    let b = node_of(&submit(&engine, &store, actor, post_req(a.id, "second")).await.unwrap());
    assert_eq!(a.level, 1);
    assert_eq!(b.level, a.level + 1);
    assert_eq!(b.parent, Some(a.id));

    let nodes_before = store.node_count();
    let err = submit(&engine, &store, actor, post_req(b.id, "third"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api(ApiError::DepthExceeded)));
    assert_eq!(
        store.node_count(),
        nodes_before,
        "a rejected reply must not create a node"
    );
}

#[tokio::test]
async fn editing_appends_a_version_instead_of_rewriting() {
    let store = MemStore::new();
    let engine = engine();
    let actor = user();
    let (_, root) = rooted(&engine, &store, actor).await;

    let posted = submit(&engine, &store, actor, post_req(root, "original"))
        .await
        .unwrap();
    let a = node_of(&posted);
    let v1 = context_of(&posted).nodes[0]
        .latest_version
        .clone()
        .unwrap();

    let edited = submit(&engine, &store, actor, edit_req(a.id, Some(v1.id), "updated"))
        .await
        .unwrap();
    let v2 = context_of(&edited).nodes[0]
        .latest_version
        .clone()
        .unwrap();

    assert_ne!(v1.id, v2.id);
    assert_eq!(v2.body, "updated");
    assert_eq!(store.version_count(a.id), 2);

    // Reading the latest version is idempotent while nobody edits.
    let mut txn = store.begin();
    let first_read = txn.latest_version(a.id).await.unwrap().unwrap();
    let second_read = txn.latest_version(a.id).await.unwrap().unwrap();
    assert_eq!(first_read.id, second_read.id);
    assert_eq!(first_read.id, v2.id);
}

#[tokio::test]
async fn stale_edits_are_rejected_without_saving() {
    let store = MemStore::new();
    let engine = engine();
    let alice = user();
    let bob = user();
    let (_, root) = rooted(&engine, &store, alice).await;

    let posted = submit(&engine, &store, alice, post_req(root, "original"))
        .await
        .unwrap();
    let a = node_of(&posted);
    let v1 = context_of(&posted).nodes[0]
        .latest_version
        .clone()
        .unwrap();

    // Bob edits while Alice still has v1 on screen.
    submit(&engine, &store, bob, edit_req(a.id, Some(v1.id), "bob's take"))
        .await
        .unwrap();

    let err = submit(&engine, &store, alice, edit_req(a.id, Some(v1.id), "alice's take"))
        .await
        .unwrap_err();
    match err {
        Error::Api(err) => {
            assert_eq!(err, ApiError::StaleEdit);
            assert!(err.user_message().contains("refresh"));
        }
        other => panic!("expected a stale edit failure, got {other:?}"),
    }
    assert_eq!(store.version_count(a.id), 2, "the stale edit must not save");
}

#[tokio::test]
async fn edits_without_a_captured_version_skip_the_freshness_check() {
    let store = MemStore::new();
    let engine = engine();
    let actor = user();
    let (_, root) = rooted(&engine, &store, actor).await;

    let a = node_of(&submit(&engine, &store, actor, post_req(root, "one")).await.unwrap());
    submit(&engine, &store, actor, edit_req(a.id, None, "two"))
        .await
        .unwrap();
    submit(&engine, &store, actor, edit_req(a.id, None, "three"))
        .await
        .unwrap();
    assert_eq!(store.version_count(a.id), 3);
}

#[tokio::test]
async fn a_concurrent_editor_fails_fast_and_retries_after_release() {
    let store = MemStore::new();
    let engine = engine();
    let actor = user();
    let (_, root) = rooted(&engine, &store, actor).await;

    let a = node_of(&submit(&engine, &store, actor, post_req(root, "contended")).await.unwrap());

    // A rival transaction holds the node lock for its whole lifetime.
    let mut rival = store.begin();
    assert_eq!(rival.try_lock(a.id).await.unwrap(), LockStatus::Acquired);

    let err = submit(&engine, &store, actor, edit_req(a.id, None, "blocked"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api(ApiError::ConcurrentEdit)));
    assert_eq!(store.version_count(a.id), 1, "the losing edit must not save");

    // Lock lifetime is the transaction: once the rival ends, edits go through.
    drop(rival);
    submit(&engine, &store, actor, edit_req(a.id, None, "unblocked"))
        .await
        .unwrap();
    assert_eq!(store.version_count(a.id), 2);
}

#[tokio::test]
async fn deletion_cascades_to_descendants_and_is_idempotent() {
    let store = MemStore::new();
    let engine = engine();
    let actor = user();
    let (parent, root) = rooted(&engine, &store, actor).await;

    let a = node_of(&submit(&engine, &store, actor, post_req(root, "thread")).await.unwrap());
    let b = node_of(&submit(&engine, &store, actor, post_req(a.id, "reply")).await.unwrap());

    let resp = delete(&engine, &store, actor, delete_req(a.id)).await.unwrap();
    assert!(resp.ok);
    let a_after = store.node(a.id).unwrap();
    let b_after = store.node(b.id).unwrap();
    assert!(a_after.deleted && b_after.deleted);
    assert_eq!(a_after.deleted_by, Some(actor));
    assert_eq!(b_after.deleted_by, Some(actor));

    // Deleting again is a no-op that still succeeds.
    let resp = delete(&engine, &store, actor, delete_req(a.id)).await.unwrap();
    assert!(resp.ok);

    // Descendant counts ignore deletion; the rendered tree does not.
    let loaded = load(&engine, &store, actor, &parent).await.unwrap();
    assert_eq!(loaded.number_of_comments, Some(2));
    assert_eq!(context_of(&loaded).nodes.len(), 1, "only the root is left visible");
}

#[tokio::test]
async fn deleted_nodes_accept_neither_replies_nor_edits() {
    let store = MemStore::new();
    let engine = engine();
    let actor = user();
    let (_, root) = rooted(&engine, &store, actor).await;

    let a = node_of(&submit(&engine, &store, actor, post_req(root, "doomed")).await.unwrap());
    delete(&engine, &store, actor, delete_req(a.id)).await.unwrap();

    let err = submit(&engine, &store, actor, post_req(a.id, "too late"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api(ApiError::InvalidTarget(_))));
    let err = submit(&engine, &store, actor, edit_req(a.id, None, "too late"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api(ApiError::InvalidTarget(_))));
}

#[tokio::test]
async fn the_root_is_not_a_comment() {
    let store = MemStore::new();
    let engine = engine();
    let actor = user();
    let (_, root) = rooted(&engine, &store, actor).await;

    let err = submit(&engine, &store, actor, edit_req(root, None, "root edit"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api(ApiError::InvalidTarget(_))));

    let err = delete(&engine, &store, actor, delete_req(root))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api(ApiError::InvalidTarget(_))));
}

#[tokio::test]
async fn requests_must_name_a_resolvable_target() {
    let store = MemStore::new();
    let engine = engine();
    let actor = user();
    rooted(&engine, &store, actor).await;

    let nothing = CommentRequest {
        parent: None,
        node: None,
        previous_version: None,
        body: String::from("hello"),
        options: Options::new(),
    };
    let err = submit(&engine, &store, actor, nothing).await.unwrap_err();
    assert!(matches!(err, Error::Api(ApiError::InvalidTarget(_))));

    let missing = post_req(NodeId(Uuid::new_v4()), "hello");
    let err = submit(&engine, &store, actor, missing).await.unwrap_err();
    assert!(matches!(err, Error::Api(ApiError::NotFound)));
}

#[tokio::test]
async fn empty_bodies_are_rejected_before_anything_persists() {
    let store = MemStore::new();
    let engine = engine();
    let actor = user();
    let (_, root) = rooted(&engine, &store, actor).await;

    let nodes_before = store.node_count();
    let err = submit(&engine, &store, actor, post_req(root, "   "))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api(ApiError::Validation(_))));
    assert_eq!(store.node_count(), nodes_before);
}

#[tokio::test]
async fn every_capability_is_checked() {
    let store = MemStore::new();
    let actor = user();

    let no_view = engine_with(
        StaticGate {
            can_view: false,
            can_post: true,
            can_delete: true,
        },
        Vec::new(),
    );
    let err = load(&no_view, &store, actor, &article()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Api(ApiError::PermissionDenied(Capability::CanViewComments))
    ));

    let open = engine();
    let (_, root) = rooted(&open, &store, actor).await;
    let a = node_of(&submit(&open, &store, actor, post_req(root, "kept")).await.unwrap());

    let no_post = engine_with(
        StaticGate {
            can_view: true,
            can_post: false,
            can_delete: true,
        },
        Vec::new(),
    );
    let err = submit(&no_post, &store, actor, post_req(root, "denied"))
        .await
        .unwrap_err();
    match err {
        Error::Api(err) => assert_eq!(
            err.user_message(),
            "You do not have permission to post this comment."
        ),
        other => panic!("expected a permission failure, got {other:?}"),
    }

    let no_delete = engine_with(
        StaticGate {
            can_view: true,
            can_post: true,
            can_delete: false,
        },
        Vec::new(),
    );
    let err = delete(&no_delete, &store, actor, delete_req(a.id))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Api(ApiError::PermissionDenied(Capability::CanDeleteComment))
    ));
    assert!(!store.node(a.id).unwrap().deleted);
}

#[tokio::test]
async fn lifecycle_events_reach_observers() {
    let store = MemStore::new();
    let sink = Arc::new(RecordingSink::new());
    let engine = engine_with(StaticGate::allow_all(), vec![sink.clone() as Arc<dyn EventSink>]);
    let actor = user();
    let (_, root) = rooted(&engine, &store, actor).await;

    let a = node_of(&submit(&engine, &store, actor, post_req(root, "hello")).await.unwrap());
    submit(&engine, &store, actor, edit_req(a.id, None, "hello again"))
        .await
        .unwrap();
    delete(&engine, &store, actor, delete_req(a.id)).await.unwrap();

    let events = sink.events();
    let actions: Vec<CommentAction> = events.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            CommentAction::Post,
            CommentAction::Edit,
            CommentAction::PreDelete
        ]
    );
    assert!(events[0].version.is_some());
    assert!(events[1].version.is_some());
    assert!(events[2].version.is_none(), "deletes carry no version");
    assert!(events.iter().all(|e| e.actor == actor));
    assert!(events.iter().all(|e| e.node.id == a.id));
}

#[tokio::test]
async fn observer_failures_abort_the_operation() {
    let store = MemStore::new();
    let open = engine();
    let actor = user();
    let (_, root) = rooted(&open, &store, actor).await;

    let sink = Arc::new(RecordingSink::vetoing());
    let engine = engine_with(StaticGate::allow_all(), vec![sink as Arc<dyn EventSink>]);
    let nodes_before = store.node_count();
    let err = submit(&engine, &store, actor, post_req(root, "nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Anyhow(_)));
    assert_eq!(store.node_count(), nodes_before, "the aborted post must roll back");
}

#[tokio::test]
async fn a_vetoed_delete_leaves_the_node_alone() {
    let store = MemStore::new();
    let open = engine();
    let actor = user();
    let (_, root) = rooted(&open, &store, actor).await;
    let a = node_of(&submit(&open, &store, actor, post_req(root, "survivor")).await.unwrap());

    let sink = Arc::new(RecordingSink::vetoing());
    let vetoed = engine_with(StaticGate::allow_all(), vec![sink.clone() as Arc<dyn EventSink>]);
    let err = delete(&vetoed, &store, actor, delete_req(a.id))
        .await
        .unwrap_err();
    match err {
        Error::Api(err) => assert_eq!(
            err.user_message(),
            "There was an error deleting the selected comment(s)."
        ),
        other => panic!("expected the generic delete failure, got {other:?}"),
    }
    assert!(!store.node(a.id).unwrap().deleted);
    assert_eq!(sink.events().len(), 1);
    assert_eq!(sink.events()[0].action, CommentAction::PreDelete);
}
