use async_trait::async_trait;

use crate::{CommentNode, CommentVersion, Options, UserId};

/// Lifecycle actions observers can subscribe to. `PreDelete` fires before
/// the mutation; an observer returning an error from it aborts the delete.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentAction {
    Post,
    Edit,
    PreDelete,
}

impl CommentAction {
    pub fn name(&self) -> &'static str {
        match self {
            CommentAction::Post => "post",
            CommentAction::Edit => "edit",
            CommentAction::PreDelete => "pre_delete",
        }
    }
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct CommentEvent {
    pub action: CommentAction,
    pub node: CommentNode,
    pub actor: UserId,
    /// The version just saved; absent for deletes.
    pub version: Option<CommentVersion>,
    /// The client's validated options payload, forwarded untouched.
    pub options: Options,
}

/// Message-passing interface for external observers (notification systems
/// and the like). Observers are registered explicitly on the engine; an
/// error return aborts the surrounding operation.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &CommentEvent) -> anyhow::Result<()>;
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub enum FeedMessage {
    Pong,
    Event(CommentEvent),
}
