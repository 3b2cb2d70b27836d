use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures::{channel::mpsc, select, SinkExt, StreamExt};
use komento_api::{CommentEvent, EventSink, FeedMessage, Uuid};
use tokio::sync::RwLock;

/// Fan-out of lifecycle events to connected websocket clients. Registered
/// on the engine as an observer; every published event reaches every
/// subscriber.
#[derive(Clone, Debug)]
pub struct CommentFeeds(Arc<RwLock<HashMap<Uuid, mpsc::UnboundedSender<FeedMessage>>>>);

impl CommentFeeds {
    pub fn new() -> CommentFeeds {
        CommentFeeds(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn attach<W, R>(self, mut write: W, read: R)
    where
        W: 'static + Send + Unpin + futures::Sink<Message>,
        <W as futures::Sink<Message>>::Error: Send,
        R: 'static + Send + Unpin + futures::Stream<Item = Result<Message, axum::Error>>,
    {
        // Note: if this were bounded, there would be a deadlock between the
        // write-lock to remove a channel and the read-lock to send an event
        // to all interested sockets
        let (sender, mut receiver) = mpsc::unbounded();
        let sender_id = Uuid::new_v4();

        self.0.write().await.insert(sender_id, sender);

        let this = self.clone();
        let mut read = read.fuse();
        tokio::spawn(async move {
            macro_rules! remove_self {
                () => {{
                    this.0.write().await.remove(&sender_id);
                    return;
                }};
            }
            macro_rules! send_message {
                ( $msg:expr ) => {{
                    let msg: FeedMessage = $msg;
                    let json = match serde_json::to_vec(&msg) {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::error!(?err, ?msg, "failed serializing message to json");
                            continue;
                        }
                    };
                    if let Err(_) = write.send(Message::Binary(json)).await {
                        remove_self!();
                    }
                }};
            }
            loop {
                select! {
                    msg = receiver.next() => match msg {
                        None => remove_self!(),
                        Some(msg) => send_message!(msg),
                    },
                    msg = read.next() => match msg {
                        None => remove_self!(),
                        Some(Ok(Message::Close(_))) => remove_self!(),
                        Some(Ok(Message::Text(msg))) => {
                            if msg != "ping" {
                                tracing::warn!("received unexpected message from client: {msg:?}");
                                remove_self!();
                            }
                            send_message!(FeedMessage::Pong);
                        }
                        Some(msg) => {
                            tracing::warn!("received unexpected message from client: {msg:?}");
                            remove_self!();
                        }
                    },
                }
            }
        });
    }
}

#[async_trait]
impl EventSink for CommentFeeds {
    async fn publish(&self, event: &CommentEvent) -> anyhow::Result<()> {
        for sub in self.0.read().await.values() {
            // A closed socket is cleaned up by its own relay task; losing
            // one subscriber must not fail the comment operation.
            let _ = sub.unbounded_send(FeedMessage::Event(event.clone()));
        }
        Ok(())
    }
}
