use anyhow::Context;
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    Json,
};
use futures::StreamExt;
use komento_api::{CommentRequest, CommentResponse, ParentRef};
use sqlx::Connection;

use crate::{db::PgStore, engine::CommentEngine, extractors::*, feeds::CommentFeeds, Error};

pub async fn load_comments(
    Auth(user): Auth,
    State(engine): State<CommentEngine>,
    CommentOptions(options): CommentOptions,
    Query(parent): Query<ParentRef>,
    mut conn: PgConn,
) -> Result<Json<CommentResponse>, Error> {
    let mut tx = Connection::begin(&mut *conn)
        .await
        .context("starting transaction")?;
    let res = engine
        .load(&mut PgStore { conn: &mut *tx }, user, &parent, options)
        .await;
    finish(tx, res).await
}

pub async fn post_comment(
    Auth(user): Auth,
    State(engine): State<CommentEngine>,
    mut conn: PgConn,
    Json(req): Json<CommentRequest>,
) -> Result<Json<CommentResponse>, Error> {
    let mut tx = Connection::begin(&mut *conn)
        .await
        .context("starting transaction")?;
    let res = engine
        .submit(&mut PgStore { conn: &mut *tx }, user, &req)
        .await;
    finish(tx, res).await
}

pub async fn delete_comment(
    Auth(user): Auth,
    State(engine): State<CommentEngine>,
    mut conn: PgConn,
    Json(req): Json<CommentRequest>,
) -> Result<Json<CommentResponse>, Error> {
    let mut tx = Connection::begin(&mut *conn)
        .await
        .context("starting transaction")?;
    let res = engine
        .delete(&mut PgStore { conn: &mut *tx }, user, &req)
        .await;
    finish(tx, res).await
}

/// All-or-nothing boundary of one operation: commit on success, roll back
/// on any failure so no partial write survives.
async fn finish(
    tx: sqlx::Transaction<'_, sqlx::Postgres>,
    res: Result<CommentResponse, Error>,
) -> Result<Json<CommentResponse>, Error> {
    match res {
        Ok(resp) => {
            tx.commit().await.context("committing transaction")?;
            Ok(Json(resp))
        }
        Err(err) => {
            tx.rollback().await.context("rolling back transaction")?;
            Err(err)
        }
    }
}

pub async fn comment_feed(
    ws: WebSocketUpgrade,
    State(feeds): State<CommentFeeds>,
) -> Result<axum::response::Response, Error> {
    Ok(ws.on_upgrade(move |sock| {
        let (write, read) = sock.split();
        feeds.attach(write, read)
    }))
}
