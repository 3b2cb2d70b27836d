use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use structopt::StructOpt;

mod db;
mod engine;
mod error;
mod extractors;
mod feeds;
mod handlers;
mod render;
#[cfg(test)]
mod tests;

pub use error::Error;

use extractors::{AppState, PgPool};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[derive(Debug, StructOpt)]
#[structopt(name = "komento-server", about = "Threaded comment tree service")]
struct Opt {
    /// Address to listen on
    #[structopt(long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();

    let db_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = sqlx::postgres::PgPoolOptions::new()
        .connect(&db_url)
        .await
        .with_context(|| format!("opening database {:?}", db_url))?;
    MIGRATOR
        .run(&db)
        .await
        .context("running database migrations")?;

    let feeds = feeds::CommentFeeds::new();
    // Deployments register their own gates, per-type configuration and
    // renderer here; the defaults give an open, JSON-rendered tree.
    let engine = engine::CommentEngine::new(
        komento_api::GateRegistry::default(),
        komento_api::ConfigRegistry::default(),
        Arc::new(render::JsonRenderer),
        vec![Arc::new(feeds.clone())],
    );

    let app = Router::new()
        .route("/api/comments", get(handlers::load_comments))
        .route("/api/comment", post(handlers::post_comment))
        .route("/api/comment/delete", post(handlers::delete_comment))
        .route("/ws/comment-feed", get(handlers::comment_feed))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(AppState {
            db: PgPool::new(db),
            engine,
            feeds,
        });

    tracing::info!("listening on {}", opt.bind);
    axum::Server::bind(&opt.bind)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
