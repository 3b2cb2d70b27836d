use std::ops::{Deref, DerefMut};

use anyhow::Context;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{self, request},
};
use komento_api::{Options, UserId, Uuid};

use crate::{engine::CommentEngine, feeds::CommentFeeds, Error};

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub db: PgPool,
    pub engine: CommentEngine,
    pub feeds: CommentFeeds,
}

#[derive(Clone)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    pub fn new(pool: sqlx::PgPool) -> PgPool {
        PgPool(pool)
    }

    pub async fn acquire(&self) -> Result<PgConn, Error> {
        Ok(PgConn(
            self.0.acquire().await.context("acquiring db connection")?,
        ))
    }
}

pub struct PgConn(sqlx::pool::PoolConnection<sqlx::Postgres>);

#[async_trait]
impl FromRequestParts<AppState> for PgConn {
    type Rejection = Error;

    async fn from_request_parts(
        _req: &mut request::Parts,
        state: &AppState,
    ) -> Result<PgConn, Error> {
        state.db.acquire().await
    }
}

impl Deref for PgConn {
    type Target = sqlx::PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PgConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// The acting user. Authentication itself happens upstream; this only
/// reads the identity the proxy verified and put in the bearer slot.
pub struct Auth(pub UserId);

#[async_trait]
impl<S: Sync> FromRequestParts<S> for Auth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, _state: &S) -> Result<Auth, Error> {
        match req.headers.get(http::header::AUTHORIZATION) {
            None => Err(Error::unauthenticated()),
            Some(auth) => {
                let auth = auth.to_str().map_err(|_| Error::unauthenticated())?;
                let mut auth = auth.split(' ');
                if !auth
                    .next()
                    .ok_or_else(Error::unauthenticated)?
                    .eq_ignore_ascii_case("bearer")
                {
                    return Err(Error::unauthenticated());
                }
                let user = auth.next().ok_or_else(Error::unauthenticated)?;
                if auth.next().is_some() {
                    return Err(Error::unauthenticated());
                }
                let user = Uuid::try_from(user).map_err(|_| Error::unauthenticated())?;
                Ok(Auth(UserId(user)))
            }
        }
    }
}

/// Arbitrary client options ride in on the `x-comment-options` header for
/// GET requests. They must form a JSON object; anything else is rejected
/// here rather than carried along as opaque state.
pub struct CommentOptions(pub Options);

const OPTIONS_HEADER: &str = "x-comment-options";

#[async_trait]
impl<S: Sync> FromRequestParts<S> for CommentOptions {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        _state: &S,
    ) -> Result<CommentOptions, Error> {
        let bad = || {
            Error::Api(komento_api::Error::Validation(vec![String::from(
                "comment options must be a JSON object",
            )]))
        };
        match req.headers.get(OPTIONS_HEADER) {
            None => Ok(CommentOptions(Options::new())),
            Some(raw) => {
                let raw = raw.to_str().map_err(|_| bad())?;
                match serde_json::from_str::<serde_json::Value>(raw) {
                    Ok(serde_json::Value::Object(map)) => Ok(CommentOptions(map)),
                    _ => Err(bad()),
                }
            }
        }
    }
}
