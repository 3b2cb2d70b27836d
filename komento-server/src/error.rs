use axum::Json;
use komento_api::{Capability, CommentResponse, Error as ApiError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Error {
    pub fn unauthenticated() -> Error {
        Error::Api(ApiError::Unauthenticated)
    }

    pub fn invalid_target(msg: impl Into<String>) -> Error {
        Error::Api(ApiError::InvalidTarget(msg.into()))
    }

    pub fn not_found() -> Error {
        Error::Api(ApiError::NotFound)
    }

    pub fn permission_denied(capability: Capability) -> Error {
        Error::Api(ApiError::PermissionDenied(capability))
    }

    pub fn depth_exceeded() -> Error {
        Error::Api(ApiError::DepthExceeded)
    }

    pub fn concurrent_edit() -> Error {
        Error::Api(ApiError::ConcurrentEdit)
    }

    pub fn stale_edit() -> Error {
        Error::Api(ApiError::StaleEdit)
    }

    /// Delete-path failures are reported without internal detail; the
    /// chain goes to the log instead.
    pub fn delete_failed() -> Error {
        Error::Api(ApiError::Unknown(String::from(
            "There was an error deleting the selected comment(s).",
        )))
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let err = match self {
            Error::Anyhow(err) => {
                tracing::error!(?err, "internal server error");
                ApiError::Unknown(String::from("Internal server error, see logs for details"))
            }
            Error::Api(err) => {
                tracing::info!("returning error to client: {err}");
                err
            }
        };
        (err.status_code(), Json(CommentResponse::error(&err))).into_response()
    }
}
