use crate::Capability;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Comment not found")]
    NotFound,

    #[error("Permission denied for {0}")]
    PermissionDenied(Capability),

    #[error("Comment tree depth limit reached")]
    DepthExceeded,

    #[error("Comment is locked by another editor")]
    ConcurrentEdit,

    #[error("Edit was submitted against an outdated version")]
    StaleEdit,

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Error::DepthExceeded => StatusCode::BAD_REQUEST,
            Error::ConcurrentEdit => StatusCode::CONFLICT,
            Error::StaleEdit => StatusCode::CONFLICT,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// The message shown to the person who made the request. Permission and
    /// validation failures are actionable; concurrency conflicts tell the
    /// user to refresh and retry rather than silently retrying for them.
    pub fn user_message(&self) -> String {
        match self {
            Error::Unknown(msg) => msg.clone(),
            Error::Unauthenticated => {
                String::from("You must be signed in to use comments.")
            }
            Error::InvalidTarget(msg) => msg.clone(),
            Error::NotFound => String::from("The requested comment could not be found."),
            Error::PermissionDenied(Capability::CanViewComments) => {
                String::from("You do not have permission to view comments for this object.")
            }
            Error::PermissionDenied(Capability::CanPostComment) => {
                String::from("You do not have permission to post this comment.")
            }
            Error::PermissionDenied(Capability::CanDeleteComment) => {
                String::from("You do not have permission to delete this comment.")
            }
            Error::DepthExceeded => String::from("You cannot respond to this comment."),
            Error::ConcurrentEdit => String::from(
                "Someone else is currently editing this comment. \
                 Please refresh your page and try again.",
            ),
            Error::StaleEdit => String::from(
                "You are not editing the most recent version of this comment. \
                 Please refresh your page and try again.",
            ),
            Error::Validation(violations) => format!(
                "There were errors in your submission. Please correct them and resubmit: {}",
                violations.join("; ")
            ),
        }
    }
}
