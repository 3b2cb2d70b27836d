pub use uuid::{uuid, Uuid};

pub type Time = chrono::DateTime<chrono::Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

mod auth;
mod config;
mod error;
mod event;
mod node;
mod render;
mod request;
mod store;
mod user;
mod version;

pub use auth::{Capability, GateRegistry, NodeAuth, OpenGate, PermissionGate};
pub use config::{ConfigRegistry, NodeFilter, TreeConfig};
pub use error::Error;
pub use event::{CommentAction, CommentEvent, EventSink, FeedMessage};
pub use node::{CommentNode, NodeId, ParentRef, TreeRoot};
pub use render::{RenderContext, RenderNode, Renderer};
pub use request::{CommentRequest, CommentResponse, Options};
pub use store::{LockStatus, TreeStore};
pub use user::UserId;
pub use version::{CommentVersion, VersionId};

/// Checks a comment body against the constraints configured for its tree.
/// All violated constraints are reported at once, not just the first.
pub fn validate_body(body: &str, max_length: usize) -> Result<(), Error> {
    let mut violations = Vec::new();
    if body.trim().is_empty() {
        violations.push(String::from("comment body must not be empty"));
    }
    if body.len() > max_length {
        violations.push(format!(
            "comment body must not exceed {} bytes",
            max_length
        ));
    }
    if body.contains('\0') {
        violations.push(String::from("comment body must not contain null bytes"));
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(violations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_validation_accepts_normal_text() {
        assert_eq!(validate_body("hello there", 100), Ok(()));
    }

    #[test]
    fn body_validation_rejects_empty_and_whitespace() {
        assert!(matches!(validate_body("", 100), Err(Error::Validation(_))));
        assert!(matches!(
            validate_body("   \n\t", 100),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn body_validation_rejects_oversized_text() {
        let body = "a".repeat(101);
        match validate_body(&body, 100) {
            Err(Error::Validation(v)) => assert_eq!(v.len(), 1),
            other => panic!("expected a validation failure, got {other:?}"),
        }
    }

    #[test]
    fn body_validation_reports_every_violation() {
        match validate_body("\0", 0) {
            Err(Error::Validation(v)) => assert_eq!(v.len(), 2),
            other => panic!("expected a validation failure, got {other:?}"),
        }
    }
}
