use crate::{Error, NodeId, VersionId};

/// Arbitrary client-supplied options, validated at the transport boundary
/// (must be a JSON object) and passed explicitly through the operation,
/// never stashed in ambient state. Forwarded to lifecycle events and the
/// render context.
pub type Options = serde_json::Map<String, serde_json::Value>;

/// One comment operation as named by the client.
///
/// `parent` set: post a new reply under that node. `node` set: edit that
/// existing node, with `previous_version` being the version the client
/// had on screen when it loaded the page (used for the stale-edit check).
/// `delete` ignores `body` and `previous_version`.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct CommentRequest {
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub node: Option<NodeId>,
    #[serde(default)]
    pub previous_version: Option<VersionId>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub options: Options,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct CommentResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_comments: Option<i64>,
}

impl CommentResponse {
    pub fn ok() -> CommentResponse {
        CommentResponse {
            ok: true,
            error_message: None,
            html_content: None,
            number_of_comments: None,
        }
    }

    pub fn with_content(html_content: String) -> CommentResponse {
        CommentResponse {
            html_content: Some(html_content),
            ..CommentResponse::ok()
        }
    }

    pub fn error(err: &Error) -> CommentResponse {
        CommentResponse {
            ok: false,
            error_message: Some(err.user_message()),
            html_content: None,
            number_of_comments: None,
        }
    }
}
