use serde::{Deserialize, Serialize};

/// Client-to-server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// User chat message, optionally scoped to a working directory.
    Message {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    PermissionResponse {
        id: String,
        granted: bool,
    },
    SetCwd {
        cwd: String,
    },
    SetConversation {
        conversation_id: String,
    },
    /// Keep-alive probe. The server does not answer it.
    Ping,
}

impl OutboundMessage {
    #[must_use]
    pub fn message(content: impl Into<String>, cwd: Option<String>) -> Self {
        Self::Message {
            content: content.into(),
            cwd,
        }
    }

    #[must_use]
    pub fn permission_response(id: impl Into<String>, granted: bool) -> Self {
        Self::PermissionResponse {
            id: id.into(),
            granted,
        }
    }

    /// Wire `type` tag for this frame.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::PermissionResponse { .. } => "permission_response",
            Self::SetCwd { .. } => "set_cwd",
            Self::SetConversation { .. } => "set_conversation",
            Self::Ping => "ping",
        }
    }
}
