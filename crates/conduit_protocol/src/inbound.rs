use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Server-to-client frame after decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Handshake. A connection is not ready until this arrives.
    Hello {
        #[serde(default)]
        server: String,
        #[serde(default)]
        version: String,
        #[serde(default)]
        capabilities: Vec<String>,
    },
    Typing,
    Chunk {
        content: String,
    },
    Done,
    Meta(UsageMeta),
    ToolStart {
        tool_call_id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        arguments: Map<String, Value>,
    },
    ToolDone {
        tool_call_id: String,
        #[serde(default)]
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Permission(PermissionRequest),
    /// Unsolicited notification broadcast by the server.
    Push {
        #[serde(default)]
        title: String,
        #[serde(default)]
        content: String,
    },
    Error {
        message: String,
    },
    /// Frame with a type tag this client does not know, kept verbatim.
    #[serde(skip)]
    Unknown { type_tag: String, payload: Value },
}

pub(crate) const KNOWN_TYPES: &[&str] = &[
    "hello",
    "typing",
    "chunk",
    "done",
    "meta",
    "tool_start",
    "tool_done",
    "permission",
    "push",
    "error",
];

impl InboundMessage {
    pub fn is_known_type(type_tag: &str) -> bool {
        KNOWN_TYPES.contains(&type_tag)
    }

    /// Wire `type` tag, including the preserved tag of unknown frames.
    pub fn type_tag(&self) -> &str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Typing => "typing",
            Self::Chunk { .. } => "chunk",
            Self::Done => "done",
            Self::Meta(_) => "meta",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolDone { .. } => "tool_done",
            Self::Permission(_) => "permission",
            Self::Push { .. } => "push",
            Self::Error { .. } => "error",
            Self::Unknown { type_tag, .. } => type_tag,
        }
    }
}

/// Usage metadata reported after a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMeta {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub detail: PermissionDetail,
}

/// Structured payload describing what a permission request would do.
///
/// Variants are tried in declaration order; objects matching none of the
/// known shapes are preserved as [`PermissionDetail::Other`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionDetail {
    Edit {
        path: String,
        old_text: String,
        new_text: String,
    },
    Diff {
        path: String,
        diff: String,
    },
    Content {
        path: String,
        content: String,
    },
    Command {
        command: String,
    },
    Other(Value),
}

impl Default for PermissionDetail {
    fn default() -> Self {
        Self::Other(Value::Null)
    }
}

impl PermissionDetail {
    /// File path the request touches, when it has one.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Edit { path, .. } | Self::Diff { path, .. } | Self::Content { path, .. } => {
                Some(path)
            }
            Self::Command { .. } | Self::Other(_) => None,
        }
    }
}
