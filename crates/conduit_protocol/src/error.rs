use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("frame has no string `type` field")]
    MissingType,

    #[error("malformed `{type_tag}` frame: {source}")]
    MalformedFrame {
        type_tag: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode `{type_tag}` frame: {source}")]
    Encode {
        type_tag: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    #[must_use]
    pub fn malformed(type_tag: impl Into<String>, source: serde_json::Error) -> Self {
        Self::MalformedFrame {
            type_tag: type_tag.into(),
            source,
        }
    }
}
