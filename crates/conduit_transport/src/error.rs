use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint {endpoint:?}: {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    #[error("invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    #[error("failed to open transport: {0}")]
    Open(String),

    #[error("transport closed: {0}")]
    Closed(String),

    #[error("connection is not ready (state: {state})")]
    NotReady { state: String },

    #[error("failed to send frame: {0}")]
    Send(String),

    #[error(transparent)]
    Protocol(#[from] conduit_protocol::ProtocolError),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} {message}")]
    Status { status: StatusCode, message: String },

    #[error(
        "retry exhausted after max attempts (status: {}, last_error: {last_error:?})",
        display_status(.status)
    )]
    RetryExhausted {
        status: Option<StatusCode>,
        last_error: Option<String>,
    },

    #[error("stream failed: {0}")]
    StreamFailed(String),

    #[error("request was cancelled")]
    Cancelled,

    #[error("connection client has shut down")]
    ClientGone,
}

impl TransportError {
    #[must_use]
    pub fn invalid_endpoint(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }
}

fn display_status(status: &Option<StatusCode>) -> String {
    status
        .map(|status| status.as_u16().to_string())
        .unwrap_or_else(|| "n/a".to_owned())
}

/// Extract a human-readable message from an HTTP error body.
///
/// Understands the `{"error": {"message": ...}}` and `{"detail": ...}` shapes
/// and falls back to the raw body or the canonical status reason.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let fallback = || {
        if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body.to_string()
        }
    };

    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return fallback();
    };

    value
        .get("error")
        .and_then(|error| {
            error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
        })
        .or_else(|| value.get("detail").and_then(Value::as_str))
        .filter(|message| !message.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(fallback)
}
