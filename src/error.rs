use std::path::PathBuf;

use conduit_transport::{ConnectionState, TransportError};
use thiserror::Error;

/// Failure loading or validating a [`crate::ConnectionProfile`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error while reading profile at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse profile JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid profile field '{field}': {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Failure answering a permission request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("no permission request is pending (got response for '{id}')")]
    NonePending { id: String },

    #[error("permission '{id}' is not pending (pending: '{pending}')")]
    UnknownId { id: String, pending: String },
}

/// Reason an orchestrator intent was refused.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("not connected (state: {state})")]
    NotConnected { state: ConnectionState },

    #[error("a response is still streaming")]
    StreamInProgress,

    #[error("no response is streaming")]
    NothingToCancel,

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("orchestrator has stopped")]
    Stopped,
}
