use std::fmt;

use conduit_protocol::{PermissionRequest, UsageMeta};
use conduit_transport::ConnectionState;
use serde_json::Value;

use crate::assembler::{AssemblerUpdate, StreamSnapshot};
use crate::error::OrchestratorError;

/// Identity reported by the server handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub server: String,
    pub version: String,
    pub capabilities: Vec<String>,
}

/// Intent names used when an intent is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    Connect,
    Disconnect,
    SendMessage,
    RespondPermission,
    SetWorkingDirectory,
    SwitchConversation,
    NewConversation,
    CancelGeneration,
}

impl IntentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::SendMessage => "send_message",
            Self::RespondPermission => "respond_permission",
            Self::SetWorkingDirectory => "set_working_directory",
            Self::SwitchConversation => "switch_conversation",
            Self::NewConversation => "new_conversation",
            Self::CancelGeneration => "cancel_generation",
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered notifications for the UI layer.
#[derive(Debug)]
pub enum OrchestratorEvent {
    ConnectionChanged(ConnectionState),
    RetriesExhausted(String),
    ServerHello(ServerInfo),
    MessageSent {
        generation: u64,
        content: String,
    },
    Stream(AssemblerUpdate),
    Usage(UsageMeta),
    PermissionRequested(PermissionRequest),
    PermissionAutoApproved {
        id: String,
    },
    PermissionResolved {
        id: String,
        granted: bool,
    },
    /// The pending request was dropped without an answer.
    PermissionCleared {
        id: String,
    },
    /// The response frame for `id` could not be sent. The request is still
    /// pending when it was the current one.
    PermissionSendFailed {
        id: String,
        error: String,
    },
    Push {
        title: String,
        content: String,
    },
    UnrecognizedFrame {
        type_tag: String,
        payload: Value,
    },
    ConversationChanged {
        conversation_id: Option<String>,
        generation: u64,
    },
    WorkingDirectoryChanged(String),
    IntentRejected {
        intent: IntentKind,
        error: OrchestratorError,
    },
}

/// Latest observable state, published through a watch channel.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSnapshot {
    pub connection: ConnectionState,
    pub stream: StreamSnapshot,
    pub pending_permission: Option<PermissionRequest>,
    pub conversation_id: Option<String>,
    pub working_directory: Option<String>,
    pub server: Option<ServerInfo>,
}

impl Default for OrchestratorSnapshot {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            stream: StreamSnapshot::default(),
            pending_permission: None,
            conversation_id: None,
            working_directory: None,
            server: None,
        }
    }
}
