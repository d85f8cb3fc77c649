//! Streaming connection core for a remote AI chat backend.
//!
//! The transport adapters live in `conduit_transport` and the wire
//! vocabulary in `conduit_protocol`. This crate composes them:
//!
//! - [`ConnectionProfile`] names a backend and how to reach it.
//! - [`StreamAssembler`] turns typing/chunk/tool/done frames into assistant
//!   messages and guarantees the UI never stays locked.
//! - [`PermissionGate`] tracks the one outstanding permission request.
//! - [`ConnectionOrchestrator`] owns all of the above in a single task and
//!   exposes intents, an ordered event stream and a watch snapshot.

pub mod assembler;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod permission;
pub mod profile;

pub use assembler::{
    AssemblerConfig, AssemblerUpdate, AssistantMessage, MessageOutcome, StreamAssembler,
    StreamInput, StreamSnapshot, ToolCallRecord, ToolCallStatus, UnlockReason,
};
pub use config::EnvConfig;
pub use error::{ConfigError, OrchestratorError, PermissionError};
pub use orchestrator::{
    ConnectionOrchestrator, IntentKind, OrchestratorConfig, OrchestratorEvent, OrchestratorHandle,
    OrchestratorSnapshot, ServerInfo,
};
pub use permission::{GateOutcome, PermissionGate};
pub use profile::{BackendKind, ConnectionProfile};

pub use conduit_protocol as protocol;
pub use conduit_transport as transport;
