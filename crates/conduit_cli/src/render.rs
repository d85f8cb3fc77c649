//! Turns orchestrator events into terminal output.
//!
//! The transcript goes to stdout; everything else (state, prompts, errors)
//! goes to stderr so stdout can be piped.

use conduit::protocol::{PermissionDetail, PermissionRequest};
use conduit::transport::ConnectionState;
use conduit::{AssemblerUpdate, MessageOutcome, OrchestratorEvent, ToolCallStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Transcript text, written as-is.
    Transcript(String),
    /// One status line.
    Status(String),
}

/// Tracks what has been printed of the response in progress.
#[derive(Debug, Default)]
pub struct Renderer {
    streamed: String,
}

impl Renderer {
    pub fn render(&mut self, event: &OrchestratorEvent) -> Vec<Output> {
        match event {
            OrchestratorEvent::ConnectionChanged(state) => vec![status(describe_state(state))],
            OrchestratorEvent::RetriesExhausted(reason) => vec![status(format!(
                "giving up after repeated failures ({reason}); /connect to retry"
            ))],
            OrchestratorEvent::ServerHello(info) => vec![status(format!(
                "connected to {} {}",
                info.server, info.version
            ))],
            OrchestratorEvent::MessageSent { .. } => {
                self.streamed.clear();
                Vec::new()
            }
            OrchestratorEvent::Stream(update) => self.render_update(update),
            OrchestratorEvent::Usage(usage) => vec![status(format!(
                "{}: {} in / {} out tokens",
                usage.model, usage.input_tokens, usage.output_tokens
            ))],
            OrchestratorEvent::PermissionRequested(request) => vec![status(prompt(request))],
            OrchestratorEvent::PermissionAutoApproved { id } => {
                vec![status(format!("permission {id} auto-approved"))]
            }
            OrchestratorEvent::PermissionResolved { id, granted } => vec![status(format!(
                "permission {id} {}",
                if *granted { "granted" } else { "denied" }
            ))],
            OrchestratorEvent::PermissionCleared { id } => {
                vec![status(format!("permission {id} withdrawn"))]
            }
            OrchestratorEvent::PermissionSendFailed { id, error } => vec![status(format!(
                "could not answer permission {id}: {error}; answer again with /allow or /deny"
            ))],
            OrchestratorEvent::Push { title, content } => {
                vec![status(format!("[{title}] {content}"))]
            }
            OrchestratorEvent::UnrecognizedFrame { type_tag, .. } => {
                vec![status(format!("ignored unsupported '{type_tag}' frame"))]
            }
            OrchestratorEvent::ConversationChanged {
                conversation_id, ..
            } => vec![status(match conversation_id {
                Some(id) => format!("conversation {id}"),
                None => "new conversation".to_string(),
            })],
            OrchestratorEvent::WorkingDirectoryChanged(cwd) => {
                vec![status(format!("working directory {cwd}"))]
            }
            OrchestratorEvent::IntentRejected { intent, error } => {
                vec![status(format!("{intent} refused: {error}"))]
            }
        }
    }

    fn render_update(&mut self, update: &AssemblerUpdate) -> Vec<Output> {
        match update {
            AssemblerUpdate::StreamStarted { .. } => {
                self.streamed.clear();
                Vec::new()
            }
            AssemblerUpdate::Content { delta, .. } => {
                self.streamed.push_str(delta);
                vec![Output::Transcript(delta.clone())]
            }
            AssemblerUpdate::ToolCallStarted(record) => {
                vec![status(format!("tool {} started", record.name))]
            }
            AssemblerUpdate::ToolCallFinished(record) => {
                let line = match record.status {
                    ToolCallStatus::Failed => format!(
                        "tool {} failed: {}",
                        record.name,
                        record.error.as_deref().unwrap_or_default()
                    ),
                    _ => format!("tool {} done", record.name),
                };
                vec![status(line)]
            }
            AssemblerUpdate::MessageFinalized(message) => {
                let mut output = Vec::new();
                let rest = message
                    .content
                    .strip_prefix(self.streamed.as_str())
                    .unwrap_or_default();
                let printed_any = !self.streamed.is_empty() || !rest.is_empty();
                if printed_any {
                    output.push(Output::Transcript(format!("{rest}\n")));
                }
                self.streamed.clear();
                if let MessageOutcome::Interrupted(reason) = message.outcome {
                    output.push(status(format!("response interrupted ({reason})")));
                }
                output
            }
            AssemblerUpdate::MessageDiscarded { .. } => {
                self.streamed.clear();
                Vec::new()
            }
            AssemblerUpdate::Unlocked(_) => Vec::new(),
            AssemblerUpdate::ServerError { message, .. } => {
                vec![status(format!("server error: {message}"))]
            }
        }
    }
}

pub fn describe_state(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Disconnected => "disconnected".to_string(),
        ConnectionState::Connecting => "connecting...".to_string(),
        ConnectionState::Ready => "ready".to_string(),
        ConnectionState::Reconnecting { attempt, delay } => format!(
            "connection lost; reconnecting in {:.1}s (attempt {attempt})",
            delay.as_secs_f64()
        ),
        ConnectionState::Failed(reason) => {
            format!("connection failed: {reason}; /connect to retry")
        }
    }
}

fn prompt(request: &PermissionRequest) -> String {
    let detail = match &request.detail {
        PermissionDetail::Command { command } => format!("run `{command}`"),
        PermissionDetail::Other(value) => value.to_string(),
        detail => detail.path().unwrap_or_default().to_string(),
    };
    format!(
        "permission {} requested: {} ({detail}). /allow or /deny",
        request.id, request.action
    )
}

fn status(line: String) -> Output {
    Output::Status(line)
}
