use serde_json::{Map, Value};
use uuid::Uuid;

use super::UnlockReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallStatus {
    Running,
    Done,
    Failed,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One tool invocation reported inside a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
    pub status: ToolCallStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl ToolCallRecord {
    pub fn running(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            status: ToolCallStatus::Running,
            result: None,
            error: None,
        }
    }

    /// Applies the single terminal transition. A non-empty `error` marks the
    /// call failed; anything else marks it done. Returns `false` when the
    /// record had already finished.
    pub(crate) fn finish(&mut self, result: Option<String>, error: Option<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        match error.filter(|error| !error.is_empty()) {
            Some(error) => {
                self.status = ToolCallStatus::Failed;
                self.error = Some(error);
            }
            None => {
                self.status = ToolCallStatus::Done;
                self.result = result;
            }
        }
        true
    }
}

/// How a stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Completed,
    /// Force-unlocked before `done`; content is whatever had arrived.
    Interrupted(UnlockReason),
    /// Ended by a server `error` frame.
    Failed(String),
}

/// A finalized assistant response with a durable identity.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantMessage {
    pub id: Uuid,
    pub generation: u64,
    pub content: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub outcome: MessageOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_finishes_once() {
        let mut record = ToolCallRecord::running("1", "search", Map::new());

        assert!(record.finish(Some("3 hits".to_string()), None));
        assert_eq!(record.status, ToolCallStatus::Done);
        assert_eq!(record.result.as_deref(), Some("3 hits"));

        assert!(!record.finish(None, Some("late".to_string())));
        assert_eq!(record.status, ToolCallStatus::Done);
        assert!(record.error.is_none());
    }

    #[test]
    fn empty_error_counts_as_success() {
        let mut record = ToolCallRecord::running("1", "read", Map::new());
        record.finish(Some(String::new()), Some(String::new()));
        assert_eq!(record.status, ToolCallStatus::Done);
        assert_eq!(record.result.as_deref(), Some(""));

        let mut failed = ToolCallRecord::running("2", "write", Map::new());
        failed.finish(None, Some("denied".to_string()));
        assert_eq!(failed.status, ToolCallStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("denied"));
    }
}
