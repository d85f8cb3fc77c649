use std::fmt;
use std::time::Duration;

/// Lifecycle of the persistent connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    /// Waiting `delay` before reconnect attempt `attempt` (1-indexed).
    Reconnecting { attempt: u32, delay: Duration },
    /// Retries exhausted. Only an explicit connect leaves this state.
    Failed(String),
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// True for states in which an in-progress stream can no longer complete.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::Disconnected | Self::Reconnecting { .. } | Self::Failed(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting (attempt {attempt} in {}ms)", delay.as_millis())
            }
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}
