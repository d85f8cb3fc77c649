//! Incremental response assembly with staleness guards.
//!
//! [`StreamAssembler`] is pure state: every operation takes the current
//! [`Instant`] and queues [`AssemblerUpdate`]s for its owner to drain. Timers
//! are expressed as deadlines ([`StreamAssembler::next_deadline`]) that the
//! owner sleeps on and reports back through [`StreamAssembler::poll_timers`],
//! so a deadline that is cleared can never fire.
//!
//! Three independent guards keep a response from staying "in progress"
//! forever:
//! - the generation counter drops events from a superseded context;
//! - the watchdog force-unlocks after a quiet period with no progress;
//! - [`StreamAssembler::self_heal`] re-checks elapsed time and flag
//!   consistency on its own schedule, as a backstop for a starved watchdog.

mod record;

use std::fmt;
use std::time::Duration;

use conduit_protocol::InboundMessage;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

pub use record::{AssistantMessage, MessageOutcome, ToolCallRecord, ToolCallStatus};

pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(12);
pub const DEFAULT_HARD_CEILING: Duration = Duration::from_secs(20);
pub const DEFAULT_SELF_HEAL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblerConfig {
    /// Quiet period after which an in-progress response is force-unlocked.
    pub watchdog_timeout: Duration,
    /// Longest a response may stay in progress, counted from when it was
    /// first expected, before self-heal cuts it off.
    pub hard_ceiling: Duration,
    pub self_heal_interval: Duration,
    /// Coalescing window for content updates.
    pub flush_interval: Duration,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
            hard_ceiling: DEFAULT_HARD_CEILING,
            self_heal_interval: DEFAULT_SELF_HEAL_INTERVAL,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl AssemblerConfig {
    #[must_use]
    pub fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_hard_ceiling(mut self, ceiling: Duration) -> Self {
        self.hard_ceiling = ceiling;
        self
    }

    #[must_use]
    pub fn with_self_heal_interval(mut self, interval: Duration) -> Self {
        self.self_heal_interval = interval;
        self
    }

    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }
}

/// Why an in-progress response was force-unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockReason {
    WatchdogExpired,
    CeilingExceeded,
    InconsistentFlags,
    ConnectionLost,
    Cancelled,
    ContextSwitched,
}

impl UnlockReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WatchdogExpired => "watchdog expired",
            Self::CeilingExceeded => "stream exceeded hard ceiling",
            Self::InconsistentFlags => "streaming without a pending request",
            Self::ConnectionLost => "connection lost",
            Self::Cancelled => "cancelled",
            Self::ContextSwitched => "conversation changed",
        }
    }
}

impl fmt::Display for UnlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-agnostic stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamInput {
    Typing,
    Chunk(String),
    Done,
    ToolStarted {
        id: String,
        name: String,
        arguments: Map<String, Value>,
    },
    ToolFinished {
        id: String,
        result: Option<String>,
        error: Option<String>,
    },
    Failed(String),
}

impl StreamInput {
    /// The stream-related subset of inbound frames.
    pub fn from_inbound(message: &InboundMessage) -> Option<Self> {
        let input = match message {
            InboundMessage::Typing => Self::Typing,
            InboundMessage::Chunk { content } => Self::Chunk(content.clone()),
            InboundMessage::Done => Self::Done,
            InboundMessage::ToolStart {
                tool_call_id,
                name,
                arguments,
            } => Self::ToolStarted {
                id: tool_call_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            },
            InboundMessage::ToolDone {
                tool_call_id,
                result,
                error,
                ..
            } => Self::ToolFinished {
                id: tool_call_id.clone(),
                result: result.clone(),
                error: error.clone(),
            },
            InboundMessage::Error { message } => Self::Failed(message.clone()),
            _ => return None,
        };
        Some(input)
    }
}

/// Output of the assembler, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblerUpdate {
    StreamStarted { generation: u64 },
    /// Coalesced content since the previous update.
    Content { generation: u64, delta: String },
    ToolCallStarted(ToolCallRecord),
    ToolCallFinished(ToolCallRecord),
    MessageFinalized(AssistantMessage),
    /// The in-progress placeholder ended empty and was dropped.
    MessageDiscarded { generation: u64 },
    Unlocked(UnlockReason),
    ServerError { generation: u64, message: String },
}

/// Read-only view of the in-progress response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSnapshot {
    pub generation: u64,
    pub expecting: bool,
    pub streaming: bool,
    pub typing: bool,
    /// Content released by the last flush. Buffered chunks appear here
    /// once per flush interval, not per chunk.
    pub content: String,
    pub tool_calls: Vec<ToolCallRecord>,
}

#[derive(Debug)]
struct StreamState {
    generation: u64,
    content: String,
    flushed_len: usize,
    tool_calls: Vec<ToolCallRecord>,
    typing: bool,
}

impl StreamState {
    fn new(generation: u64, typing: bool) -> Self {
        Self {
            generation,
            content: String::new(),
            flushed_len: 0,
            tool_calls: Vec::new(),
            typing,
        }
    }
}

#[derive(Debug)]
pub struct StreamAssembler {
    config: AssemblerConfig,
    generation: u64,
    expecting: bool,
    /// Exists exactly while a response is streaming or typing.
    stream: Option<StreamState>,
    started_at: Option<Instant>,
    watchdog: Option<Instant>,
    flush_due: Option<Instant>,
    updates: Vec<AssemblerUpdate>,
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new(AssemblerConfig::default())
    }
}

impl StreamAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self {
            config,
            generation: 0,
            expecting: false,
            stream: None,
            started_at: None,
            watchdog: None,
            flush_due: None,
            updates: Vec::new(),
        }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_expecting(&self) -> bool {
        self.expecting
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_typing(&self) -> bool {
        self.stream.as_ref().is_some_and(|stream| stream.typing)
    }

    /// True while a response is expected or in progress.
    pub fn is_busy(&self) -> bool {
        self.expecting || self.stream.is_some()
    }

    pub fn content(&self) -> &str {
        self.stream
            .as_ref()
            .map_or("", |stream| stream.content.as_str())
    }

    fn flushed_content(&self) -> &str {
        self.stream
            .as_ref()
            .map_or("", |stream| &stream.content[..stream.flushed_len])
    }

    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        self.stream
            .as_ref()
            .map(|stream| stream.tool_calls.as_slice())
            .unwrap_or_default()
    }

    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.watchdog
    }

    /// Earliest pending timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.watchdog, self.flush_due) {
            (Some(watchdog), Some(flush)) => Some(watchdog.min(flush)),
            (watchdog, flush) => watchdog.or(flush),
        }
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            generation: self.generation,
            expecting: self.expecting,
            streaming: self.is_streaming(),
            typing: self.is_typing(),
            content: self.flushed_content().to_string(),
            tool_calls: self.tool_calls().to_vec(),
        }
    }

    pub fn drain_updates(&mut self) -> Vec<AssemblerUpdate> {
        std::mem::take(&mut self.updates)
    }

    /// Marks a user message as accepted for sending and returns the
    /// generation its reply belongs to.
    pub fn begin_expecting(&mut self, now: Instant) -> u64 {
        self.expecting = true;
        self.touch(now);
        self.generation
    }

    /// Undoes [`Self::begin_expecting`] after the send itself failed.
    pub fn abandon_expecting(&mut self) {
        self.expecting = false;
        if self.stream.is_none() {
            self.started_at = None;
            self.watchdog = None;
        }
    }

    /// Switches to a new conversational context. Anything in progress is
    /// force-unlocked first.
    pub fn bump_generation(&mut self) -> u64 {
        self.force_unlock(UnlockReason::ContextSwitched);
        self.generation += 1;
        debug!(generation = self.generation, "generation advanced");
        self.generation
    }

    pub fn apply(&mut self, generation: u64, input: StreamInput, now: Instant) {
        match input {
            StreamInput::Typing => self.on_typing(generation, now),
            StreamInput::Chunk(content) => self.on_chunk(generation, &content, now),
            StreamInput::Done => self.on_done(generation),
            StreamInput::ToolStarted {
                id,
                name,
                arguments,
            } => self.on_tool_started(generation, id, name, arguments, now),
            StreamInput::ToolFinished { id, result, error } => {
                self.on_tool_finished(generation, &id, result, error, now)
            }
            StreamInput::Failed(message) => self.on_server_error(generation, message),
        }
    }

    pub fn on_typing(&mut self, generation: u64, now: Instant) {
        if !self.expecting {
            debug!(generation, "typing without a pending request ignored");
            return;
        }
        if self.is_stale(generation) {
            debug!(generation, current = self.generation, "stale typing dropped");
            return;
        }

        match self.stream.as_mut() {
            Some(stream) => stream.typing = true,
            None => self.open_stream(true),
        }
        self.touch(now);
    }

    pub fn on_chunk(&mut self, generation: u64, content: &str, now: Instant) {
        if self.is_stale(generation) {
            debug!(generation, current = self.generation, "stale chunk dropped");
            return;
        }
        if self.stream.is_none() {
            if !self.expecting {
                debug!(generation, "chunk without an open stream dropped");
                return;
            }
            self.open_stream(false);
        }

        if let Some(stream) = self.stream.as_mut() {
            stream.content.push_str(content);
            stream.typing = false;
        }
        self.touch(now);
        if self.flush_due.is_none() {
            self.flush_due = Some(now + self.config.flush_interval);
        }
    }

    pub fn on_done(&mut self, generation: u64) {
        if self.is_stale(generation) {
            debug!(generation, current = self.generation, "stale done dropped");
            return;
        }

        self.flush();
        self.expecting = false;
        self.watchdog = None;
        self.started_at = None;
        self.close_stream(MessageOutcome::Completed);
    }

    pub fn on_tool_started(
        &mut self,
        generation: u64,
        id: String,
        name: String,
        arguments: Map<String, Value>,
        now: Instant,
    ) {
        if self.is_stale(generation) {
            debug!(generation, tool_call_id = %id, "stale tool start dropped");
            return;
        }
        if self.stream.is_none() {
            if !self.expecting {
                debug!(tool_call_id = %id, "tool start without an open stream dropped");
                return;
            }
            self.open_stream(false);
        }

        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        if stream.tool_calls.iter().any(|record| record.id == id) {
            debug!(tool_call_id = %id, "duplicate tool start ignored");
            return;
        }

        let record = ToolCallRecord::running(id, name, arguments);
        stream.tool_calls.push(record.clone());
        self.updates.push(AssemblerUpdate::ToolCallStarted(record));
        self.touch(now);
    }

    pub fn on_tool_finished(
        &mut self,
        generation: u64,
        id: &str,
        result: Option<String>,
        error: Option<String>,
        now: Instant,
    ) {
        if self.is_stale(generation) {
            debug!(generation, tool_call_id = %id, "stale tool result dropped");
            return;
        }
        let Some(stream) = self.stream.as_mut() else {
            debug!(tool_call_id = %id, "tool result without an open stream dropped");
            return;
        };
        let Some(record) = stream.tool_calls.iter_mut().find(|record| record.id == id) else {
            debug!(tool_call_id = %id, "tool result for unknown call dropped");
            return;
        };

        if record.finish(result, error) {
            let record = record.clone();
            self.updates.push(AssemblerUpdate::ToolCallFinished(record));
        }
        self.touch(now);
    }

    /// Ends the current stream on a server `error`. Never retried here.
    pub fn on_server_error(&mut self, generation: u64, message: String) {
        if self.is_stale(generation) {
            debug!(generation, %message, "stale server error dropped");
            return;
        }

        self.flush_due = None;
        self.expecting = false;
        self.watchdog = None;
        self.started_at = None;
        self.close_stream(MessageOutcome::Failed(message.clone()));
        self.updates.push(AssemblerUpdate::ServerError {
            generation: self.generation,
            message,
        });
    }

    /// Resets all in-progress state. Keeps non-empty content as a finalized
    /// message. Returns `false` when there was nothing to unlock.
    pub fn force_unlock(&mut self, reason: UnlockReason) -> bool {
        if !self.is_busy() {
            return false;
        }

        warn!(
            %reason,
            generation = self.generation,
            buffered = self.content().len(),
            "force-unlocking stream"
        );
        self.flush_due = None;
        self.expecting = false;
        self.watchdog = None;
        self.started_at = None;
        self.close_stream(MessageOutcome::Interrupted(reason));
        self.updates.push(AssemblerUpdate::Unlocked(reason));
        true
    }

    /// Handles deadlines that have passed: the batched flush and the watchdog.
    pub fn poll_timers(&mut self, now: Instant) {
        if self.flush_due.is_some_and(|due| due <= now) {
            self.flush();
        }
        if self.watchdog.is_some_and(|deadline| deadline <= now) {
            self.force_unlock(UnlockReason::WatchdogExpired);
        }
    }

    /// Periodic backstop that does not rely on the watchdog firing.
    pub fn self_heal(&mut self, now: Instant) {
        if !self.is_busy() {
            return;
        }

        let elapsed = self
            .started_at
            .map_or(Duration::ZERO, |at| now.saturating_duration_since(at));
        if elapsed >= self.config.hard_ceiling {
            self.force_unlock(UnlockReason::CeilingExceeded);
        } else if self.stream.is_some() && !self.expecting {
            self.force_unlock(UnlockReason::InconsistentFlags);
        } else if self.watchdog.is_some_and(|deadline| deadline <= now) {
            self.force_unlock(UnlockReason::WatchdogExpired);
        }
    }

    fn is_stale(&self, generation: u64) -> bool {
        generation < self.generation
    }

    fn touch(&mut self, now: Instant) {
        self.started_at.get_or_insert(now);
        self.watchdog = Some(now + self.config.watchdog_timeout);
    }

    fn open_stream(&mut self, typing: bool) {
        self.stream = Some(StreamState::new(self.generation, typing));
        self.updates.push(AssemblerUpdate::StreamStarted {
            generation: self.generation,
        });
    }

    fn flush(&mut self) {
        self.flush_due = None;
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        if stream.flushed_len == stream.content.len() {
            return;
        }

        let delta = stream.content[stream.flushed_len..].to_string();
        stream.flushed_len = stream.content.len();
        self.updates.push(AssemblerUpdate::Content {
            generation: stream.generation,
            delta,
        });
    }

    fn close_stream(&mut self, outcome: MessageOutcome) {
        let Some(stream) = self.stream.take() else {
            return;
        };

        if stream.content.is_empty() && stream.tool_calls.is_empty() {
            self.updates.push(AssemblerUpdate::MessageDiscarded {
                generation: stream.generation,
            });
            return;
        }

        self.updates
            .push(AssemblerUpdate::MessageFinalized(AssistantMessage {
                id: Uuid::new_v4(),
                generation: stream.generation,
                content: stream.content,
                tool_calls: stream.tool_calls,
                outcome,
            }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn finalized(updates: &[AssemblerUpdate]) -> Vec<&AssistantMessage> {
        updates
            .iter()
            .filter_map(|update| match update {
                AssemblerUpdate::MessageFinalized(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn unlocks(updates: &[AssemblerUpdate]) -> Vec<UnlockReason> {
        updates
            .iter()
            .filter_map(|update| match update {
                AssemblerUpdate::Unlocked(reason) => Some(*reason),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn typing_chunks_and_done_assemble_one_message() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::default();
        let generation = assembler.begin_expecting(now);

        assembler.apply(generation, StreamInput::Typing, now);
        assert!(assembler.is_streaming());
        assert!(assembler.is_typing());

        assembler.apply(generation, StreamInput::Chunk("Hel".to_string()), now);
        assembler.apply(generation, StreamInput::Chunk("lo".to_string()), now);
        assert!(!assembler.is_typing());
        assert_eq!(assembler.content(), "Hello");

        assembler.apply(generation, StreamInput::Done, now);
        assert!(!assembler.is_busy());
        assert_eq!(assembler.next_deadline(), None);

        let updates = assembler.drain_updates();
        assert_eq!(
            updates[0],
            AssemblerUpdate::StreamStarted { generation: 0 }
        );
        assert_eq!(
            updates[1],
            AssemblerUpdate::Content {
                generation: 0,
                delta: "Hello".to_string()
            }
        );
        let messages = finalized(&updates);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(messages[0].outcome, MessageOutcome::Completed);
    }

    #[test]
    fn typing_without_pending_request_is_ignored() {
        let mut assembler = StreamAssembler::default();
        assembler.on_typing(0, Instant::now());

        assert!(!assembler.is_streaming());
        assert!(assembler.drain_updates().is_empty());
    }

    #[test]
    fn chunk_before_typing_is_accepted_while_expecting() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::default();
        let generation = assembler.begin_expecting(now);

        assembler.on_chunk(generation, "early", now);
        assembler.on_typing(generation, now);

        assert!(assembler.is_streaming());
        assert_eq!(assembler.content(), "early");
    }

    #[test]
    fn chunks_are_coalesced_until_flush_deadline() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::default();
        let generation = assembler.begin_expecting(now);
        assembler.on_typing(generation, now);
        assembler.drain_updates();

        assembler.on_chunk(generation, "a", now);
        assembler.on_chunk(generation, "b", now + Duration::from_millis(10));
        assert_eq!(
            assembler.next_deadline(),
            Some(now + DEFAULT_FLUSH_INTERVAL)
        );
        assembler.poll_timers(now + Duration::from_millis(20));
        assert!(assembler.drain_updates().is_empty());

        assembler.poll_timers(now + DEFAULT_FLUSH_INTERVAL);
        assert_eq!(
            assembler.drain_updates(),
            vec![AssemblerUpdate::Content {
                generation,
                delta: "ab".to_string()
            }]
        );
    }

    #[test]
    fn snapshot_changes_once_per_flush_during_a_burst() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::default();
        let generation = assembler.begin_expecting(now);
        assembler.on_typing(generation, now);
        assembler.on_chunk(generation, "t0 ", now);
        let before = assembler.snapshot();

        for index in 1..20 {
            let at = now + Duration::from_millis(index * 2);
            assembler.on_chunk(generation, &format!("t{index} "), at);
            assert_eq!(assembler.snapshot(), before);
        }
        assert_eq!(before.content, "");

        assembler.poll_timers(now + DEFAULT_FLUSH_INTERVAL);
        let after = assembler.snapshot();
        assert_eq!(after.content, assembler.content());
        assert!(after.content.starts_with("t0 t1 "));
        let contents = assembler
            .drain_updates()
            .into_iter()
            .filter(|update| matches!(update, AssemblerUpdate::Content { .. }))
            .count();
        assert_eq!(contents, 1);
    }

    #[test]
    fn stale_events_are_dropped_after_generation_bump() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::default();
        let old = assembler.begin_expecting(now);
        assembler.on_typing(old, now);
        assembler.on_chunk(old, "partial", now);

        let current = assembler.bump_generation();
        assert_eq!(current, old + 1);
        assert!(!assembler.is_busy());
        assembler.drain_updates();

        assembler.on_chunk(old, "late", now);
        assembler.on_tool_started(old, "t".to_string(), "search".to_string(), Map::new(), now);
        assembler.on_done(old);
        assembler.on_server_error(old, "late failure".to_string());

        assert!(!assembler.is_busy());
        assert!(assembler.drain_updates().is_empty());
    }

    #[test]
    fn stale_chunk_is_dropped_while_a_newer_reply_is_expected() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::default();
        let old = assembler.begin_expecting(now);
        assembler.on_chunk(old, "old", now);
        assembler.bump_generation();
        let current = assembler.begin_expecting(now);
        assembler.drain_updates();

        assembler.on_chunk(old, "OLD-TAIL", now);
        assembler.on_done(old);
        assert!(!assembler.is_streaming());
        assert!(assembler.is_expecting());

        assembler.on_chunk(current, "new", now);
        assert_eq!(assembler.content(), "new");
    }

    #[test]
    fn tool_calls_transition_once() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::default();
        let generation = assembler.begin_expecting(now);
        assembler.on_typing(generation, now);

        assembler.on_tool_started(generation, "1".to_string(), "search".to_string(), Map::new(), now);
        assembler.on_tool_finished(generation, "1", Some("3 hits".to_string()), None, now);
        assembler.on_tool_finished(generation, "1", None, Some("again".to_string()), now);
        assembler.on_tool_finished(generation, "missing", Some("x".to_string()), None, now);

        let calls = assembler.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].status, ToolCallStatus::Done);
        assert_eq!(calls[0].result.as_deref(), Some("3 hits"));

        let finished = assembler
            .drain_updates()
            .into_iter()
            .filter(|update| matches!(update, AssemblerUpdate::ToolCallFinished(_)))
            .count();
        assert_eq!(finished, 1);
    }

    #[test]
    fn server_error_keeps_partial_content_and_surfaces_error() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::default();
        let generation = assembler.begin_expecting(now);
        assembler.on_chunk(generation, "Work", now);

        assembler.on_server_error(generation, "provider failed".to_string());

        assert!(!assembler.is_busy());
        let updates = assembler.drain_updates();
        let messages = finalized(&updates);
        assert_eq!(messages[0].content, "Work");
        assert_eq!(
            messages[0].outcome,
            MessageOutcome::Failed("provider failed".to_string())
        );
        assert!(matches!(
            updates.last(),
            Some(AssemblerUpdate::ServerError { message, .. }) if message == "provider failed"
        ));
    }

    #[test]
    fn tool_only_response_is_kept() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::default();
        let generation = assembler.begin_expecting(now);

        assembler.on_tool_started(generation, "1".to_string(), "search".to_string(), Map::new(), now);
        assembler.on_tool_finished(generation, "1", Some(String::new()), None, now);
        assembler.on_done(generation);

        let updates = assembler.drain_updates();
        let messages = finalized(&updates);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "");
        assert_eq!(messages[0].tool_calls[0].status, ToolCallStatus::Done);
    }

    #[test]
    fn server_error_discards_empty_placeholder() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::default();
        let generation = assembler.begin_expecting(now);
        assembler.on_typing(generation, now);

        assembler.on_server_error(generation, "boom".to_string());

        let updates = assembler.drain_updates();
        assert!(finalized(&updates).is_empty());
        assert!(updates.contains(&AssemblerUpdate::MessageDiscarded { generation }));
    }

    #[test]
    fn watchdog_unlocks_exactly_once_after_quiet_period() {
        let start = Instant::now();
        let mut assembler = StreamAssembler::default();
        let generation = assembler.begin_expecting(start);
        assembler.on_typing(generation, start);
        assembler.on_chunk(generation, "stuck", start + Duration::from_secs(2));

        assembler.poll_timers(start + Duration::from_secs(13));
        assert!(assembler.is_streaming());

        let expiry = start + Duration::from_secs(14);
        assembler.poll_timers(expiry);
        assembler.poll_timers(expiry);
        assembler.self_heal(expiry + DEFAULT_SELF_HEAL_INTERVAL);

        assert!(!assembler.is_busy());
        let updates = assembler.drain_updates();
        assert_eq!(unlocks(&updates), vec![UnlockReason::WatchdogExpired]);
        assert_eq!(finalized(&updates)[0].content, "stuck");
    }

    #[test]
    fn watchdog_covers_expecting_window() {
        let start = Instant::now();
        let mut assembler = StreamAssembler::default();
        assembler.begin_expecting(start);

        assert_eq!(
            assembler.next_deadline(),
            Some(start + DEFAULT_WATCHDOG_TIMEOUT)
        );
        assembler.poll_timers(start + DEFAULT_WATCHDOG_TIMEOUT);

        assert!(!assembler.is_expecting());
        let updates = assembler.drain_updates();
        assert_eq!(unlocks(&updates), vec![UnlockReason::WatchdogExpired]);
        assert!(finalized(&updates).is_empty());
    }

    #[test]
    fn self_heal_catches_starved_watchdog() {
        let start = Instant::now();
        let mut assembler = StreamAssembler::default();
        let generation = assembler.begin_expecting(start);
        assembler.on_chunk(generation, "x", start);

        assembler.self_heal(start + Duration::from_secs(9));
        assert!(assembler.is_streaming());

        assembler.self_heal(start + Duration::from_secs(21));
        assert!(!assembler.is_streaming());
        assert_eq!(
            unlocks(&assembler.drain_updates()),
            vec![UnlockReason::CeilingExceeded]
        );
    }

    #[test]
    fn self_heal_ceiling_counts_from_stream_start_despite_progress() {
        let start = Instant::now();
        let mut assembler = StreamAssembler::default();
        let generation = assembler.begin_expecting(start);
        assembler.on_typing(generation, start);

        for second in [5, 10, 15] {
            assembler.on_chunk(generation, ".", start + Duration::from_secs(second));
            assembler.self_heal(start + Duration::from_secs(second + 3));
        }
        assert!(assembler.is_streaming());

        assembler.on_chunk(generation, ".", start + Duration::from_secs(20));
        assembler.on_chunk(generation, ".", start + Duration::from_secs(25));
        assembler.self_heal(start + Duration::from_secs(26));

        assert!(!assembler.is_busy());
        let updates = assembler.drain_updates();
        assert_eq!(unlocks(&updates), vec![UnlockReason::CeilingExceeded]);
        assert_eq!(finalized(&updates)[0].content, ".....");
    }

    #[test]
    fn next_response_gets_a_fresh_ceiling() {
        let start = Instant::now();
        let mut assembler = StreamAssembler::default();
        let first = assembler.begin_expecting(start);
        assembler.on_chunk(first, "a", start);
        assembler.on_done(first);

        let later = start + Duration::from_secs(30);
        let second = assembler.begin_expecting(later);
        assembler.on_chunk(second, "b", later);
        assembler.self_heal(later + Duration::from_secs(3));

        assert!(assembler.is_streaming());
    }

    #[test]
    fn self_heal_unlocks_streaming_without_pending_request() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::default();
        let generation = assembler.begin_expecting(now);
        assembler.on_chunk(generation, "orphan", now);
        assembler.abandon_expecting();

        assembler.self_heal(now + Duration::from_secs(1));

        assert_eq!(
            unlocks(&assembler.drain_updates()),
            vec![UnlockReason::InconsistentFlags]
        );
    }

    #[test]
    fn force_unlock_is_idempotent() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::default();
        let generation = assembler.begin_expecting(now);
        assembler.on_chunk(generation, "Work", now);

        assert!(assembler.force_unlock(UnlockReason::ConnectionLost));
        assert!(!assembler.force_unlock(UnlockReason::ConnectionLost));
        assert_eq!(assembler.next_deadline(), None);

        let updates = assembler.drain_updates();
        assert_eq!(unlocks(&updates), vec![UnlockReason::ConnectionLost]);
        let messages = finalized(&updates);
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].outcome,
            MessageOutcome::Interrupted(UnlockReason::ConnectionLost)
        );
    }

    #[test]
    fn late_chunk_after_unlock_does_not_reopen_stream() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::default();
        let generation = assembler.begin_expecting(now);
        assembler.on_chunk(generation, "a", now);
        assembler.force_unlock(UnlockReason::Cancelled);
        assembler.drain_updates();

        assembler.on_chunk(generation, "b", now);
        assembler.on_typing(generation, now);

        assert!(!assembler.is_busy());
        assert!(assembler.drain_updates().is_empty());
    }

    #[test]
    fn finalized_messages_get_distinct_ids() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::default();
        for _ in 0..2 {
            let generation = assembler.begin_expecting(now);
            assembler.on_chunk(generation, "x", now);
            assembler.on_done(generation);
        }

        let updates = assembler.drain_updates();
        let messages = finalized(&updates);
        assert_eq!(messages.len(), 2);
        assert_ne!(messages[0].id, messages[1].id);
    }

    #[test]
    fn inbound_frames_map_to_stream_inputs() {
        assert_eq!(
            StreamInput::from_inbound(&InboundMessage::Chunk {
                content: "x".to_string()
            }),
            Some(StreamInput::Chunk("x".to_string()))
        );
        assert_eq!(
            StreamInput::from_inbound(&InboundMessage::Push {
                title: "t".to_string(),
                content: "c".to_string()
            }),
            None
        );
    }
}
