//! Composition root for one backend profile.
//!
//! [`ConnectionOrchestrator`] is a single task that owns the transport
//! adapter, the [`StreamAssembler`] and the [`PermissionGate`]. User intents,
//! transport events, assembler deadlines and the self-heal tick are all
//! delivered to that task through one `select!` loop, so no state is shared
//! and every transition runs to completion before the next event is seen.

mod backend;
mod event;

use std::future::pending;
use std::sync::Arc;

use conduit_protocol::{InboundMessage, OutboundMessage, PermissionRequest, UsageMeta};
use conduit_transport::{
    ConnectionConfig, ConnectionEvent, ConnectionState, Connector, HttpStreamSource, SourceEvent,
    TaggedSourceEvent, TransportError, WebSocketConnector,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::assembler::{AssemblerConfig, StreamAssembler, StreamInput, UnlockReason};
use crate::error::OrchestratorError;
use crate::permission::{GateOutcome, PermissionGate};
use crate::profile::{BackendKind, ConnectionProfile};

use backend::{Backend, BackendEvent};
pub use event::{IntentKind, OrchestratorEvent, OrchestratorSnapshot, ServerInfo};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrchestratorConfig {
    pub connection: ConnectionConfig,
    pub assembler: AssemblerConfig,
}

#[derive(Debug)]
enum Intent {
    Connect,
    Disconnect,
    SendMessage(String),
    RespondPermission { id: String, granted: bool },
    SetWorkingDirectory(String),
    SwitchConversation(String),
    NewConversation,
    CancelGeneration,
    Shutdown,
}

/// Cloneable handle for submitting intents and observing state.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    intents: mpsc::UnboundedSender<Intent>,
    snapshot: watch::Receiver<OrchestratorSnapshot>,
}

impl OrchestratorHandle {
    pub fn connect(&self) -> Result<(), OrchestratorError> {
        self.submit(Intent::Connect)
    }

    pub fn disconnect(&self) -> Result<(), OrchestratorError> {
        self.submit(Intent::Disconnect)
    }

    /// Sends a user message. Rejections arrive as
    /// [`OrchestratorEvent::IntentRejected`].
    pub fn send_message(&self, content: impl Into<String>) -> Result<(), OrchestratorError> {
        self.submit(Intent::SendMessage(content.into()))
    }

    pub fn respond_permission(
        &self,
        id: impl Into<String>,
        granted: bool,
    ) -> Result<(), OrchestratorError> {
        self.submit(Intent::RespondPermission {
            id: id.into(),
            granted,
        })
    }

    pub fn set_working_directory(&self, cwd: impl Into<String>) -> Result<(), OrchestratorError> {
        self.submit(Intent::SetWorkingDirectory(cwd.into()))
    }

    pub fn switch_conversation(
        &self,
        conversation_id: impl Into<String>,
    ) -> Result<(), OrchestratorError> {
        self.submit(Intent::SwitchConversation(conversation_id.into()))
    }

    pub fn new_conversation(&self) -> Result<(), OrchestratorError> {
        self.submit(Intent::NewConversation)
    }

    pub fn cancel_generation(&self) -> Result<(), OrchestratorError> {
        self.submit(Intent::CancelGeneration)
    }

    pub fn shutdown(&self) {
        let _ = self.intents.send(Intent::Shutdown);
    }

    pub fn snapshot(&self) -> OrchestratorSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<OrchestratorSnapshot> {
        self.snapshot.clone()
    }

    fn submit(&self, intent: Intent) -> Result<(), OrchestratorError> {
        self.intents
            .send(intent)
            .map_err(|_| OrchestratorError::Stopped)
    }
}

type Spawned = (
    OrchestratorHandle,
    mpsc::UnboundedReceiver<OrchestratorEvent>,
    JoinHandle<()>,
);

pub struct ConnectionOrchestrator {
    backend: Backend,
    assembler: StreamAssembler,
    gate: PermissionGate,
    connection: ConnectionState,
    /// Generation that inbound socket frames are attributed to.
    reply_generation: u64,
    conversation_id: Option<String>,
    working_directory: Option<String>,
    server: Option<ServerInfo>,
    intents: mpsc::UnboundedReceiver<Intent>,
    events: mpsc::UnboundedSender<OrchestratorEvent>,
    snapshot: watch::Sender<OrchestratorSnapshot>,
}

impl ConnectionOrchestrator {
    /// Validates `profile` and spawns the orchestrator task with the
    /// transport its backend kind calls for.
    pub fn spawn(
        profile: ConnectionProfile,
        config: OrchestratorConfig,
    ) -> Result<Spawned, OrchestratorError> {
        profile.validate()?;
        let backend = match profile.backend {
            BackendKind::Socket => Backend::socket(
                config.connection.clone(),
                profile.connect_request(),
                Arc::new(WebSocketConnector),
            ),
            BackendKind::HttpStream => {
                Backend::http(HttpStreamSource::new(profile.http_stream_config())?)
            }
        };
        Ok(Self::spawn_backend(&profile, config, backend))
    }

    /// Spawns a socket-backed orchestrator over a custom [`Connector`].
    pub fn spawn_with_connector(
        profile: ConnectionProfile,
        config: OrchestratorConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Spawned, OrchestratorError> {
        profile.validate()?;
        let backend = Backend::socket(
            config.connection.clone(),
            profile.connect_request(),
            connector,
        );
        Ok(Self::spawn_backend(&profile, config, backend))
    }

    fn spawn_backend(
        profile: &ConnectionProfile,
        config: OrchestratorConfig,
        backend: Backend,
    ) -> Spawned {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let initial = OrchestratorSnapshot {
            working_directory: profile.working_directory.clone(),
            ..OrchestratorSnapshot::default()
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let orchestrator = Self {
            backend,
            assembler: StreamAssembler::new(config.assembler),
            gate: PermissionGate::new(profile.auto_approve),
            connection: ConnectionState::Disconnected,
            reply_generation: 0,
            conversation_id: None,
            working_directory: profile.working_directory.clone(),
            server: None,
            intents: intent_rx,
            events: event_tx,
            snapshot: snapshot_tx,
        };
        let task = tokio::spawn(orchestrator.run());

        (
            OrchestratorHandle {
                intents: intent_tx,
                snapshot: snapshot_rx,
            },
            event_rx,
            task,
        )
    }

    async fn run(mut self) {
        let period = self.assembler.config().self_heal_interval;
        let mut self_heal = interval_at(Instant::now() + period, period);
        self_heal.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.assembler.next_deadline();
            tokio::select! {
                biased;

                intent = self.intents.recv() => {
                    let intent = intent.unwrap_or(Intent::Shutdown);
                    if !self.apply_intent(intent).await {
                        break;
                    }
                }
                Some(event) = self.backend.next_event() => match event {
                    BackendEvent::Connection(event) => self.apply_connection_event(event).await,
                    BackendEvent::Source(event) => self.apply_source_event(event),
                },
                () = sleep_until_deadline(deadline) => {
                    self.assembler.poll_timers(Instant::now());
                    self.release_abandoned_request();
                }
                _ = self_heal.tick() => {
                    self.assembler.self_heal(Instant::now());
                    self.release_abandoned_request();
                }
            }

            self.publish();
        }

        self.backend.shutdown();
        self.publish();
        debug!("orchestrator stopped");
    }

    async fn apply_intent(&mut self, intent: Intent) -> bool {
        let result = match intent {
            Intent::Connect => self.connect().map_err(|error| (IntentKind::Connect, error)),
            Intent::Disconnect => self
                .disconnect()
                .map_err(|error| (IntentKind::Disconnect, error)),
            Intent::SendMessage(content) => self
                .send_message(content)
                .await
                .map_err(|error| (IntentKind::SendMessage, error)),
            Intent::RespondPermission { id, granted } => self
                .respond_permission(id, granted)
                .await
                .map_err(|error| (IntentKind::RespondPermission, error)),
            Intent::SetWorkingDirectory(cwd) => self
                .set_working_directory(cwd)
                .await
                .map_err(|error| (IntentKind::SetWorkingDirectory, error)),
            Intent::SwitchConversation(id) => self
                .switch_conversation(id)
                .await
                .map_err(|error| (IntentKind::SwitchConversation, error)),
            Intent::NewConversation => self
                .new_conversation()
                .map_err(|error| (IntentKind::NewConversation, error)),
            Intent::CancelGeneration => self
                .cancel_generation()
                .map_err(|error| (IntentKind::CancelGeneration, error)),
            Intent::Shutdown => return false,
        };

        if let Err((intent, error)) = result {
            info!(%intent, %error, "intent rejected");
            self.emit(OrchestratorEvent::IntentRejected { intent, error });
        }
        true
    }

    fn connect(&mut self) -> Result<(), OrchestratorError> {
        match &self.backend {
            Backend::Socket(socket) => socket.handle.connect()?,
            Backend::Http(_) => self.set_connection(ConnectionState::Ready),
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), OrchestratorError> {
        match &mut self.backend {
            Backend::Socket(socket) => socket.handle.disconnect()?,
            Backend::Http(http) => {
                http.cancel();
                self.set_connection(ConnectionState::Disconnected);
            }
        }
        Ok(())
    }

    async fn send_message(&mut self, content: String) -> Result<(), OrchestratorError> {
        if !self.connection.is_ready() {
            return Err(OrchestratorError::NotConnected {
                state: self.connection.clone(),
            });
        }
        if self.assembler.is_busy() {
            return Err(OrchestratorError::StreamInProgress);
        }

        let generation = self.assembler.begin_expecting(Instant::now());
        match &mut self.backend {
            Backend::Socket(socket) => {
                let message =
                    OutboundMessage::message(content.clone(), self.working_directory.clone());
                if let Err(error) = socket.handle.send(message).await {
                    self.assembler.abandon_expecting();
                    return Err(error.into());
                }
                self.reply_generation = generation;
            }
            Backend::Http(http) => http.start(content.clone(), generation),
        }

        debug!(generation, "message sent");
        self.emit(OrchestratorEvent::MessageSent {
            generation,
            content,
        });
        Ok(())
    }

    async fn respond_permission(
        &mut self,
        id: String,
        granted: bool,
    ) -> Result<(), OrchestratorError> {
        let response = self.gate.response_for(&id, granted)?;
        match self.send_frame(response).await {
            Ok(()) => {
                self.gate.mark_answered(&id);
                self.emit(OrchestratorEvent::PermissionResolved { id, granted });
            }
            Err(error) => {
                warn!(%id, %error, "permission response not sent; request stays pending");
                self.emit(OrchestratorEvent::PermissionSendFailed {
                    id,
                    error: error.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn set_working_directory(&mut self, cwd: String) -> Result<(), OrchestratorError> {
        self.working_directory = Some(cwd.clone());
        self.emit(OrchestratorEvent::WorkingDirectoryChanged(cwd.clone()));
        if self.is_socket_ready() {
            self.send_frame(OutboundMessage::SetCwd { cwd }).await?;
        }
        Ok(())
    }

    async fn switch_conversation(&mut self, conversation_id: String) -> Result<(), OrchestratorError> {
        let interrupted = self.assembler.is_busy();
        let generation = self.change_context();
        self.conversation_id = Some(conversation_id.clone());
        self.emit(OrchestratorEvent::ConversationChanged {
            conversation_id: Some(conversation_id.clone()),
            generation,
        });
        if interrupted && self.is_socket_live() {
            // Socket frames carry no generation, so the old reply would bleed
            // into the next one. The new session resumes `conversation_id`
            // once it is ready.
            return self.restart_session();
        }
        if self.is_socket_ready() {
            self.send_frame(OutboundMessage::SetConversation { conversation_id })
                .await?;
        }
        Ok(())
    }

    /// The server allocates a fresh conversation per socket, so a new
    /// conversation on the socket backend is a new session.
    fn new_conversation(&mut self) -> Result<(), OrchestratorError> {
        let generation = self.change_context();
        self.conversation_id = None;
        self.emit(OrchestratorEvent::ConversationChanged {
            conversation_id: None,
            generation,
        });

        if self.is_socket_live() {
            self.restart_session()?;
        }
        Ok(())
    }

    fn cancel_generation(&mut self) -> Result<(), OrchestratorError> {
        if !self.assembler.is_busy() {
            return Err(OrchestratorError::NothingToCancel);
        }

        self.assembler.force_unlock(UnlockReason::Cancelled);
        if let Backend::Http(http) = &mut self.backend {
            http.cancel();
            return Ok(());
        }
        // The socket protocol has no cancel frame; a fresh session is the
        // only way to stop the server from streaming into this one.
        self.restart_session()
    }

    fn restart_session(&mut self) -> Result<(), OrchestratorError> {
        self.clear_permission();
        if let Backend::Socket(socket) = &self.backend {
            socket.handle.restart()?;
        }
        Ok(())
    }

    /// Stops an HTTP request whose reply a timer has already force-unlocked.
    fn release_abandoned_request(&mut self) {
        if self.assembler.is_busy() {
            return;
        }
        if let Backend::Http(http) = &mut self.backend {
            if http.cancel() {
                debug!("request cancelled after its reply was unlocked");
            }
        }
    }

    /// Bumps the generation; anything in flight belongs to the old context.
    fn change_context(&mut self) -> u64 {
        if let Backend::Http(http) = &mut self.backend {
            http.cancel();
        }
        self.assembler.bump_generation()
    }

    async fn apply_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(state) => {
                let ready = state.is_ready();
                self.set_connection(state);
                if ready {
                    self.resume_context().await;
                }
            }
            ConnectionEvent::Frame(message) => self.apply_frame(message).await,
            ConnectionEvent::RetriesExhausted(reason) => {
                self.emit(OrchestratorEvent::RetriesExhausted(reason));
            }
        }
    }

    async fn apply_frame(&mut self, message: InboundMessage) {
        if let Some(input) = StreamInput::from_inbound(&message) {
            self.assembler
                .apply(self.reply_generation, input, Instant::now());
            return;
        }

        match message {
            InboundMessage::Hello {
                server,
                version,
                capabilities,
            } => {
                let info = ServerInfo {
                    server,
                    version,
                    capabilities,
                };
                self.server = Some(info.clone());
                self.emit(OrchestratorEvent::ServerHello(info));
            }
            InboundMessage::Meta(usage) => self.emit(OrchestratorEvent::Usage(usage)),
            InboundMessage::Permission(request) => self.apply_permission_request(request).await,
            InboundMessage::Push { title, content } => {
                self.emit(OrchestratorEvent::Push { title, content });
            }
            InboundMessage::Unknown { type_tag, payload } => {
                self.emit(OrchestratorEvent::UnrecognizedFrame { type_tag, payload });
            }
            InboundMessage::Typing
            | InboundMessage::Chunk { .. }
            | InboundMessage::Done
            | InboundMessage::ToolStart { .. }
            | InboundMessage::ToolDone { .. }
            | InboundMessage::Error { .. } => {}
        }
    }

    async fn apply_permission_request(&mut self, request: PermissionRequest) {
        let id = request.id.clone();
        match self.gate.on_request(request.clone()) {
            GateOutcome::AutoApproved { response } => match self.send_frame(response).await {
                Ok(()) => self.emit(OrchestratorEvent::PermissionAutoApproved { id }),
                Err(error) => self.emit(OrchestratorEvent::PermissionSendFailed {
                    id,
                    error: error.to_string(),
                }),
            },
            GateOutcome::Surfaced {
                superseded,
                superseded_response,
            } => {
                if let (Some(previous), Some(response)) = (superseded, superseded_response) {
                    if let Err(error) = self.send_frame(response).await {
                        self.emit(OrchestratorEvent::PermissionSendFailed {
                            id: previous.id.clone(),
                            error: error.to_string(),
                        });
                    }
                    self.emit(OrchestratorEvent::PermissionCleared { id: previous.id });
                }
                self.emit(OrchestratorEvent::PermissionRequested(request));
            }
        }
    }

    fn apply_source_event(&mut self, tagged: TaggedSourceEvent) {
        let TaggedSourceEvent { generation, event } = tagged;
        let Backend::Http(http) = &mut self.backend else {
            return;
        };
        if !http.is_current(generation) {
            debug!(generation, "event from a finished request dropped");
            return;
        }

        let now = Instant::now();
        if event.is_terminal() {
            http.finish();
        }
        match event {
            SourceEvent::Chunk(text) => self.assembler.on_chunk(generation, &text, now),
            SourceEvent::Complete { usage, .. } => {
                let model = http.model().to_string();
                self.assembler.on_done(generation);
                if let Some(usage) = usage {
                    self.emit(OrchestratorEvent::Usage(UsageMeta {
                        model,
                        input_tokens: usage.prompt_tokens,
                        output_tokens: usage.completion_tokens,
                    }));
                }
            }
            SourceEvent::Error(message) => self.assembler.on_server_error(generation, message),
        }
    }

    /// Re-applies per-session context after a (re)connect: the server starts
    /// every socket with a fresh conversation and no working directory.
    async fn resume_context(&mut self) {
        if let Some(conversation_id) = self.conversation_id.clone() {
            if let Err(error) = self
                .send_frame(OutboundMessage::SetConversation { conversation_id })
                .await
            {
                warn!(%error, "failed to resume conversation");
            }
        }
        if let Some(cwd) = self.working_directory.clone() {
            if let Err(error) = self.send_frame(OutboundMessage::SetCwd { cwd }).await {
                warn!(%error, "failed to restore working directory");
            }
        }
    }

    fn set_connection(&mut self, state: ConnectionState) {
        if self.connection == state {
            return;
        }

        info!(state = %state, "connection state changed");
        self.connection = state.clone();
        if state.is_connection_lost() {
            self.assembler.force_unlock(UnlockReason::ConnectionLost);
            self.clear_permission();
        }
        self.emit(OrchestratorEvent::ConnectionChanged(state));
    }

    fn clear_permission(&mut self) {
        if let Some(request) = self.gate.clear() {
            self.emit(OrchestratorEvent::PermissionCleared { id: request.id });
        }
    }

    async fn send_frame(&mut self, message: OutboundMessage) -> Result<(), TransportError> {
        match &self.backend {
            Backend::Socket(socket) => socket.handle.send(message).await,
            Backend::Http(_) => Err(TransportError::NotReady {
                state: "http_stream backend has no frame channel".to_string(),
            }),
        }
    }

    fn is_socket(&self) -> bool {
        matches!(self.backend, Backend::Socket(_))
    }

    /// True when the socket backend has a session worth restarting.
    fn is_socket_live(&self) -> bool {
        self.is_socket()
            && !matches!(
                self.connection,
                ConnectionState::Disconnected | ConnectionState::Failed(_)
            )
    }

    fn is_socket_ready(&self) -> bool {
        self.is_socket() && self.connection.is_ready()
    }

    /// Emits queued assembler updates ahead of `event` so the stream stays
    /// in causal order.
    fn emit(&mut self, event: OrchestratorEvent) {
        self.flush_stream_updates();
        let _ = self.events.send(event);
    }

    fn flush_stream_updates(&mut self) {
        for update in self.assembler.drain_updates() {
            let _ = self.events.send(OrchestratorEvent::Stream(update));
        }
    }

    fn publish(&mut self) {
        self.flush_stream_updates();
        let next = OrchestratorSnapshot {
            connection: self.connection.clone(),
            stream: self.assembler.snapshot(),
            pending_permission: self.gate.pending().cloned(),
            conversation_id: self.conversation_id.clone(),
            working_directory: self.working_directory.clone(),
            server: self.server.clone(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
