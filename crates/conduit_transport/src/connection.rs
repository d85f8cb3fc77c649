use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use conduit_protocol::{decode, encode, InboundMessage, OutboundMessage};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::link::{ConnectRequest, Connector, OpenFuture, TransportLink, TransportSignal};
use crate::state::ConnectionState;

/// Observable output of a [`ConnectionClient`], delivered in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    /// A decoded inbound frame, including the `hello` that made the session ready.
    Frame(InboundMessage),
    /// The retry budget ran out. Follows `StateChanged(Failed(..))`.
    RetriesExhausted(String),
}

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Restart,
    Send {
        message: OutboundMessage,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Shutdown,
}

/// Cloneable handle used to drive a running [`ConnectionClient`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Starts connecting. A no-op while a session is opening or ready.
    pub fn connect(&self) -> Result<(), TransportError> {
        self.command(Command::Connect)
    }

    /// Tears the session down and suppresses any scheduled reconnect.
    pub fn disconnect(&self) -> Result<(), TransportError> {
        self.command(Command::Disconnect)
    }

    /// Drops the current session and reconnects immediately with a fresh
    /// retry budget. Used to abort a generation on a transport without a
    /// native cancel frame.
    pub fn restart(&self) -> Result<(), TransportError> {
        self.command(Command::Restart)
    }

    /// Sends one frame. Fails unless the connection is `ready`.
    pub async fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let (reply, response) = oneshot::channel();
        self.command(Command::Send { message, reply })?;
        response.await.map_err(|_| TransportError::ClientGone)?
    }

    /// Stops the client task.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn command(&self, command: Command) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .map_err(|_| TransportError::ClientGone)
    }
}

/// Live session phase. Every timer lives inside the phase that owns it, so
/// replacing the phase cancels the timer and it can never fire afterwards.
enum Phase {
    Idle,
    Opening {
        open: OpenFuture,
        deadline: Pin<Box<Sleep>>,
    },
    AwaitingHello {
        link: TransportLink,
        deadline: Pin<Box<Sleep>>,
    },
    Ready {
        link: TransportLink,
        heartbeat: Interval,
    },
    Backoff {
        retry: Pin<Box<Sleep>>,
    },
}

enum Wake {
    Opened(Result<TransportLink, TransportError>),
    Signal(Option<TransportSignal>),
    ConnectTimeout,
    HeartbeatDue,
    RetryDue,
}

impl Phase {
    async fn wake(&mut self) -> Wake {
        match self {
            Self::Idle => pending().await,
            Self::Opening { open, deadline } => tokio::select! {
                result = open => Wake::Opened(result),
                () = deadline.as_mut() => Wake::ConnectTimeout,
            },
            Self::AwaitingHello { link, deadline } => tokio::select! {
                signal = link.recv() => Wake::Signal(signal),
                () = deadline.as_mut() => Wake::ConnectTimeout,
            },
            Self::Ready { link, heartbeat } => tokio::select! {
                signal = link.recv() => Wake::Signal(signal),
                _ = heartbeat.tick() => Wake::HeartbeatDue,
            },
            Self::Backoff { retry } => {
                retry.as_mut().await;
                Wake::RetryDue
            }
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Self::Opening { .. } | Self::AwaitingHello { .. } | Self::Ready { .. } => true,
            Self::Idle | Self::Backoff { .. } => false,
        }
    }
}

/// Owner of one persistent connection: opening, connect timeout, heartbeat
/// and reconnect with exponential backoff.
pub struct ConnectionClient {
    config: ConnectionConfig,
    request: ConnectRequest,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: watch::Sender<ConnectionState>,
    phase: Phase,
    retry_attempt: u32,
}

impl ConnectionClient {
    /// Spawns the client task in the `disconnected` state.
    pub fn spawn(
        config: ConnectionConfig,
        request: ConnectRequest,
        connector: Arc<dyn Connector>,
    ) -> (
        ConnectionHandle,
        mpsc::UnboundedReceiver<ConnectionEvent>,
        JoinHandle<()>,
    ) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let client = Self {
            config,
            request,
            connector,
            commands: command_rx,
            events: event_tx,
            state: state_tx,
            phase: Phase::Idle,
            retry_attempt: 0,
        };
        let task = tokio::spawn(client.run());

        (
            ConnectionHandle {
                commands: command_tx,
                state: state_rx,
            },
            event_rx,
            task,
        )
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    let command = command.unwrap_or(Command::Shutdown);
                    if !self.apply_command(command) {
                        break;
                    }
                }
                wake = self.phase.wake() => self.apply_wake(wake),
            }
        }

        self.phase = Phase::Idle;
        debug!("connection client stopped");
    }

    fn apply_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect => {
                if self.phase.is_live() {
                    debug!(state = %self.current_state(), "connect ignored; session already live");
                } else {
                    self.retry_attempt = 0;
                    self.begin_attempt();
                }
            }
            Command::Disconnect => {
                self.phase = Phase::Idle;
                self.retry_attempt = 0;
                info!("disconnected by request");
                self.set_state(ConnectionState::Disconnected);
            }
            Command::Restart => match self.current_state() {
                ConnectionState::Disconnected | ConnectionState::Failed(_) => {
                    debug!("restart ignored; no session to restart");
                }
                ConnectionState::Connecting
                | ConnectionState::Ready
                | ConnectionState::Reconnecting { .. } => {
                    self.phase = Phase::Idle;
                    self.retry_attempt = 0;
                    info!("restarting session");
                    self.begin_attempt();
                }
            },
            Command::Send { message, reply } => {
                let _ = reply.send(self.send_frame(&message));
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn apply_wake(&mut self, wake: Wake) {
        match wake {
            Wake::Opened(Ok(link)) => {
                let previous = std::mem::replace(&mut self.phase, Phase::Idle);
                match previous {
                    Phase::Opening { deadline, .. } => {
                        debug!("transport open; awaiting hello");
                        self.phase = Phase::AwaitingHello { link, deadline };
                    }
                    other => self.phase = other,
                }
            }
            Wake::Opened(Err(error)) => self.handle_transport_loss(error.to_string()),
            Wake::ConnectTimeout => self.handle_transport_loss(format!(
                "no hello within {}ms",
                self.config.connect_timeout.as_millis()
            )),
            Wake::Signal(Some(TransportSignal::Frame(text))) => self.handle_frame(&text),
            Wake::Signal(Some(TransportSignal::Closed(reason))) => {
                self.handle_transport_loss(reason)
            }
            Wake::Signal(None) => self.handle_transport_loss("transport task ended".to_owned()),
            Wake::HeartbeatDue => {
                if let Err(error) = self.send_frame(&OutboundMessage::Ping) {
                    self.handle_transport_loss(format!("heartbeat failed: {error}"));
                }
            }
            Wake::RetryDue => self.begin_attempt(),
        }
    }

    fn handle_frame(&mut self, text: &str) {
        let message = match decode(text) {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, "dropping undecodable frame");
                return;
            }
        };

        if matches!(message, InboundMessage::Hello { .. })
            && matches!(self.phase, Phase::AwaitingHello { .. })
        {
            self.become_ready();
        }

        if let InboundMessage::Unknown { type_tag, .. } = &message {
            debug!(type_tag = %type_tag, "forwarding unrecognized frame");
        }
        self.emit(ConnectionEvent::Frame(message));
    }

    fn become_ready(&mut self) {
        let previous = std::mem::replace(&mut self.phase, Phase::Idle);
        let Phase::AwaitingHello { link, .. } = previous else {
            self.phase = previous;
            return;
        };

        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.retry_attempt = 0;
        self.phase = Phase::Ready { link, heartbeat };
        info!("connection ready");
        self.set_state(ConnectionState::Ready);
    }

    fn send_frame(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        let Phase::Ready { link, .. } = &self.phase else {
            return Err(TransportError::NotReady {
                state: self.current_state().to_string(),
            });
        };

        let text = encode(message)?;
        if let Err(error) = link.send(text) {
            self.handle_transport_loss(error.to_string());
            return Err(error);
        }
        Ok(())
    }

    fn begin_attempt(&mut self) {
        let open = self.connector.open(&self.request);
        let deadline = Box::pin(sleep(self.config.connect_timeout));
        self.phase = Phase::Opening { open, deadline };
        debug!(attempt = self.retry_attempt, "connecting");
        self.set_state(ConnectionState::Connecting);
    }

    /// The single disconnect-handling pass. Replacing the phase drops the
    /// transport link, so a close notification raised by that forced close is
    /// never observed; a second call for the same session is a no-op.
    fn handle_transport_loss(&mut self, reason: String) {
        if !self.phase.is_live() {
            debug!(%reason, "transport loss already handled");
            return;
        }
        self.phase = Phase::Idle;

        self.retry_attempt += 1;
        let policy = &self.config.backoff;
        if policy.is_exhausted(self.retry_attempt) {
            let reason = format!(
                "gave up after {} reconnect attempts: {reason}",
                policy.max_retries
            );
            warn!(%reason, "connection failed");
            self.set_state(ConnectionState::Failed(reason.clone()));
            self.emit(ConnectionEvent::RetriesExhausted(reason));
            return;
        }

        let attempt = self.retry_attempt;
        let delay = policy.delay_for(attempt);
        warn!(%reason, attempt, delay_ms = delay.as_millis() as u64, "connection lost; scheduling reconnect");
        self.phase = Phase::Backoff {
            retry: Box::pin(sleep(delay)),
        };
        self.set_state(ConnectionState::Reconnecting { attempt, delay });
    }

    fn current_state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    fn set_state(&mut self, next: ConnectionState) {
        if *self.state.borrow() == next {
            return;
        }
        self.state.send_replace(next.clone());
        self.emit(ConnectionEvent::StateChanged(next));
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}
