use std::sync::Arc;

use conduit_transport::http_stream::ActiveStream;
use conduit_transport::{
    ConnectRequest, ConnectionClient, ConnectionConfig, ConnectionEvent, ConnectionHandle,
    Connector, HttpStreamSource, TaggedSourceEvent,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub(crate) enum BackendEvent {
    Connection(ConnectionEvent),
    Source(TaggedSourceEvent),
}

/// Persistent socket owned by a [`ConnectionClient`] task.
pub(crate) struct SocketBackend {
    pub(crate) handle: ConnectionHandle,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    task: JoinHandle<()>,
}

/// HTTP streaming source with at most one request in flight.
pub(crate) struct HttpBackend {
    source: HttpStreamSource,
    active: Option<ActiveStream>,
    events_tx: mpsc::UnboundedSender<TaggedSourceEvent>,
    events_rx: mpsc::UnboundedReceiver<TaggedSourceEvent>,
}

impl HttpBackend {
    pub(crate) fn start(&mut self, content: String, generation: u64) {
        self.cancel();
        self.active = Some(
            self.source
                .start(content, generation, self.events_tx.clone()),
        );
    }

    /// Cancels the in-flight request, if any. Returns whether one existed.
    pub(crate) fn cancel(&mut self) -> bool {
        match self.active.take() {
            Some(active) => {
                active.cancel();
                true
            }
            None => false,
        }
    }

    /// True when `generation` belongs to the request in flight.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.generation() == generation)
    }

    pub(crate) fn finish(&mut self) {
        self.active = None;
    }

    pub(crate) fn model(&self) -> &str {
        &self.source.config().model
    }
}

pub(crate) enum Backend {
    Socket(SocketBackend),
    Http(HttpBackend),
}

impl Backend {
    pub(crate) fn socket(
        config: ConnectionConfig,
        request: ConnectRequest,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (handle, events, task) = ConnectionClient::spawn(config, request, connector);
        Self::Socket(SocketBackend {
            handle,
            events,
            task,
        })
    }

    pub(crate) fn http(source: HttpStreamSource) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self::Http(HttpBackend {
            source,
            active: None,
            events_tx,
            events_rx,
        })
    }

    pub(crate) async fn next_event(&mut self) -> Option<BackendEvent> {
        match self {
            Self::Socket(socket) => socket.events.recv().await.map(BackendEvent::Connection),
            Self::Http(http) => http.events_rx.recv().await.map(BackendEvent::Source),
        }
    }

    pub(crate) fn shutdown(&mut self) {
        match self {
            Self::Socket(socket) => {
                socket.handle.shutdown();
                socket.task.abort();
            }
            Self::Http(http) => {
                http.cancel();
            }
        }
    }
}
