use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Future resolving to an open transport link.
pub type OpenFuture = BoxFuture<'static, Result<TransportLink, TransportError>>;

/// What a connector needs to open one transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub endpoint: String,
    pub bearer_token: Option<String>,
}

impl ConnectRequest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bearer_token: None,
        }
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }
}

/// Opens transport sessions. Each call yields an independent link.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, request: &ConnectRequest) -> OpenFuture;
}

/// Signal delivered by a transport session, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// One raw text frame.
    Frame(String),
    /// The session ended; no further signals follow.
    Closed(String),
}

/// Client side of one open transport session.
///
/// Dropping the link closes the session. Signals the session emits after the
/// drop are never observed.
#[derive(Debug)]
pub struct TransportLink {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<TransportSignal>,
}

/// Transport side of a [`TransportLink`], held by the task pumping the session.
#[derive(Debug)]
pub struct TransportPeer {
    pub outbound: mpsc::UnboundedReceiver<String>,
    pub inbound: mpsc::UnboundedSender<TransportSignal>,
}

impl TransportLink {
    /// Creates a connected link/peer pair.
    pub fn pair() -> (Self, TransportPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            TransportPeer {
                outbound: outbound_rx,
                inbound: inbound_tx,
            },
        )
    }

    /// Hands one text frame to the transport.
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(text)
            .map_err(|_| TransportError::Send("transport session has ended".to_owned()))
    }

    /// Next signal, or `None` once the transport task is gone.
    pub async fn recv(&mut self) -> Option<TransportSignal> {
        self.inbound.recv().await
    }
}
