//! Transport adapters for the conduit chat core.
//!
//! [`ConnectionClient`] owns one persistent WebSocket session end to end:
//! opening, the connect timeout, the heartbeat and the exponential-backoff
//! reconnect loop. [`HttpStreamSource`] adapts an OpenAI-compatible streaming
//! endpoint to the same chunk/complete/error vocabulary and supports native
//! mid-stream cancellation.
//!
//! Both adapters report through channels; neither shares mutable state with
//! its consumer.

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod headers;
pub mod http_stream;
pub mod link;
pub mod socket;
pub mod state;
pub mod url;

pub use backoff::BackoffPolicy;
pub use config::{ConnectionConfig, HttpStreamConfig};
pub use connection::{ConnectionClient, ConnectionEvent, ConnectionHandle};
pub use error::TransportError;
pub use http_stream::{CancellationSignal, HttpStreamSource, SourceEvent, TaggedSourceEvent};
pub use link::{ConnectRequest, Connector, TransportLink, TransportSignal};
pub use socket::WebSocketConnector;
pub use state::ConnectionState;
