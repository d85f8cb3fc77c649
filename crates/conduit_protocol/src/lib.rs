//! Wire vocabulary for the conduit chat protocol.
//!
//! Frames are JSON objects tagged by a `type` field. Outbound intents and
//! inbound server frames are closed sets of typed messages; inbound frames with
//! a type tag this crate does not know decode to [`InboundMessage::Unknown`]
//! instead of failing, so newer servers keep working with older clients.
//!
//! The [`completion`] and [`sse`] modules cover the second backend kind: an
//! OpenAI-compatible chat-completions endpoint streamed as server-sent events.

pub mod codec;
pub mod completion;
pub mod error;
pub mod inbound;
pub mod outbound;
pub mod sse;

pub use codec::{decode, decode_outbound, encode, encode_inbound};
pub use completion::{ChatCompletionRequest, ChatMessage, CompletionDelta, CompletionUsage};
pub use error::ProtocolError;
pub use inbound::{InboundMessage, PermissionDetail, PermissionRequest, UsageMeta};
pub use outbound::OutboundMessage;
pub use sse::{SseFrame, SseStreamParser};
