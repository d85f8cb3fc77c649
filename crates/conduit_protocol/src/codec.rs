use serde_json::Value;

use crate::error::ProtocolError;
use crate::inbound::InboundMessage;
use crate::outbound::OutboundMessage;

/// Encode one outbound frame as JSON text.
pub fn encode(message: &OutboundMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|source| ProtocolError::Encode {
        type_tag: message.type_tag(),
        source,
    })
}

/// Decode one inbound frame.
///
/// Unknown type tags are not errors: they decode to
/// [`InboundMessage::Unknown`] with the raw payload preserved. Invalid JSON,
/// a missing `type`, or malformed fields on a known type are errors the caller
/// is expected to log and drop.
pub fn decode(text: &str) -> Result<InboundMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
    let type_tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_owned();

    if !InboundMessage::is_known_type(&type_tag) {
        return Ok(InboundMessage::Unknown {
            type_tag,
            payload: value,
        });
    }

    serde_json::from_value(value).map_err(|source| ProtocolError::malformed(type_tag, source))
}

/// Decode an outbound frame the way the server does.
pub fn decode_outbound(text: &str) -> Result<OutboundMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
    let type_tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_owned();
    serde_json::from_value(value).map_err(|source| ProtocolError::malformed(type_tag, source))
}

/// Encode an inbound frame as a server would send it.
///
/// Unknown frames are written back as their preserved payload.
pub fn encode_inbound(message: &InboundMessage) -> Result<String, ProtocolError> {
    if let InboundMessage::Unknown { payload, .. } = message {
        return Ok(payload.to_string());
    }

    serde_json::to_string(message).map_err(|source| ProtocolError::Encode {
        type_tag: "inbound",
        source,
    })
}
