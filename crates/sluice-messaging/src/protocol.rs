use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_types::{Message, MessageKind, MessageMethod, RequestId};
use thiserror::Error;
use tokio_util::codec::LengthDelimitedCodec;

pub const PROTOCOL_VERSION: u16 = 1;

/// Largest frame accepted unless configured otherwise.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode messagepack payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode messagepack payload: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("invalid message payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),
}

/// On-the-wire shape of a [`Message`]. The payload travels as JSON text.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    version: u16,
    request_id: String,
    method: MessageMethod,
    kind: MessageKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    payload: String,
}

pub fn encode_message(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let payload = if message.payload.is_null() {
        String::new()
    } else {
        serde_json::to_string(&message.payload)?
    };
    let wire = WireMessage {
        version: PROTOCOL_VERSION,
        request_id: message.request_id.as_str().to_string(),
        method: message.method,
        kind: message.kind,
        payload,
    };
    Ok(rmp_serde::to_vec_named(&wire)?)
}

pub fn decode_message(bytes: &[u8]) -> Result<Message, ProtocolError> {
    let wire: WireMessage = rmp_serde::from_slice(bytes)?;
    if wire.version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnexpectedMessage(format!(
            "unsupported protocol version {}",
            wire.version
        )));
    }
    if wire.request_id.is_empty() {
        return Err(ProtocolError::UnexpectedMessage(
            "message without request ID".to_string(),
        ));
    }
    let payload = if wire.payload.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&wire.payload)?
    };
    Ok(Message::new(
        RequestId::new(wire.request_id),
        wire.method,
        wire.kind,
        payload,
    ))
}

/// Length-prefixed framing shared by both directions of a connection.
pub fn frame_codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

pub(crate) fn encode_frame(message: &Message) -> Result<Bytes, ProtocolError> {
    encode_message(message).map(Bytes::from)
}

pub(crate) fn decode_frame(frame: &BytesMut) -> Result<Message, ProtocolError> {
    decode_message(frame)
}
