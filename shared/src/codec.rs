//! JSON envelope codec for both device transports
//!
//! Stream transport frames:
//! ```text
//! [ 2 bytes: length (u16, big-endian) ][ N bytes: UTF-8 JSON ]
//! ```
//!
//! Message transport: the same JSON text, one object per message.
//!
//! The JSON shape is `{"action": <string>, "params": {...}}`, with the
//! correlation id embedded as `params.req_id`. The identification handshake
//! `{"device_id": <string>}` is the only other accepted shape.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::envelope::{Action, Envelope, Frame, Params};
use crate::protocol::{CORRELATION_FIELD, LENGTH_PREFIX_LEN, MAX_FRAME_LEN};

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_LEN})")]
    FrameTooLarge(usize),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid envelope: {0}")]
    Schema(String),
}

/// Build the wire JSON for an envelope
pub fn to_value(envelope: &Envelope) -> Value {
    let mut params = envelope.params.clone();
    if let Some(ref id) = envelope.correlation_id {
        params.insert(CORRELATION_FIELD.to_string(), Value::String(id.clone()));
    }

    let mut obj = Map::new();
    obj.insert("action".into(), Value::String(envelope.action.name().to_string()));
    obj.insert("params".into(), Value::Object(params));
    Value::Object(obj)
}

/// Validate a parsed JSON value against the two accepted shapes
pub fn from_value(value: Value) -> Result<Frame, CodecError> {
    let mut obj = match value {
        Value::Object(obj) => obj,
        other => {
            return Err(CodecError::Schema(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            )))
        }
    };

    match obj.remove("action") {
        Some(Value::String(name)) => {
            let mut params = match obj.remove("params") {
                None | Some(Value::Null) => Params::new(),
                Some(Value::Object(params)) => params,
                Some(other) => {
                    return Err(CodecError::Schema(format!(
                        "params must be an object, got {}",
                        json_kind(&other)
                    )))
                }
            };

            // Only string ids are treated as correlation ids; anything else
            // stays in the map untouched.
            let correlation_id = match params.get(CORRELATION_FIELD) {
                Some(Value::String(_)) => match params.remove(CORRELATION_FIELD) {
                    Some(Value::String(id)) => Some(id),
                    _ => None,
                },
                _ => None,
            };

            Ok(Frame::Command(Envelope {
                action: Action::from_name(&name),
                params,
                correlation_id,
            }))
        }
        Some(other) => Err(CodecError::Schema(format!(
            "action must be a string, got {}",
            json_kind(&other)
        ))),
        None => match obj.remove("device_id") {
            Some(Value::String(device_id)) if !device_id.is_empty() => {
                Ok(Frame::Identify { device_id })
            }
            Some(_) => Err(CodecError::Schema("device_id must be a non-empty string".into())),
            None => Err(CodecError::Schema("missing action".into())),
        },
    }
}

fn frame_to_value(frame: &Frame) -> Value {
    match frame {
        Frame::Command(envelope) => to_value(envelope),
        Frame::Identify { device_id } => {
            let mut obj = Map::new();
            obj.insert("device_id".into(), Value::String(device_id.clone()));
            Value::Object(obj)
        }
    }
}

/// Decode a complete JSON payload (no length prefix)
pub fn decode_payload(payload: &[u8]) -> Result<Frame, CodecError> {
    let value: Value = serde_json::from_slice(payload)?;
    from_value(value)
}

/// Encode an envelope into a length-prefixed frame
pub fn encode(envelope: &Envelope) -> Result<Bytes, CodecError> {
    encode_frame(&Frame::Command(envelope.clone()))
}

/// Encode any frame (including the handshake) into a length-prefixed buffer
pub fn encode_frame(frame: &Frame) -> Result<Bytes, CodecError> {
    let payload = serde_json::to_vec(&frame_to_value(frame))?;

    if payload.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    buf.put_u16(payload.len() as u16);
    buf.put_slice(&payload);

    Ok(buf.freeze())
}

/// Try to decode a length-prefixed frame from a buffer
///
/// Returns:
/// - `Ok(Some(frame))` if a complete frame was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if a complete frame was present but its payload is invalid.
///   The offending frame has already been consumed, so the caller can keep
///   decoding whatever follows it.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
    if buf.len() < LENGTH_PREFIX_LEN {
        return Ok(None);
    }

    // Peek at the length prefix without consuming
    let msg_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;

    if buf.len() < LENGTH_PREFIX_LEN + msg_len {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_LEN);
    let payload = buf.split_to(msg_len);

    decode_payload(&payload).map(Some)
}

/// Encode an envelope as a single text message
pub fn encode_message(envelope: &Envelope) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&to_value(envelope))?)
}

/// Decode one text message from the message transport
pub fn decode_message(text: &str) -> Result<Frame, CodecError> {
    decode_payload(text.as_bytes())
}

/// Streaming decoder for the framed transport
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial frame data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete
    /// frames. An `Err` only affects the frame it reports.
    pub fn decode_next(&mut self) -> Result<Option<Frame>, CodecError> {
        decode(&mut self.buffer)
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
