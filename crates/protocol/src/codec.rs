//! Header decoding and frame encoding
//!
//! # Frame Format
//!
//! ```text
//! [JSON header][END_SEQUENCE][payload: payload_size bytes]
//! ```
//!
//! A header without a `payload_size` field is followed by no payload.

use crate::error::{ProtocolError, Result};
use crate::messages::{Header, Message, PAYLOAD_SIZE_KEY};
use crate::variant::END_SEQUENCE;
use serde_json::Value;

/// Largest payload a header may announce (16 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Decode header bytes (with or without the trailing end sequence)
pub fn decode_header(bytes: &[u8]) -> Result<Header> {
    let body = bytes.strip_suffix(END_SEQUENCE).unwrap_or(bytes);
    match serde_json::from_slice::<Value>(body)? {
        Value::Object(map) => Ok(map),
        _ => Err(ProtocolError::HeaderNotObject),
    }
}

/// Payload length declared by a header; zero when the field is absent
pub fn payload_size(header: &Header) -> Result<usize> {
    let Some(value) = header.get(PAYLOAD_SIZE_KEY) else {
        return Ok(0);
    };

    let size = value
        .as_u64()
        .ok_or_else(|| ProtocolError::InvalidMessage {
            kind: "header",
            reason: format!("{} is not an unsigned integer: {}", PAYLOAD_SIZE_KEY, value),
        })? as usize;

    if size > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadSize {
            expected: MAX_PAYLOAD_SIZE,
            actual: size,
        });
    }
    Ok(size)
}

/// Encode a header and payload as one wire frame
pub fn encode_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let text = Value::Object(header.clone()).to_string();
    let mut frame = Vec::with_capacity(text.len() + END_SEQUENCE.len() + payload.len());
    frame.extend_from_slice(text.as_bytes());
    frame.extend_from_slice(END_SEQUENCE);
    frame.extend_from_slice(payload);
    frame
}

/// Encode a message exactly as a server would send it
pub fn encode_message(message: &Message) -> Vec<u8> {
    let (header, payload) = message.to_header();
    encode_frame(&header, &payload)
}
