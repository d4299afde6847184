//! Serialization and deserialization for the Roomcast wire format.
//!
//! Every WebSocket frame carries exactly one JSON object:
//!
//! ```json
//! {"event": "join", "data": {"username": "alice", "room": "lobby"}}
//! ```
//!
//! `data` is an untyped key/value object. The relay only reads the handful
//! of routing fields it needs and forwards everything else verbatim.

use serde::{Deserialize, Serialize};

/// Untyped key/value payload carried by every event.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// The frame is not a JSON object of the expected shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The frame exceeds the configured size limit.
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge {
        /// Size of the rejected frame.
        size: usize,
        /// Configured limit.
        max: usize,
    },
}

/// One named event and its payload, as sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name (`join`, `leave`, `ciphertext`, `system`).
    pub event: String,
    /// Event payload. Absent `data` decodes as an empty object.
    #[serde(default)]
    pub data: Payload,
}

impl Frame {
    /// Creates a frame from an event name and payload.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Payload) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Encodes a [`Frame`] into its JSON text form.
///
/// # Errors
///
/// Returns `ProtoError::Malformed` if the frame cannot be serialized.
pub fn encode(frame: &Frame) -> Result<String, ProtoError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decodes a [`Frame`] from raw frame bytes (UTF-8 JSON).
///
/// # Errors
///
/// Returns `ProtoError::Malformed` if the bytes are not a JSON object with
/// a string `event` and an object `data`.
pub fn decode(bytes: &[u8]) -> Result<Frame, ProtoError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Decodes a [`Frame`], rejecting input larger than `max_size` bytes
/// before parsing.
///
/// # Errors
///
/// Returns `ProtoError::TooLarge` for oversized input, otherwise the same
/// errors as [`decode`].
pub fn decode_limited(bytes: &[u8], max_size: usize) -> Result<Frame, ProtoError> {
    if bytes.len() > max_size {
        return Err(ProtoError::TooLarge {
            size: bytes.len(),
            max: max_size,
        });
    }
    decode(bytes)
}
