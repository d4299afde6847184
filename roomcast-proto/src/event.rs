//! Event names and payload schemas for the Roomcast relay protocol.
//!
//! | Event        | Direction | Fields                                         |
//! |--------------|-----------|------------------------------------------------|
//! | `join`       | in        | `username`, `room`                             |
//! | `leave`      | in        | `username`, `room`                             |
//! | `ciphertext` | in/out    | `room`, plus opaque fields forwarded verbatim  |
//! | `system`     | out       | `msg`                                          |
//!
//! Field names are part of the compatibility surface with existing clients.

use serde_json::Value;

use crate::codec::{Frame, Payload};

/// Placeholder label used when a connection never supplied a username.
pub const ANONYMOUS_LABEL: &str = "anonymous";

/// The event names understood by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Client joins a room.
    Join,
    /// Client leaves a room.
    Leave,
    /// Opaque encrypted payload addressed to a room.
    Ciphertext,
    /// Server-generated notification.
    System,
}

impl EventKind {
    /// All event kinds, in wire-table order.
    pub const ALL: [Self; 4] = [Self::Join, Self::Leave, Self::Ciphertext, Self::System];

    /// Returns the wire name of this event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Ciphertext => "ciphertext",
            Self::System => "system",
        }
    }

    /// Looks up an event kind by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields of a `join` or `leave` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipRequest {
    /// Client-supplied display label. Untrusted; only used in system text.
    pub username: String,
    /// Target room identifier.
    pub room: String,
}

impl MembershipRequest {
    /// Extracts `username` and `room` from a payload.
    ///
    /// Returns `None` unless both are present as non-empty strings.
    #[must_use]
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        Some(Self {
            username: non_empty_str(payload, "username")?.to_string(),
            room: non_empty_str(payload, "room")?.to_string(),
        })
    }
}

/// Returns the target room of a `ciphertext` payload, if present and
/// non-empty.
#[must_use]
pub fn target_room(payload: &Payload) -> Option<&str> {
    non_empty_str(payload, "room")
}

/// Builds a `system` frame carrying `msg`.
#[must_use]
pub fn system(msg: impl Into<String>) -> Frame {
    let mut data = Payload::new();
    data.insert("msg".to_string(), Value::String(msg.into()));
    Frame::new(EventKind::System.as_str(), data)
}

/// Builds the `system` notification announcing that `label` joined.
#[must_use]
pub fn joined(label: &str) -> Frame {
    system(format!("{label} joined."))
}

/// Builds the `system` notification announcing that `label` left.
#[must_use]
pub fn left(label: &str) -> Frame {
    system(format!("{label} left."))
}

/// Wraps an inbound `ciphertext` payload, unchanged, for forwarding.
#[must_use]
pub fn ciphertext(payload: Payload) -> Frame {
    Frame::new(EventKind::Ciphertext.as_str(), payload)
}

fn non_empty_str<'a>(payload: &'a Payload, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
