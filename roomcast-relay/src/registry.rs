//! Connection registry: the authoritative record of live connections.
//!
//! Each record holds the connection's last-known display label and the set
//! of rooms it has joined. The registry is plain in-memory state with no
//! locking of its own; the [`RelayEngine`](crate::engine::RelayEngine)
//! keeps it behind the same lock as the room directory so the two stay
//! consistent.

use std::collections::{HashMap, HashSet};

/// Opaque identifier assigned to a connection when the transport accepts it.
///
/// Allocation belongs to the transport; the registry only stores ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a `ConnectionId` from a raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle state of a connection as seen by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, member of no room.
    Connected,
    /// Member of at least one room.
    Joined,
    /// Unknown or already unregistered.
    Disconnected,
}

/// What the registry knew about a connection at the moment it was removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Departed {
    /// Rooms the connection was a member of.
    pub rooms: HashSet<String>,
    /// Last username the connection supplied, if any.
    pub label: Option<String>,
}

#[derive(Debug, Default)]
struct ConnectionRecord {
    label: Option<String>,
    rooms: HashSet<String>,
}

/// Tracks every live connection and the rooms it has joined.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionRecord>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly accepted connection with an empty room set.
    ///
    /// Ids are unique per transport accept, so an existing record is left
    /// untouched.
    pub fn register(&mut self, id: ConnectionId) {
        self.connections.entry(id).or_default();
    }

    /// Removes a connection, returning its rooms and last label.
    ///
    /// Returns `None` for an unknown id.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Departed> {
        self.connections.remove(&id).map(|record| Departed {
            rooms: record.rooms,
            label: record.label,
        })
    }

    /// Records that `id` joined `room`. Returns `true` if the set changed.
    pub fn record_join(&mut self, id: ConnectionId, room: &str) -> bool {
        self.connections
            .get_mut(&id)
            .is_some_and(|record| record.rooms.insert(room.to_string()))
    }

    /// Records that `id` left `room`. Returns `true` if the set changed.
    pub fn record_leave(&mut self, id: ConnectionId, room: &str) -> bool {
        self.connections
            .get_mut(&id)
            .is_some_and(|record| record.rooms.remove(room))
    }

    /// Remembers the most recent username supplied by `id`.
    pub fn set_label(&mut self, id: ConnectionId, label: &str) {
        if let Some(record) = self.connections.get_mut(&id) {
            record.label = Some(label.to_string());
        }
    }

    /// Returns the last username supplied by `id`, if any.
    #[must_use]
    pub fn label(&self, id: ConnectionId) -> Option<&str> {
        self.connections.get(&id)?.label.as_deref()
    }

    /// Returns `true` if `id` is registered and a member of `room`.
    #[must_use]
    pub fn is_in(&self, id: ConnectionId, room: &str) -> bool {
        self.connections
            .get(&id)
            .is_some_and(|record| record.rooms.contains(room))
    }

    /// Returns the rooms `id` is currently in (empty for unknown ids).
    #[must_use]
    pub fn rooms_of(&self, id: ConnectionId) -> Vec<String> {
        self.connections
            .get(&id)
            .map(|record| record.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the lifecycle state of `id`.
    #[must_use]
    pub fn state(&self, id: ConnectionId) -> ConnectionState {
        match self.connections.get(&id) {
            None => ConnectionState::Disconnected,
            Some(record) if record.rooms.is_empty() => ConnectionState::Connected,
            Some(_) => ConnectionState::Joined,
        }
    }

    /// Returns `true` if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
