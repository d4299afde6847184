//! Room directory: maps room identifiers to member connections.
//!
//! Rooms are implicit. An entry materializes on the first `add_member` and
//! is deleted as soon as its member set becomes empty, so a room exists
//! exactly when it has members. Lookups on unknown rooms return empty sets.

use std::collections::{HashMap, HashSet};

use crate::registry::ConnectionId;

/// Membership table for all live rooms.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl RoomDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id` to `room`, creating the room if needed.
    ///
    /// Returns `true` if `id` was not already a member.
    pub fn add_member(&mut self, room: &str, id: ConnectionId) -> bool {
        self.rooms.entry(room.to_string()).or_default().insert(id)
    }

    /// Removes `id` from `room`, deleting the room once it is empty.
    ///
    /// Returns `true` if `id` was a member.
    pub fn remove_member(&mut self, room: &str, id: ConnectionId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&id);
        if members.is_empty() {
            self.rooms.remove(room);
        }
        removed
    }

    /// Returns every member of `room` except `excluded`.
    #[must_use]
    pub fn members_excluding(&self, room: &str, excluded: ConnectionId) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .copied()
                    .filter(|id| *id != excluded)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns every member of `room`.
    #[must_use]
    pub fn all_members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns `true` if `id` is a member of `room`.
    #[must_use]
    pub fn is_member(&self, room: &str, id: ConnectionId) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains(&id))
    }

    /// Returns `true` if `room` currently has members.
    #[must_use]
    pub fn contains(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Number of members in `room` (zero for unknown rooms).
    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, HashSet::len)
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
