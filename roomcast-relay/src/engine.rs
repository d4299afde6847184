//! Relay engine: inbound event dispatch and room fan-out.
//!
//! The engine owns the [`ConnectionRegistry`] and [`RoomDirectory`] behind a
//! single lock and hands outbound frames to a [`Transport`]. Every inbound
//! event takes the lock once, mutates membership, snapshots its recipient
//! set, and releases the lock before any frame is handed to the transport.
//! A member added or removed concurrently is therefore either fully inside
//! or fully outside a given fan-out.
//!
//! Malformed events are dropped without telling the sender. Delivery is
//! fire-and-forget.

use std::collections::HashMap;

use parking_lot::Mutex;
use roomcast_proto::codec::{Frame, Payload};
use roomcast_proto::event::{self, ANONYMOUS_LABEL, EventKind, MembershipRequest};

use crate::directory::RoomDirectory;
use crate::registry::{ConnectionId, ConnectionRegistry, ConnectionState};

/// Outbound half of the transport adapter.
///
/// Implementations must not block: `send` hands the frame to the
/// recipient's own writer and returns immediately.
pub trait Transport: Send + Sync {
    /// Best-effort delivery of one frame to one connection.
    ///
    /// Returns `false` if the connection is gone or its writer has shut down.
    fn send(&self, to: ConnectionId, frame: &Frame) -> bool;

    /// Delivers `frame` to every recipient, returning how many accepted it.
    ///
    /// A failed recipient never prevents delivery to the others.
    fn deliver(&self, recipients: &[ConnectionId], frame: &Frame) -> usize {
        recipients.iter().filter(|id| self.send(**id, frame)).count()
    }
}

/// Connection and room counts at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Live connections.
    pub connections: usize,
    /// Rooms with at least one member.
    pub rooms: usize,
}

type Handler<T> = fn(&RelayEngine<T>, ConnectionId, Payload);

#[derive(Debug, Default)]
struct Tables {
    connections: ConnectionRegistry,
    rooms: RoomDirectory,
}

/// Processes inbound events and fans outbound events out to room members.
pub struct RelayEngine<T> {
    tables: Mutex<Tables>,
    transport: T,
    handlers: HashMap<&'static str, Handler<T>>,
}

impl<T: Transport> RelayEngine<T> {
    /// Creates an engine with empty tables that delivers through `transport`.
    #[must_use]
    pub fn new(transport: T) -> Self {
        let mut handlers: HashMap<&'static str, Handler<T>> = HashMap::new();
        handlers.insert(EventKind::Join.as_str(), Self::handle_join);
        handlers.insert(EventKind::Leave.as_str(), Self::handle_leave);
        handlers.insert(EventKind::Ciphertext.as_str(), Self::handle_ciphertext);

        Self {
            tables: Mutex::new(Tables::default()),
            transport,
            handlers,
        }
    }

    /// Returns the transport this engine delivers through.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Registers a connection accepted by the transport.
    pub fn on_connect(&self, id: ConnectionId) {
        self.tables.lock().connections.register(id);
        tracing::info!(conn = %id, "connection registered");
    }

    /// Tears down a connection and notifies every room it was in.
    ///
    /// Safe to call more than once; later calls are no-ops.
    pub fn on_disconnect(&self, id: ConnectionId) {
        let (label, notices) = {
            let mut tables = self.tables.lock();
            let Some(departed) = tables.connections.unregister(id) else {
                return;
            };
            let notices: Vec<(String, Vec<ConnectionId>)> = departed
                .rooms
                .into_iter()
                .map(|room| {
                    tables.rooms.remove_member(&room, id);
                    let remaining = tables.rooms.all_members(&room);
                    (room, remaining)
                })
                .collect();
            (departed.label, notices)
        };

        let label = label.as_deref().unwrap_or(ANONYMOUS_LABEL);
        let frame = event::left(label);
        for (room, remaining) in &notices {
            let delivered = self.transport.deliver(remaining, &frame);
            tracing::debug!(conn = %id, room = %room, delivered, "disconnect notice sent");
        }

        tracing::info!(conn = %id, rooms = notices.len(), "connection unregistered");
        let stats = self.stats();
        tracing::debug!(connections = stats.connections, rooms = stats.rooms, "relay stats");
    }

    /// Dispatches one inbound event from `from`.
    ///
    /// Unknown event names are dropped.
    pub fn on_event(&self, from: ConnectionId, name: &str, payload: Payload) {
        match self.handlers.get(name) {
            Some(handler) => handler(self, from, payload),
            None => tracing::debug!(conn = %from, event = %name, "dropping unknown event"),
        }
    }

    /// Dispatches a decoded wire frame.
    pub fn on_frame(&self, from: ConnectionId, frame: Frame) {
        self.on_event(from, &frame.event, frame.data);
    }

    fn handle_join(&self, from: ConnectionId, payload: Payload) {
        let Some(MembershipRequest { username, room }) = MembershipRequest::from_payload(&payload)
        else {
            tracing::debug!(conn = %from, "dropping join without username/room");
            return;
        };

        let recipients = {
            let mut tables = self.tables.lock();
            if !tables.connections.contains(from) {
                tracing::debug!(conn = %from, "dropping join from unregistered connection");
                return;
            }
            tables.rooms.add_member(&room, from);
            tables.connections.record_join(from, &room);
            tables.connections.set_label(from, &username);
            tables.rooms.all_members(&room)
        };

        let delivered = self.transport.deliver(&recipients, &event::joined(&username));
        tracing::debug!(conn = %from, room = %room, delivered, "joined room");
    }

    fn handle_leave(&self, from: ConnectionId, payload: Payload) {
        let Some(MembershipRequest { username, room }) = MembershipRequest::from_payload(&payload)
        else {
            tracing::debug!(conn = %from, "dropping leave without username/room");
            return;
        };

        let recipients = {
            let mut tables = self.tables.lock();
            if !tables.connections.contains(from) {
                tracing::debug!(conn = %from, "dropping leave from unregistered connection");
                return;
            }
            tables.rooms.remove_member(&room, from);
            tables.connections.record_leave(from, &room);
            tables.connections.set_label(from, &username);
            tables.rooms.all_members(&room)
        };

        let delivered = self.transport.deliver(&recipients, &event::left(&username));
        tracing::debug!(conn = %from, room = %room, delivered, "left room");
    }

    fn handle_ciphertext(&self, from: ConnectionId, payload: Payload) {
        let Some(room) = event::target_room(&payload).map(str::to_string) else {
            tracing::debug!(conn = %from, "dropping ciphertext without room");
            return;
        };

        let recipients = self.tables.lock().rooms.members_excluding(&room, from);

        let delivered = self.transport.deliver(&recipients, &event::ciphertext(payload));
        tracing::debug!(
            conn = %from,
            room = %room,
            recipients = recipients.len(),
            delivered,
            "relayed ciphertext"
        );
    }

    /// Returns the current connection and room counts.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        let tables = self.tables.lock();
        RelayStats {
            connections: tables.connections.len(),
            rooms: tables.rooms.room_count(),
        }
    }

    /// Returns the lifecycle state of a connection.
    #[must_use]
    pub fn state(&self, id: ConnectionId) -> ConnectionState {
        self.tables.lock().connections.state(id)
    }

    /// Returns the rooms a connection has joined.
    #[must_use]
    pub fn rooms_of(&self, id: ConnectionId) -> Vec<String> {
        self.tables.lock().connections.rooms_of(id)
    }

    /// Returns the current members of a room.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.tables.lock().rooms.all_members(room)
    }

    /// Returns `true` if `id` is in `room` according to both tables.
    ///
    /// A disagreement between the tables would be a bookkeeping bug; it is
    /// reported as "not a member".
    #[must_use]
    pub fn is_member(&self, id: ConnectionId, room: &str) -> bool {
        let tables = self.tables.lock();
        tables.rooms.is_member(room, id) && tables.connections.is_in(id, room)
    }
}
