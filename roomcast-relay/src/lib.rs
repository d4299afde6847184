//! Roomcast relay server library.
//!
//! Exposes the relay for use in tests and embedding. Clients connect over
//! WebSocket, join named rooms, and exchange opaque encrypted payloads that
//! the relay forwards to the other members of the room.

pub mod config;
pub mod directory;
pub mod engine;
pub mod registry;
pub mod server;
