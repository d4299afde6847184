//! Shared protocol definitions for the Roomcast wire format.

pub mod codec;
pub mod event;
