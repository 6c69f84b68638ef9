//! Keeping replicas in step across the room.
//!
//! Units never drive each other's lights.  They trade small messages about
//! the musical state ([`wire_message::SyncMessage`]) over a broadcast
//! [`sync_channel::SyncChannel`] and let each replica settle by
//! last-write-wins per cell, with a full snapshot exchange whenever a unit
//! (re)connects.  [`session::SyncSession`] ties the pieces together.
pub mod delta_codec;
pub mod local_bus;
pub mod session;
pub mod sync_channel;
pub mod websocket_channel;
pub mod wire_message;
