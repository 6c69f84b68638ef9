//! rtjam lights - shared LED lighting for jam sessions
//!
//! provides the library elements for a light unit: a replica of the session's
//! musical state, the delta sync protocol that keeps replicas together over a
//! broadcast room, and the local frame engine that turns that state into
//! colors on a strip.
pub mod client;
pub mod common;
pub mod lights;
pub mod modules;
pub mod state;
pub mod sync;
