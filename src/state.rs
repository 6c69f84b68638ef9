//! The device's replica of the jam session's musical state.
//!
//! Every unit owns one of these.  Local edits and remote messages both funnel
//! through the [`state_store::StateStore`]; the light engine only ever reads
//! snapshots of it.
pub mod drum_pattern;
pub mod note_trigger;
pub mod session_state;
pub mod state_store;

/// What became of an update offered to the replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// the update won and is now part of the state
    Applied,
    /// something newer was already there, the update was dropped
    Stale,
}

impl ApplyOutcome {
    pub fn applied(&self) -> bool {
        *self == ApplyOutcome::Applied
    }
}
