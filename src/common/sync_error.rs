//! Things that go wrong between a device's replica and the rest of the room.
//!
//! None of these are fatal.  A malformed packet is dropped, a dead channel
//! just means nobody hears us for a while, and a snapshot that never comes
//! leaves us running on whatever state we had.
use std::{error::Error, fmt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// inbound text that does not decode to a valid message
    MalformedMessage(String),
    /// the transport is not connected, the outbound message was dropped
    ChannelDisconnected,
    /// nobody answered our snapshot request in time
    SnapshotTimeout,
    /// a local edit pointed outside the pattern grid
    OutOfRange { track: usize, step: usize },
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyncError::MalformedMessage(why) => write!(f, "malformed message: {}", why),
            SyncError::ChannelDisconnected => write!(f, "sync channel is disconnected"),
            SyncError::SnapshotTimeout => write!(f, "no snapshot received before the timeout"),
            SyncError::OutOfRange { track, step } => {
                write!(f, "cell ({}, {}) is outside the pattern", track, step)
            }
        }
    }
}

impl Error for SyncError {}
