//! Turning state changes into wire text and back.
//!
//! The encoder side also debounces.  Someone dragging across a grid button or
//! mashing one step would otherwise put a message on the wire per edit, so
//! edits to the same cell that land inside the window collapse into one
//! message carrying the last value.  Different cells are never merged.
//!
//! The decoder is strict: anything that does not parse, or that points
//! outside our pattern, is a [`SyncError::MalformedMessage`].
use log::trace;
use simple_error::bail;
use std::collections::HashMap;

use super::wire_message::SyncMessage;
use crate::common::{box_error::BoxError, sync_error::SyncError};
use crate::state::drum_pattern::{StepDelta, MAX_VELOCITY};

/// default debounce window, 50 msec
pub const DEBOUNCE_WINDOW: u64 = 50_000;

struct PendingStep {
    delta: StepDelta,
    first_queued: u64,
}

pub struct DeltaEncoder {
    window: u64,
    pending: HashMap<(usize, usize), PendingStep>,
}

impl DeltaEncoder {
    /// `window` is in microseconds
    pub fn new(window: u64) -> DeltaEncoder {
        DeltaEncoder {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn encode(message: &SyncMessage) -> Result<String, BoxError> {
        Ok(serde_json::to_string(message)?)
    }

    /// Hold a step delta for the debounce window.  A later edit to the same
    /// cell replaces the held one but does not restart the window.
    pub fn queue_step(&mut self, delta: StepDelta, now: u64) {
        let key = (delta.track_index, delta.step_index);
        match self.pending.get_mut(&key) {
            Some(held) => {
                if delta.timestamp >= held.delta.timestamp {
                    trace!("coalescing edit to ({}, {})", key.0, key.1);
                    held.delta = delta;
                }
            }
            None => {
                self.pending.insert(
                    key,
                    PendingStep {
                        delta,
                        first_queued: now,
                    },
                );
            }
        }
    }

    /// Messages whose window has closed, in track/step order
    pub fn drain_ready(&mut self, now: u64) -> Vec<SyncMessage> {
        let window = self.window;
        let mut ready: Vec<(usize, usize)> = self
            .pending
            .iter()
            .filter(|(_, held)| now.saturating_sub(held.first_queued) >= window)
            .map(|(key, _)| *key)
            .collect();
        ready.sort_unstable();
        ready
            .into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .map(|held| SyncMessage::StepDelta(held.delta))
            .collect()
    }

    /// Everything still held, window or not
    pub fn flush(&mut self) -> Vec<SyncMessage> {
        let mut held: Vec<PendingStep> = self.pending.drain().map(|(_, held)| held).collect();
        held.sort_unstable_by_key(|h| (h.delta.track_index, h.delta.step_index));
        held.into_iter().map(|h| SyncMessage::StepDelta(h.delta)).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Held deltas, still waiting on their window
    pub fn pending_steps(&self) -> impl Iterator<Item = &StepDelta> + '_ {
        self.pending.values().map(|held| &held.delta)
    }
}

/// Validates inbound text against the shape of the local pattern
pub struct DeltaDecoder {
    tracks: usize,
    steps: usize,
}

impl DeltaDecoder {
    pub fn new(tracks: usize, steps: usize) -> DeltaDecoder {
        DeltaDecoder { tracks, steps }
    }

    pub fn decode(&self, text: &str) -> Result<SyncMessage, SyncError> {
        let message: SyncMessage =
            serde_json::from_str(text).map_err(|e| SyncError::MalformedMessage(e.to_string()))?;
        self.validate(&message)
            .map_err(|e| SyncError::MalformedMessage(e.to_string()))?;
        Ok(message)
    }

    fn validate(&self, message: &SyncMessage) -> Result<(), BoxError> {
        if message.origin_id().is_empty() {
            bail!("{} without an originId", message.kind());
        }
        match message {
            SyncMessage::StepDelta(d) => {
                if d.track_index >= self.tracks || d.step_index >= self.steps {
                    bail!("cell ({}, {}) outside {}x{} pattern", d.track_index, d.step_index, self.tracks, self.steps);
                }
                if let Some(v) = d.velocity {
                    if v > MAX_VELOCITY {
                        bail!("velocity {} out of range", v);
                    }
                }
            }
            SyncMessage::PatternSnapshot(s) => {
                if s.grid.len() != self.tracks || s.grid.iter().any(|row| row.len() != self.steps) {
                    bail!("snapshot grid is not {}x{}", self.tracks, self.steps);
                }
                if s.grid.iter().flatten().any(|cell| cell.velocity > MAX_VELOCITY) {
                    bail!("snapshot cell velocity out of range");
                }
            }
            SyncMessage::NoteTrigger(t) => {
                if t.note > 127 || t.velocity > MAX_VELOCITY {
                    bail!("note {} velocity {} out of range", t.note, t.velocity);
                }
                if t.module_id.is_empty() {
                    bail!("note_trigger without a moduleId");
                }
            }
            SyncMessage::Tonality(t) => {
                if t.key > 11 {
                    bail!("key {} is not a pitch class", t.key);
                }
            }
            SyncMessage::ColorPolicy(_) | SyncMessage::SnapshotRequest(_) => {}
        }
        Ok(())
    }
}
