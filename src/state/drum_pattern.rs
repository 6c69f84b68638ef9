//! The shared step sequencer grid.
//!
//! Cells are last-write-wins on `(timestamp, origin)`.  Since each cell only
//! cares about its own newest write, deltas can arrive in any order and every
//! replica lands on the same grid.  Whole-grid snapshots go by `revision`
//! instead, and only ever move it forward.
use log::warn;
use serde::{Deserialize, Serialize};

use super::ApplyOutcome;

pub const MAX_VELOCITY: u8 = 127;
/// velocity given to a cell switched on without one
pub const DEFAULT_VELOCITY: u8 = 100;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StepCell {
    pub active: bool,
    pub velocity: u8,
    pub last_modified: u64,
    /// who made the last write, breaks timestamp ties
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_origin: String,
}

/// One cell change, as it goes on the wire
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StepDelta {
    pub track_index: usize,
    pub step_index: usize,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<u8>,
    pub timestamp: u64,
    pub origin_id: String,
}

impl StepDelta {
    /// velocity the cell ends up with.  An active step without one gets the default.
    pub fn effective_velocity(&self) -> u8 {
        match (self.active, self.velocity) {
            (true, Some(v)) => v.min(MAX_VELOCITY),
            (true, None) => DEFAULT_VELOCITY,
            (false, _) => 0,
        }
    }
}

/// Full grid, used to bring a joining or reconnecting unit up to date
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PatternSnapshot {
    pub revision: u64,
    pub grid: Vec<Vec<StepCell>>,
    pub timestamp: u64,
    pub origin_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrumPattern {
    tracks: usize,
    steps: usize,
    revision: u64,
    grid: Vec<Vec<StepCell>>,
}

impl DrumPattern {
    pub fn new(tracks: usize, steps: usize) -> DrumPattern {
        DrumPattern {
            tracks,
            steps,
            revision: 0,
            grid: vec![vec![StepCell::default(); steps]; tracks],
        }
    }
    pub fn tracks(&self) -> usize {
        self.tracks
    }
    pub fn steps(&self) -> usize {
        self.steps
    }
    pub fn revision(&self) -> u64 {
        self.revision
    }
    pub fn contains(&self, track: usize, step: usize) -> bool {
        track < self.tracks && step < self.steps
    }
    pub fn cell(&self, track: usize, step: usize) -> Option<&StepCell> {
        self.grid.get(track).and_then(|row| row.get(step))
    }
    pub fn grid(&self) -> &[Vec<StepCell>] {
        &self.grid
    }
    /// true when `grid` has the same track/step shape as this pattern
    pub fn same_shape(&self, grid: &[Vec<StepCell>]) -> bool {
        grid.len() == self.tracks && grid.iter().all(|row| row.len() == self.steps)
    }

    /// Timestamp for a local write to a cell.  Never behind what the cell
    /// already holds, so a local edit always supersedes it.
    pub fn stamp_for(&self, track: usize, step: usize, now: u64) -> u64 {
        match self.cell(track, step) {
            Some(cell) => now.max(cell.last_modified.saturating_add(1)),
            None => now,
        }
    }

    /// true when `delta` is in range and newer than the cell it targets
    pub fn is_newer(&self, delta: &StepDelta) -> bool {
        match self.cell(delta.track_index, delta.step_index) {
            Some(cell) => {
                (delta.timestamp, delta.origin_id.as_str()) > (cell.last_modified, cell.last_origin.as_str())
            }
            None => false,
        }
    }

    /// Apply a cell change if it is newer than the cell.  Bumps the revision when it lands.
    pub fn apply_delta(&mut self, delta: &StepDelta) -> ApplyOutcome {
        if !self.is_newer(delta) {
            return ApplyOutcome::Stale;
        }
        let cell = match self
            .grid
            .get_mut(delta.track_index)
            .and_then(|row| row.get_mut(delta.step_index))
        {
            Some(cell) => cell,
            None => return ApplyOutcome::Stale,
        };
        cell.active = delta.active;
        cell.velocity = delta.effective_velocity();
        cell.last_modified = delta.timestamp;
        cell.last_origin.clone_from(&delta.origin_id);
        self.revision += 1;
        ApplyOutcome::Applied
    }

    /// Swap in a snapshot's grid, but only if its revision is ahead of ours
    pub fn apply_snapshot(&mut self, snapshot: &PatternSnapshot) -> ApplyOutcome {
        if snapshot.revision <= self.revision {
            return ApplyOutcome::Stale;
        }
        if !self.same_shape(&snapshot.grid) {
            warn!(
                "snapshot from {} has the wrong shape for a {}x{} pattern",
                snapshot.origin_id, self.tracks, self.steps
            );
            return ApplyOutcome::Stale;
        }
        self.grid.clone_from(&snapshot.grid);
        self.revision = snapshot.revision;
        ApplyOutcome::Applied
    }

    pub fn to_snapshot(&self, origin_id: &str, timestamp: u64) -> PatternSnapshot {
        PatternSnapshot {
            revision: self.revision,
            grid: self.grid.clone(),
            timestamp,
            origin_id: origin_id.to_string(),
        }
    }

    /// active cells of one step column as (track, velocity)
    pub fn active_at(&self, step: usize) -> impl Iterator<Item = (usize, u8)> + '_ {
        self.grid.iter().enumerate().filter_map(move |(track, row)| {
            row.get(step)
                .filter(|cell| cell.active)
                .map(|cell| (track, cell.velocity))
        })
    }
}
