//! The shared step sequencer.
//!
//! Players press grid buttons, the adapter turns a press into a toggle of
//! whatever the cell currently holds.  On the strip the pattern is laid out
//! one segment per step: active steps glow faintly in the color of their
//! loudest track and the playhead column lights up at full brightness.
//!
//! The playhead is derived from the wall clock, not from when this unit
//! started, so units with synced clocks sweep in step with each other.
use log::debug;

use super::module_adapter::{LocalEdit, ModuleAdapter};
use crate::lights::{
    color_resolver::Rgb,
    compositor::{LightLayer, LightSource},
};
use crate::state::{drum_pattern::MAX_VELOCITY, session_state::SessionState, state_store::StateChange};

pub const DRUM_GRID_ID: &str = "drum_grid";
/// general midi kick, snare, closed hat, open hat, low tom, mid tom, high tom, crash
pub const GM_DRUM_NOTES: [u8; 8] = [36, 38, 42, 46, 45, 47, 50, 49];

const PATTERN_GLOW: f32 = 0.25;
const PLAYHEAD_MARKER: f32 = 0.1;

pub struct DrumGridAdapter {
    cells: Vec<Vec<bool>>,
    velocity: u8,
    bpm: f64,
    pending: Vec<LocalEdit>,
}

impl DrumGridAdapter {
    pub fn new(tracks: usize, steps: usize, bpm: f64) -> DrumGridAdapter {
        DrumGridAdapter {
            cells: vec![vec![false; steps]; tracks],
            velocity: MAX_VELOCITY,
            bpm,
            pending: vec![],
        }
    }

    /// Velocity used for steps this player switches on
    pub fn set_velocity(&mut self, velocity: u8) {
        self.velocity = velocity.min(MAX_VELOCITY);
    }

    /// A grid button went down
    pub fn press(&mut self, track: usize, step: usize) {
        let active = match self.cells.get(track).and_then(|row| row.get(step)) {
            Some(on) => !*on,
            // let the store reject it, it knows the real shape
            None => true,
        };
        self.pending.push(LocalEdit::StepToggle {
            track,
            step,
            active,
            velocity: if active { Some(self.velocity) } else { None },
        });
    }

    pub fn is_active(&self, track: usize, step: usize) -> bool {
        self.cells
            .get(track)
            .and_then(|row| row.get(step))
            .copied()
            .unwrap_or(false)
    }

    fn mirror(&mut self, state: &SessionState) {
        self.cells = state
            .pattern
            .grid()
            .iter()
            .map(|row| row.iter().map(|cell| cell.active).collect())
            .collect();
    }
}

impl ModuleAdapter for DrumGridAdapter {
    fn module_id(&self) -> &str {
        DRUM_GRID_ID
    }

    fn poll_edits(&mut self) -> Vec<LocalEdit> {
        std::mem::take(&mut self.pending)
    }

    fn render(&mut self, change: &StateChange, state: &SessionState) {
        match change {
            StateChange::Step { track, step, active, .. } => {
                if let Some(cell) = self.cells.get_mut(*track).and_then(|row| row.get_mut(*step)) {
                    *cell = *active;
                }
            }
            StateChange::Pattern { revision } => {
                debug!("drum grid picked up pattern revision {}", revision);
                self.mirror(state);
            }
            _ => {}
        }
    }

    fn light_layer(&self) -> Option<Box<dyn LightLayer>> {
        Some(Box::new(DrumGridLayer { bpm: self.bpm }))
    }
}

pub struct DrumGridLayer {
    bpm: f64,
}

impl DrumGridLayer {
    pub fn new(bpm: f64) -> DrumGridLayer {
        DrumGridLayer { bpm }
    }

    /// which step the playhead is on at `now`, sixteenth notes
    pub fn playhead(&self, now: u64, steps: usize) -> usize {
        if steps == 0 || self.bpm <= 0.0 {
            return 0;
        }
        let sixteenth = (15_000_000.0 / self.bpm).max(1.0) as u64;
        ((now / sixteenth) % steps as u64) as usize
    }
}

/// drum notes by track, tracks past the table reuse it
pub fn track_note(track: usize) -> u8 {
    GM_DRUM_NOTES[track % GM_DRUM_NOTES.len()]
}

impl LightLayer for DrumGridLayer {
    fn light_sources(&self, state: &SessionState, strip_len: usize, now: u64) -> Vec<LightSource> {
        let steps = state.pattern.steps();
        if steps == 0 || strip_len == 0 {
            return vec![];
        }
        let playhead = self.playhead(now, steps);
        let mut sources = vec![];
        for step in 0..steps {
            let loudest = state.pattern.active_at(step).max_by_key(|(_, vel)| *vel);
            let (color, intensity) = match (loudest, step == playhead) {
                (Some((track, _)), true) => (state.note_color(track_note(track)), 1.0),
                (Some((track, vel)), false) => (
                    state.note_color(track_note(track)),
                    PATTERN_GLOW * vel as f32 / MAX_VELOCITY as f32,
                ),
                (None, true) => (Rgb::new(255, 255, 255), PLAYHEAD_MARKER),
                (None, false) => continue,
            };
            // step n owns pixels [n * len / steps, (n + 1) * len / steps)
            let first = step * strip_len / steps;
            let last = ((step + 1) * strip_len / steps).max(first + 1).min(strip_len);
            for pixel in first..last {
                sources.push(LightSource {
                    pixel,
                    color,
                    intensity,
                });
            }
        }
        sources
    }
}
