//! Lights for anything that plays notes: keyboards, pads, the demo.
//!
//! Notes are spread across the strip like a piano keyboard, A0 at pixel zero
//! and C8 at the far end, each flashing in its session color and fading out
//! over the trigger decay.
use super::module_adapter::{LocalEdit, ModuleAdapter};
use crate::lights::compositor::{LightLayer, LightSource};
use crate::state::{drum_pattern::MAX_VELOCITY, session_state::SessionState};

pub const LOWEST_NOTE: u8 = 21;
pub const HIGHEST_NOTE: u8 = 108;

pub struct NoteLightsAdapter {
    module_id: String,
    pending: Vec<LocalEdit>,
}

impl NoteLightsAdapter {
    pub fn new(module_id: &str) -> NoteLightsAdapter {
        NoteLightsAdapter {
            module_id: module_id.to_string(),
            pending: vec![],
        }
    }

    pub fn note_on(&mut self, note: u8, velocity: u8) {
        self.pending.push(LocalEdit::NoteTrigger {
            module_id: self.module_id.clone(),
            note: note.min(127),
            velocity: velocity.min(MAX_VELOCITY),
        });
    }
}

impl ModuleAdapter for NoteLightsAdapter {
    fn module_id(&self) -> &str {
        &self.module_id
    }

    fn poll_edits(&mut self) -> Vec<LocalEdit> {
        std::mem::take(&mut self.pending)
    }

    fn light_layer(&self) -> Option<Box<dyn LightLayer>> {
        Some(Box::new(NoteLightsLayer::new(&self.module_id)))
    }

    fn claims_note_triggers(&self) -> bool {
        true
    }
}

pub struct NoteLightsLayer {
    module_id: String,
}

impl NoteLightsLayer {
    pub fn new(module_id: &str) -> NoteLightsLayer {
        NoteLightsLayer {
            module_id: module_id.to_string(),
        }
    }
}

/// pixel for a note on a strip of `strip_len`, notes outside the piano clamp to the ends
pub fn note_pixel(note: u8, strip_len: usize) -> usize {
    if strip_len < 2 {
        return 0;
    }
    let n = (note.clamp(LOWEST_NOTE, HIGHEST_NOTE) - LOWEST_NOTE) as usize;
    n * (strip_len - 1) / (HIGHEST_NOTE - LOWEST_NOTE) as usize
}

fn module_sources(state: &SessionState, module_id: &str, strip_len: usize, now: u64) -> Vec<LightSource> {
    state
        .triggers
        .active_for(module_id, now)
        .map(|(trigger, intensity)| LightSource {
            pixel: note_pixel(trigger.note, strip_len),
            color: state.note_color(trigger.note),
            intensity,
        })
        .collect()
}

impl LightLayer for NoteLightsLayer {
    fn light_sources(&self, state: &SessionState, strip_len: usize, now: u64) -> Vec<LightSource> {
        if strip_len == 0 {
            return vec![];
        }
        module_sources(state, &self.module_id, strip_len, now)
    }
}

/// Note triggers from every module this unit has no layer for, so a keyboard
/// plugged into another unit still flashes here.
pub struct RemoteNotesLayer {
    claimed: Vec<String>,
}

impl RemoteNotesLayer {
    /// `claimed` are the modules whose triggers a local layer already draws
    pub fn new(claimed: Vec<String>) -> RemoteNotesLayer {
        RemoteNotesLayer { claimed }
    }
}

impl LightLayer for RemoteNotesLayer {
    fn light_sources(&self, state: &SessionState, strip_len: usize, now: u64) -> Vec<LightSource> {
        if strip_len == 0 {
            return vec![];
        }
        state
            .triggers
            .module_ids()
            .filter(|id| !self.claimed.iter().any(|c| c == id))
            .flat_map(|id| module_sources(state, id, strip_len, now))
            .collect()
    }
}

#[cfg(test)]
mod test_note_lights {
    use super::*;
    use crate::state::note_trigger::NoteTrigger;

    fn trigger(module_id: &str, note: u8) -> NoteTrigger {
        NoteTrigger {
            module_id: module_id.to_string(),
            note,
            velocity: 127,
            timestamp: 0,
            origin_id: "x".to_string(),
        }
    }

    #[test]
    fn keyboard_layout() {
        assert_eq!(note_pixel(21, 88), 0);
        assert_eq!(note_pixel(108, 88), 87);
        assert_eq!(note_pixel(0, 88), 0);
        assert_eq!(note_pixel(127, 88), 87);
        assert_eq!(note_pixel(60, 88), 39);
        assert_eq!(note_pixel(60, 1), 0);
    }

    #[test]
    fn note_on_queues_a_trigger() {
        let mut keys = NoteLightsAdapter::new("keys");
        keys.note_on(60, 200);
        assert_eq!(
            keys.poll_edits(),
            vec![LocalEdit::NoteTrigger {
                module_id: "keys".to_string(),
                note: 60,
                velocity: 127
            }]
        );
        assert!(keys.poll_edits().is_empty());
    }

    #[test]
    fn only_this_modules_triggers_light() {
        let mut state = SessionState::new(1, 1, 1_000);
        state.triggers.record(&trigger("keys", 60), 0);
        state.triggers.record(&trigger("pads", 64), 0);
        let layer = NoteLightsLayer::new("keys");
        let sources = layer.light_sources(&state, 88, 500);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].pixel, 39);
        assert_eq!(sources[0].color, state.note_color(60));
        assert!((sources[0].intensity - 0.5).abs() < 1e-6);
        assert!(layer.light_sources(&state, 88, 1_000).is_empty());
    }

    #[test]
    fn remote_layer_takes_unclaimed_modules() {
        let mut state = SessionState::new(1, 1, 1_000);
        state.triggers.record(&trigger("keys", 108), 0);
        state.triggers.record(&trigger("pads", 21), 0);
        state.triggers.record(&trigger("demo", 60), 0);
        let layer = RemoteNotesLayer::new(vec!["demo".to_string()]);
        let mut pixels: Vec<usize> = layer.light_sources(&state, 60, 100).iter().map(|s| s.pixel).collect();
        pixels.sort_unstable();
        assert_eq!(pixels, vec![0, 59]);
        assert!(RemoteNotesLayer::new(vec![]).light_sources(&state, 0, 100).is_empty());
    }
}
