//! A pretend bandmate for a unit on its own.
//!
//! Every so often it flips a random step and plays a random note from the
//! session scale, all through the normal local edit path.
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::module_adapter::{LocalEdit, ModuleAdapter};
use crate::common::{get_micro_time, stream_time_stat::MicroTimer};
use crate::lights::compositor::LightLayer;
use crate::modules::note_lights::NoteLightsLayer;
use crate::state::{session_state::SessionState, state_store::StateChange};

pub const DEMO_ID: &str = "demo";
const STEP_EVERY: u128 = 750_000;
const NOTE_EVERY: u128 = 200_000;

pub struct DemoModule {
    tracks: usize,
    steps: usize,
    rng: StdRng,
    step_timer: MicroTimer,
    note_timer: MicroTimer,
    key: u8,
    intervals: &'static [u8],
}

impl DemoModule {
    pub fn new(tracks: usize, steps: usize) -> DemoModule {
        DemoModule::with_rng(tracks, steps, StdRng::from_entropy(), get_micro_time())
    }

    pub fn with_rng(tracks: usize, steps: usize, rng: StdRng, now: u128) -> DemoModule {
        let tonality = crate::state::session_state::Tonality::default();
        DemoModule {
            tracks,
            steps,
            rng,
            step_timer: MicroTimer::build(now, STEP_EVERY),
            note_timer: MicroTimer::build(now, NOTE_EVERY),
            key: tonality.key,
            intervals: tonality.scale.intervals(),
        }
    }

    pub fn poll_edits_at(&mut self, now: u128) -> Vec<LocalEdit> {
        let mut edits = vec![];
        if self.step_timer.expired(now) && self.tracks > 0 && self.steps > 0 {
            self.step_timer.reset(now);
            edits.push(LocalEdit::StepToggle {
                track: self.rng.gen_range(0..self.tracks),
                step: self.rng.gen_range(0..self.steps),
                active: self.rng.gen_bool(0.6),
                velocity: Some(self.rng.gen_range(40..=127)),
            });
        }
        if self.note_timer.expired(now) {
            self.note_timer.reset(now);
            let degree = self.intervals[self.rng.gen_range(0..self.intervals.len())];
            let octave = self.rng.gen_range(3..7u8);
            edits.push(LocalEdit::NoteTrigger {
                module_id: DEMO_ID.to_string(),
                note: 12 * (octave + 1) + (self.key + degree) % 12,
                velocity: self.rng.gen_range(60..=127),
            });
        }
        edits
    }
}

impl ModuleAdapter for DemoModule {
    fn module_id(&self) -> &str {
        DEMO_ID
    }

    fn poll_edits(&mut self) -> Vec<LocalEdit> {
        self.poll_edits_at(get_micro_time())
    }

    /// follow the session key so the demo stays in tune
    fn render(&mut self, change: &StateChange, _state: &SessionState) {
        if let StateChange::Tonality(tonality) = change {
            self.key = tonality.key;
            self.intervals = tonality.scale.intervals();
        }
    }

    fn light_layer(&self) -> Option<Box<dyn LightLayer>> {
        Some(Box::new(NoteLightsLayer::new(DEMO_ID)))
    }

    fn claims_note_triggers(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod test_demo_module {
    use super::*;
    use crate::lights::color_resolver::Scale;
    use crate::state::session_state::Tonality;

    fn demo() -> DemoModule {
        DemoModule::with_rng(4, 16, StdRng::seed_from_u64(7), 0)
    }

    #[test]
    fn quiet_until_timers_fire() {
        let mut demo = demo();
        assert!(demo.poll_edits_at(100_000).is_empty());
        let edits = demo.poll_edits_at(NOTE_EVERY);
        assert_eq!(edits.len(), 1);
        assert!(matches!(edits[0], LocalEdit::NoteTrigger { .. }));
        let edits = demo.poll_edits_at(STEP_EVERY);
        assert_eq!(edits.len(), 2);
    }

    #[test]
    fn edits_stay_in_range_and_in_key() {
        let mut demo = demo();
        let state = SessionState::new(4, 16, 1_000);
        demo.render(
            &StateChange::Tonality(Tonality {
                key: 2,
                scale: Scale::MajorPentatonic,
            }),
            &state,
        );
        let mut now = 0;
        for _ in 0..200 {
            now += STEP_EVERY;
            for edit in demo.poll_edits_at(now) {
                match edit {
                    LocalEdit::StepToggle { track, step, .. } => assert!(track < 4 && step < 16),
                    LocalEdit::NoteTrigger { note, .. } => {
                        let rel = (note + 12 - 2) % 12;
                        assert!(Scale::MajorPentatonic.intervals().contains(&rel), "note {}", note);
                        assert!(note <= 127);
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
        }
    }
}
