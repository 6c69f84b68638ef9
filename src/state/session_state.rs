//! Everything a unit knows about the session, in one cloneable value.
use serde::{Deserialize, Serialize};

use super::{drum_pattern::DrumPattern, note_trigger::TriggerSet, ApplyOutcome};
use crate::lights::color_resolver::{resolve, ColorPolicy, Rgb, Scale};

/// A session wide setting with the stamp of whoever last set it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamped<T> {
    pub value: T,
    pub timestamp: u64,
    pub origin_id: String,
}

impl<T: Clone> Stamped<T> {
    pub fn new(value: T) -> Stamped<T> {
        Stamped {
            value,
            timestamp: 0,
            origin_id: String::new(),
        }
    }

    /// true when a write stamped `(timestamp, origin_id)` would replace the value
    pub fn is_newer(&self, timestamp: u64, origin_id: &str) -> bool {
        (timestamp, origin_id) > (self.timestamp, self.origin_id.as_str())
    }

    /// last write wins, ties broken by origin
    pub fn offer(&mut self, value: T, timestamp: u64, origin_id: &str) -> ApplyOutcome {
        if !self.is_newer(timestamp, origin_id) {
            return ApplyOutcome::Stale;
        }
        self.value = value;
        self.timestamp = timestamp;
        self.origin_id = origin_id.to_string();
        ApplyOutcome::Applied
    }
}

/// Key and scale the harmonic color policy works in
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tonality {
    /// pitch class of the root, 0 = C
    pub key: u8,
    pub scale: Scale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub pattern: DrumPattern,
    pub color_policy: Stamped<ColorPolicy>,
    pub tonality: Stamped<Tonality>,
    pub triggers: TriggerSet,
}

impl SessionState {
    pub fn new(tracks: usize, steps: usize, trigger_decay: u64) -> SessionState {
        SessionState {
            pattern: DrumPattern::new(tracks, steps),
            color_policy: Stamped::new(ColorPolicy::default()),
            tonality: Stamped::new(Tonality::default()),
            triggers: TriggerSet::new(trigger_decay),
        }
    }

    /// Color for a note under the session's current policy and tonality
    pub fn note_color(&self, note: u8) -> Rgb {
        let tonality = self.tonality.value;
        resolve(note, self.color_policy.value, tonality.key, tonality.scale)
    }
}
