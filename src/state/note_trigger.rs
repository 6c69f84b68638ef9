//! Momentary note events, kept just long enough to light something up.
//!
//! Triggers are never reconciled.  A duplicate re-lights the same note and a
//! lost one is a missed flash, both of which nobody will notice.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::drum_pattern::MAX_VELOCITY;

/// most triggers a single module can have lit at once
pub const MAX_ACTIVE_PER_MODULE: usize = 64;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NoteTrigger {
    pub module_id: String,
    pub note: u8,
    pub velocity: u8,
    pub timestamp: u64,
    pub origin_id: String,
}

/// A trigger as the light engine sees it.  `started` is when *this* unit
/// heard about it, so clock skew between units does not shorten the flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTrigger {
    pub note: u8,
    pub velocity: u8,
    pub started: u64,
    pub origin_id: String,
}

impl ActiveTrigger {
    /// Brightness of the trigger at `now`: velocity scaled, fading linearly to
    /// zero over `decay` microseconds.  Zero once expired.
    pub fn intensity(&self, now: u64, decay: u64) -> f32 {
        let age = now.saturating_sub(self.started);
        if decay == 0 || age >= decay {
            return 0.0;
        }
        let vel = self.velocity.min(MAX_VELOCITY) as f32 / MAX_VELOCITY as f32;
        vel * (1.0 - age as f32 / decay as f32)
    }
}

/// Per module set of triggers still fading out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSet {
    decay: u64,
    modules: BTreeMap<String, Vec<ActiveTrigger>>,
}

impl TriggerSet {
    pub fn new(decay: u64) -> TriggerSet {
        TriggerSet {
            decay,
            modules: BTreeMap::new(),
        }
    }
    pub fn get_decay(&self) -> u64 {
        self.decay
    }

    /// Light a trigger.  Re-triggering a note from the same origin restarts it.
    pub fn record(&mut self, trigger: &NoteTrigger, now: u64) {
        let decay = self.decay;
        let active = self.modules.entry(trigger.module_id.clone()).or_default();
        active.retain(|t| {
            now.saturating_sub(t.started) < decay
                && !(t.note == trigger.note && t.origin_id == trigger.origin_id)
        });
        if active.len() >= MAX_ACTIVE_PER_MODULE {
            active.remove(0);
        }
        active.push(ActiveTrigger {
            note: trigger.note,
            velocity: trigger.velocity,
            started: now,
            origin_id: trigger.origin_id.clone(),
        });
    }

    /// Drop everything that has fully faded
    pub fn prune(&mut self, now: u64) {
        let decay = self.decay;
        for active in self.modules.values_mut() {
            active.retain(|t| now.saturating_sub(t.started) < decay);
        }
        self.modules.retain(|_, active| !active.is_empty());
    }

    /// Triggers for a module that are still visible at `now`, with their intensity
    pub fn active_for<'a>(
        &'a self,
        module_id: &str,
        now: u64,
    ) -> impl Iterator<Item = (&'a ActiveTrigger, f32)> + 'a {
        let decay = self.decay;
        self.modules
            .get(module_id)
            .into_iter()
            .flatten()
            .map(move |t| (t, t.intensity(now, decay)))
            .filter(|(_, i)| *i > 0.0)
    }

    pub fn module_ids(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test_note_trigger {
    use super::*;

    fn trig(module: &str, note: u8, velocity: u8, origin: &str) -> NoteTrigger {
        NoteTrigger {
            module_id: module.to_string(),
            note,
            velocity,
            timestamp: 0,
            origin_id: origin.to_string(),
        }
    }

    #[test]
    fn fades_out_over_decay() {
        let t = ActiveTrigger {
            note: 60,
            velocity: 127,
            started: 1_000,
            origin_id: "a".to_string(),
        };
        assert_eq!(t.intensity(1_000, 400), 1.0);
        assert_eq!(t.intensity(1_200, 400), 0.5);
        assert_eq!(t.intensity(1_400, 400), 0.0);
        assert_eq!(t.intensity(500, 400), 1.0);
    }

    #[test]
    fn retrigger_replaces() {
        let mut set = TriggerSet::new(1_000);
        set.record(&trig("keys", 60, 100, "a"), 0);
        set.record(&trig("keys", 60, 50, "a"), 10);
        set.record(&trig("keys", 60, 50, "b"), 10);
        assert_eq!(set.len(), 2);
        let lit: Vec<u8> = set.active_for("keys", 10).map(|(t, _)| t.velocity).collect();
        assert_eq!(lit, vec![50, 50]);
    }

    #[test]
    fn modules_are_separate() {
        let mut set = TriggerSet::new(1_000);
        set.record(&trig("keys", 60, 100, "a"), 0);
        set.record(&trig("pads", 40, 100, "a"), 0);
        assert_eq!(set.active_for("keys", 0).count(), 1);
        assert_eq!(set.active_for("bass", 0).count(), 0);
        assert_eq!(set.module_ids().collect::<Vec<_>>(), vec!["keys", "pads"]);
    }

    #[test]
    fn expired_triggers_go_away() {
        let mut set = TriggerSet::new(100);
        set.record(&trig("keys", 60, 100, "a"), 0);
        assert_eq!(set.active_for("keys", 100).count(), 0);
        set.prune(100);
        assert!(set.is_empty());
    }

    #[test]
    fn capped_per_module() {
        let mut set = TriggerSet::new(u64::MAX);
        for n in 0..(MAX_ACTIVE_PER_MODULE as u8 + 5) {
            set.record(&trig("keys", n, 100, "a"), 0);
        }
        assert_eq!(set.len(), MAX_ACTIVE_PER_MODULE);
        assert!(set.active_for("keys", 0).all(|(t, _)| t.note >= 5));
    }
}
