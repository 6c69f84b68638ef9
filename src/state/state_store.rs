//! Thread safe home for the unit's [`SessionState`].
//!
//! The state sits behind a `RwLock<Arc<SessionState>>`.  Writers clone on
//! write and swap the whole thing, so a reader holding an `Arc` always sees a
//! complete state: never half a delta, never half a grid.  The frame
//! scheduler reads with [`StateStore::try_snapshot`] which never waits.
//!
//! Renderers that want to hear about changes call [`StateStore::subscribe`]
//! and get an mpsc receiver of [`StateChange`]s.
use log::trace;
use std::sync::{mpsc, Arc, Mutex, PoisonError, RwLock, TryLockError};

use super::{
    drum_pattern::{PatternSnapshot, StepDelta, MAX_VELOCITY},
    note_trigger::NoteTrigger,
    session_state::{SessionState, Tonality},
    ApplyOutcome,
};
use crate::common::{get_stamp, sync_error::SyncError};
use crate::lights::color_resolver::ColorPolicy;

/// Notification sent to subscribers after a mutation is committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Step {
        track: usize,
        step: usize,
        active: bool,
        velocity: u8,
    },
    Pattern {
        revision: u64,
    },
    ColorPolicy(ColorPolicy),
    Tonality(Tonality),
    NoteTrigger {
        module_id: String,
        note: u8,
        velocity: u8,
    },
}

struct StoreInner {
    origin_id: String,
    state: RwLock<Arc<SessionState>>,
    listeners: Mutex<Vec<mpsc::Sender<StateChange>>>,
}

/// Cheap to clone, every clone points at the same replica
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

impl StateStore {
    /// Fresh replica for a unit joining a session.  `trigger_decay` is in usec.
    pub fn new(origin_id: &str, tracks: usize, steps: usize, trigger_decay: u64) -> StateStore {
        StateStore {
            inner: Arc::new(StoreInner {
                origin_id: origin_id.to_string(),
                state: RwLock::new(Arc::new(SessionState::new(tracks, steps, trigger_decay))),
                listeners: Mutex::new(vec![]),
            }),
        }
    }

    pub fn origin_id(&self) -> &str {
        &self.inner.origin_id
    }

    /// Current state.  Blocks only for the instant a writer holds the lock.
    pub fn snapshot(&self) -> Arc<SessionState> {
        let guard = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Current state, or None if a writer is mid swap.  Never blocks.
    pub fn try_snapshot(&self) -> Option<Arc<SessionState>> {
        match self.inner.state.try_read() {
            Ok(guard) => Some(Arc::clone(&guard)),
            Err(TryLockError::Poisoned(p)) => Some(Arc::clone(&p.into_inner())),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Hear about every committed mutation
    pub fn subscribe(&self) -> mpsc::Receiver<StateChange> {
        let (tx, rx) = mpsc::channel();
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut guard = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
        f(Arc::make_mut(&mut guard))
    }

    /// Like `mutate`, but `wanted` looks at the shared state first.  While a
    /// reader holds an `Arc`, a change that would not land never pays for a clone.
    fn mutate_if(
        &self,
        wanted: impl FnOnce(&SessionState) -> bool,
        f: impl FnOnce(&mut SessionState) -> ApplyOutcome,
    ) -> ApplyOutcome {
        let mut guard = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
        if !wanted(&guard) {
            return ApplyOutcome::Stale;
        }
        f(Arc::make_mut(&mut guard))
    }

    fn notify(&self, change: StateChange) {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // a receiver that went away just gets forgotten
        listeners.retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Toggle a cell from this unit.  Returns the delta to send to the room.
    pub fn apply_local_step_toggle(
        &self,
        track: usize,
        step: usize,
        active: bool,
        velocity: Option<u8>,
    ) -> Result<StepDelta, SyncError> {
        self.apply_local_step_toggle_at(track, step, active, velocity, get_stamp())
    }

    pub fn apply_local_step_toggle_at(
        &self,
        track: usize,
        step: usize,
        active: bool,
        velocity: Option<u8>,
        now: u64,
    ) -> Result<StepDelta, SyncError> {
        let delta = self.mutate(|state| {
            if !state.pattern.contains(track, step) {
                return Err(SyncError::OutOfRange { track, step });
            }
            let mut delta = StepDelta {
                track_index: track,
                step_index: step,
                active,
                velocity: velocity.map(|v| v.min(MAX_VELOCITY)),
                timestamp: state.pattern.stamp_for(track, step, now),
                origin_id: self.inner.origin_id.clone(),
            };
            // the wire carries the velocity the cell actually got
            delta.velocity = if active { Some(delta.effective_velocity()) } else { None };
            state.pattern.apply_delta(&delta);
            Ok(delta)
        })?;
        self.notify(StateChange::Step {
            track,
            step,
            active,
            velocity: delta.effective_velocity(),
        });
        Ok(delta)
    }

    /// Cell change from another unit.  Stale deltas are dropped quietly.
    pub fn apply_remote_delta(&self, delta: &StepDelta) -> ApplyOutcome {
        let outcome = self.mutate_if(
            |state| state.pattern.is_newer(delta),
            |state| state.pattern.apply_delta(delta),
        );
        match outcome {
            ApplyOutcome::Applied => self.notify(StateChange::Step {
                track: delta.track_index,
                step: delta.step_index,
                active: delta.active,
                velocity: delta.effective_velocity(),
            }),
            ApplyOutcome::Stale => trace!(
                "stale delta ({}, {}) @ {} from {}",
                delta.track_index,
                delta.step_index,
                delta.timestamp,
                delta.origin_id
            ),
        }
        outcome
    }

    pub fn apply_pattern_snapshot(&self, snapshot: &PatternSnapshot) -> ApplyOutcome {
        let outcome = self.mutate_if(
            |state| snapshot.revision > state.pattern.revision(),
            |state| state.pattern.apply_snapshot(snapshot),
        );
        if outcome.applied() {
            self.notify(StateChange::Pattern {
                revision: snapshot.revision,
            });
        }
        outcome
    }

    /// Full grid message for answering a snapshot request
    pub fn pattern_snapshot(&self, now: u64) -> PatternSnapshot {
        self.snapshot().pattern.to_snapshot(&self.inner.origin_id, now)
    }

    pub fn set_color_policy(&self, policy: ColorPolicy, timestamp: u64, origin_id: &str) -> ApplyOutcome {
        let outcome = self.mutate_if(
            |state| state.color_policy.is_newer(timestamp, origin_id),
            |state| state.color_policy.offer(policy, timestamp, origin_id),
        );
        if outcome.applied() {
            self.notify(StateChange::ColorPolicy(policy));
        }
        outcome
    }

    pub fn set_tonality(&self, tonality: Tonality, timestamp: u64, origin_id: &str) -> ApplyOutcome {
        let tonality = Tonality {
            key: tonality.key % 12,
            scale: tonality.scale,
        };
        let outcome = self.mutate_if(
            |state| state.tonality.is_newer(timestamp, origin_id),
            |state| state.tonality.offer(tonality, timestamp, origin_id),
        );
        if outcome.applied() {
            self.notify(StateChange::Tonality(tonality));
        }
        outcome
    }

    /// Light up a note.  Decay is measured from when this unit saw it.
    pub fn record_note_trigger(&self, trigger: &NoteTrigger) {
        self.record_note_trigger_at(trigger, get_stamp())
    }

    pub fn record_note_trigger_at(&self, trigger: &NoteTrigger, now: u64) {
        self.mutate(|state| state.triggers.record(trigger, now));
        self.notify(StateChange::NoteTrigger {
            module_id: trigger.module_id.clone(),
            note: trigger.note,
            velocity: trigger.velocity,
        });
    }

    /// Forget triggers that have faded out
    pub fn prune_triggers(&self, now: u64) {
        if self.snapshot().triggers.is_empty() {
            return;
        }
        self.mutate(|state| state.triggers.prune(now));
    }
}

#[cfg(test)]
mod test_state_store {
    use super::*;
    use crate::lights::color_resolver::Scale;
    use std::thread;

    fn remote(track: usize, step: usize, active: bool, timestamp: u64) -> StepDelta {
        StepDelta {
            track_index: track,
            step_index: step,
            active,
            velocity: None,
            timestamp,
            origin_id: "device_a".to_string(),
        }
    }

    #[test]
    fn local_toggle_makes_a_delta() {
        let store = StateStore::new("me", 4, 16, 1_000);
        let delta = store.apply_local_step_toggle_at(1, 3, true, Some(90), 500).unwrap();
        assert_eq!(delta.origin_id, "me");
        assert_eq!(delta.timestamp, 500);
        assert_eq!(delta.velocity, Some(90));
        let snap = store.snapshot();
        assert_eq!(snap.pattern.revision(), 1);
        assert!(snap.pattern.cell(1, 3).unwrap().active);

        let off = store.apply_local_step_toggle_at(1, 3, false, Some(90), 400).unwrap();
        assert_eq!(off.timestamp, 501);
        assert_eq!(off.velocity, None);
        assert_eq!(store.snapshot().pattern.revision(), 2);
    }

    #[test]
    fn local_toggle_out_of_range() {
        let store = StateStore::new("me", 4, 16, 1_000);
        assert_eq!(
            store.apply_local_step_toggle(4, 0, true, None),
            Err(SyncError::OutOfRange { track: 4, step: 0 })
        );
    }

    #[test]
    fn out_of_order_delta_is_stale() {
        let store = StateStore::new("device_b", 4, 16, 1_000);
        assert!(store.apply_remote_delta(&remote(2, 5, true, 100)).applied());
        assert_eq!(store.apply_remote_delta(&remote(2, 5, false, 90)), ApplyOutcome::Stale);
        assert!(store.snapshot().pattern.cell(2, 5).unwrap().active);
    }

    #[test]
    fn stale_delta_leaves_shared_state_alone() {
        let store = StateStore::new("me", 4, 16, 1_000);
        store.apply_remote_delta(&remote(2, 5, true, 100));
        let held = store.snapshot();
        assert_eq!(store.apply_remote_delta(&remote(2, 5, false, 90)), ApplyOutcome::Stale);
        assert_eq!(store.set_color_policy(ColorPolicy::Harmonic, 0, ""), ApplyOutcome::Stale);
        // nothing was cloned, the reader and the store still share one state
        assert!(Arc::ptr_eq(&held, &store.snapshot()));
    }

    #[test]
    fn local_toggle_after_max_timestamp() {
        let store = StateStore::new("unit", 4, 16, 1_000);
        let mut last = remote(0, 0, true, u64::MAX);
        last.origin_id = "peer".to_string();
        assert!(store.apply_remote_delta(&last).applied());
        let delta = store.apply_local_step_toggle_at(0, 0, false, None, 10).unwrap();
        assert_eq!(delta.timestamp, u64::MAX);
        assert!(!store.snapshot().pattern.cell(0, 0).unwrap().active);
    }

    #[test]
    fn readers_keep_their_view() {
        let store = StateStore::new("me", 2, 2, 1_000);
        let before = store.snapshot();
        store.apply_remote_delta(&remote(0, 0, true, 10));
        assert!(!before.pattern.cell(0, 0).unwrap().active);
        assert!(store.try_snapshot().unwrap().pattern.cell(0, 0).unwrap().active);
    }

    #[test]
    fn subscribers_hear_committed_changes_only() {
        let store = StateStore::new("me", 4, 16, 1_000);
        let rx = store.subscribe();
        store.apply_remote_delta(&remote(2, 5, true, 100));
        store.apply_remote_delta(&remote(2, 5, false, 90));
        store.set_color_policy(ColorPolicy::Spectrum, 5, "x");
        store.set_color_policy(ColorPolicy::Chromatic, 4, "x");
        let changes: Vec<StateChange> = rx.try_iter().collect();
        assert_eq!(
            changes,
            vec![
                StateChange::Step {
                    track: 2,
                    step: 5,
                    active: true,
                    velocity: 100
                },
                StateChange::ColorPolicy(ColorPolicy::Spectrum),
            ]
        );
    }

    #[test]
    fn dropped_subscribers_are_forgotten() {
        let store = StateStore::new("me", 1, 1, 1_000);
        drop(store.subscribe());
        let rx = store.subscribe();
        store.set_tonality(Tonality { key: 14, scale: Scale::Dorian }, 1, "x");
        assert_eq!(
            rx.try_recv().unwrap(),
            StateChange::Tonality(Tonality { key: 2, scale: Scale::Dorian })
        );
        assert_eq!(store.inner.listeners.lock().unwrap().len(), 1);
    }

    #[test]
    fn snapshot_round_trip_between_stores() {
        let a = StateStore::new("a", 2, 8, 1_000);
        a.apply_local_step_toggle_at(0, 1, true, None, 10).unwrap();
        a.apply_local_step_toggle_at(1, 7, true, Some(20), 11).unwrap();
        let snap = a.pattern_snapshot(12);
        let b = StateStore::new("b", 2, 8, 1_000);
        assert!(b.apply_pattern_snapshot(&snap).applied());
        assert_eq!(b.apply_pattern_snapshot(&snap), ApplyOutcome::Stale);
        assert_eq!(b.snapshot().pattern, a.snapshot().pattern);
    }

    #[test]
    fn triggers_decay_away() {
        let store = StateStore::new("me", 1, 1, 100);
        let trigger = NoteTrigger {
            module_id: "keys".to_string(),
            note: 60,
            velocity: 127,
            timestamp: 0,
            origin_id: "me".to_string(),
        };
        store.record_note_trigger_at(&trigger, 1_000);
        assert_eq!(store.snapshot().triggers.active_for("keys", 1_050).count(), 1);
        store.prune_triggers(1_100);
        assert!(store.snapshot().triggers.is_empty());
    }

    #[test]
    fn concurrent_readers_never_see_torn_grids() {
        let store = StateStore::new("me", 8, 16, 1_000);
        let writer = store.clone();
        let handle = thread::spawn(move || {
            for n in 1..200u64 {
                let mut snap = writer.pattern_snapshot(n);
                snap.revision = n * 10;
                let active = n % 2 == 0;
                for row in snap.grid.iter_mut() {
                    for cell in row.iter_mut() {
                        cell.active = active;
                    }
                }
                writer.apply_pattern_snapshot(&snap);
            }
        });
        for _ in 0..500 {
            if let Some(view) = store.try_snapshot() {
                let first = view.pattern.cell(0, 0).unwrap().active;
                assert!(view.pattern.grid().iter().flatten().all(|c| c.active == first));
            }
        }
        handle.join().unwrap();
    }
}
