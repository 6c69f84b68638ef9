//! One unit's membership in a jam session.
//!
//! The [`SyncSession`] owns the sync channel and sits between it and the
//! [`StateStore`].  The client loop calls [`SyncSession::poll`] every
//! millisecond or so; each poll
//!
//! - notices the channel coming (back) up and asks the room for a snapshot,
//! - applies whatever the room sent since last time,
//! - publishes step deltas whose debounce window has closed,
//! - gives up on an unanswered snapshot request after the timeout.
//!
//! Nothing in here blocks and nothing in here touches the lights.  If the
//! channel is down local edits still land in the store, they just do not go
//! anywhere.
use log::{debug, error, info, trace, warn};
use std::{fmt, sync::mpsc};

use super::{
    delta_codec::{DeltaDecoder, DeltaEncoder},
    sync_channel::{ConnectionState, SyncChannel},
    wire_message::{ColorPolicyMessage, SnapshotRequest, SyncMessage, TonalityMessage},
};
use crate::common::{get_stamp, stream_time_stat::MicroTimer, sync_error::SyncError};
use crate::lights::color_resolver::ColorPolicy;
use crate::modules::module_adapter::LocalEdit;
use crate::state::{
    drum_pattern::{PatternSnapshot, StepDelta},
    note_trigger::NoteTrigger,
    session_state::Tonality,
    state_store::StateStore,
    ApplyOutcome,
};

/// topic every unit in a session listens on
pub const SYNC_TOPIC: &str = "jam_lights";
/// how long to wait for someone to answer a snapshot request, 2 seconds
pub const SNAPSHOT_TIMEOUT: u64 = 2_000_000;
const TRIGGER_PRUNE_INTERVAL: u128 = 250_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// not connected yet
    Joining,
    /// snapshot requested, waiting for an answer
    Resyncing,
    /// caught up with the room
    Synced,
    /// nobody answered our last snapshot request, running on local state
    Degraded,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Running totals, dumped in the client's status log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub published: u64,
    pub dropped_offline: u64,
    pub received: u64,
    pub malformed: u64,
    pub stale: u64,
    pub snapshot_requests: u64,
    pub snapshot_timeouts: u64,
}

pub struct SyncSession {
    store: StateStore,
    channel: Box<dyn SyncChannel>,
    topic: String,
    inbound: mpsc::Receiver<String>,
    encoder: DeltaEncoder,
    decoder: DeltaDecoder,
    last_state: ConnectionState,
    status: SessionStatus,
    snapshot_timeout: u64,
    snapshot_deadline: Option<u64>,
    prune_timer: MicroTimer,
    counters: SessionCounters,
}

impl SyncSession {
    /// Join the session on `channel`.  `debounce_window` and `snapshot_timeout` are in usec.
    pub fn new(
        store: StateStore,
        mut channel: Box<dyn SyncChannel>,
        topic: &str,
        debounce_window: u64,
        snapshot_timeout: u64,
    ) -> SyncSession {
        let inbound = channel.subscribe(topic);
        let (tracks, steps) = {
            let snap = store.snapshot();
            (snap.pattern.tracks(), snap.pattern.steps())
        };
        SyncSession {
            store,
            channel,
            topic: topic.to_string(),
            inbound,
            encoder: DeltaEncoder::new(debounce_window),
            decoder: DeltaDecoder::new(tracks, steps),
            last_state: ConnectionState::Disconnected,
            status: SessionStatus::Joining,
            snapshot_timeout,
            snapshot_deadline: None,
            prune_timer: MicroTimer::build(0, TRIGGER_PRUNE_INTERVAL),
            counters: SessionCounters::default(),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }
    pub fn status(&self) -> SessionStatus {
        self.status
    }
    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }
    pub fn connection_state(&self) -> ConnectionState {
        self.channel.connection_state()
    }
    pub fn pending_deltas(&self) -> usize {
        self.encoder.pending_len()
    }

    pub fn poll(&mut self) {
        self.poll_at(get_stamp())
    }

    pub fn poll_at(&mut self, now: u64) {
        self.check_connection(now);
        self.read_inbound(now);
        self.flush_ready(now);
        self.check_snapshot_timeout(now);
        if self.prune_timer.expired(now as u128) {
            self.prune_timer.reset(now as u128);
            self.store.prune_triggers(now);
        }
    }

    /// Route an edit coming from a module adapter
    pub fn handle_edit(&mut self, edit: LocalEdit, now: u64) -> Result<(), SyncError> {
        match edit {
            LocalEdit::StepToggle {
                track,
                step,
                active,
                velocity,
            } => {
                self.local_step_toggle_at(track, step, active, velocity, now)?;
            }
            LocalEdit::NoteTrigger {
                module_id,
                note,
                velocity,
            } => self.local_note_trigger_at(&module_id, note, velocity, now),
            LocalEdit::ColorPolicy(policy) => self.local_color_policy_at(policy, now),
            LocalEdit::Tonality(tonality) => self.local_tonality_at(tonality, now),
        }
        Ok(())
    }

    pub fn local_step_toggle(
        &mut self,
        track: usize,
        step: usize,
        active: bool,
        velocity: Option<u8>,
    ) -> Result<StepDelta, SyncError> {
        self.local_step_toggle_at(track, step, active, velocity, get_stamp())
    }

    pub fn local_step_toggle_at(
        &mut self,
        track: usize,
        step: usize,
        active: bool,
        velocity: Option<u8>,
        now: u64,
    ) -> Result<StepDelta, SyncError> {
        let delta = self
            .store
            .apply_local_step_toggle_at(track, step, active, velocity, now)?;
        if self.channel.connection_state() == ConnectionState::Connected {
            self.encoder.queue_step(delta.clone(), now);
        } else {
            // never replayed later, the snapshot exchange on reconnect covers it
            self.counters.dropped_offline += 1;
        }
        Ok(delta)
    }

    /// Note triggers skip the debouncer, a late flash is worse than a double one
    pub fn local_note_trigger_at(&mut self, module_id: &str, note: u8, velocity: u8, now: u64) {
        let trigger = NoteTrigger {
            module_id: module_id.to_string(),
            note: note.min(127),
            velocity: velocity.min(127),
            timestamp: now,
            origin_id: self.store.origin_id().to_string(),
        };
        self.store.record_note_trigger_at(&trigger, now);
        self.publish(&SyncMessage::NoteTrigger(trigger));
    }

    pub fn local_color_policy_at(&mut self, policy: ColorPolicy, now: u64) {
        let stamp = now.max(self.store.snapshot().color_policy.timestamp.saturating_add(1));
        let origin_id = self.store.origin_id().to_string();
        self.store.set_color_policy(policy, stamp, &origin_id);
        self.publish(&SyncMessage::ColorPolicy(ColorPolicyMessage {
            policy,
            timestamp: stamp,
            origin_id,
        }));
    }

    pub fn local_tonality_at(&mut self, tonality: Tonality, now: u64) {
        let stamp = now.max(self.store.snapshot().tonality.timestamp.saturating_add(1));
        let origin_id = self.store.origin_id().to_string();
        self.store.set_tonality(tonality, stamp, &origin_id);
        self.publish(&SyncMessage::Tonality(TonalityMessage {
            key: tonality.key % 12,
            scale: tonality.scale,
            timestamp: stamp,
            origin_id,
        }));
    }

    /// Leaving the session: push out anything still debouncing
    pub fn leave(&mut self) {
        for msg in self.encoder.flush() {
            self.publish(&msg);
        }
        info!("left session, {:?}", self.counters);
    }

    fn check_connection(&mut self, now: u64) {
        let state = self.channel.connection_state();
        if state == self.last_state {
            return;
        }
        info!("sync channel {} -> {}", self.last_state, state);
        if state == ConnectionState::Connected {
            self.request_snapshot(now);
        } else if self.last_state == ConnectionState::Connected {
            // nothing held for publishing survives an outage
            let dropped = self.encoder.flush().len() as u64;
            self.counters.dropped_offline += dropped;
        }
        self.last_state = state;
    }

    fn request_snapshot(&mut self, now: u64) {
        let request = SyncMessage::SnapshotRequest(SnapshotRequest {
            origin_id: self.store.origin_id().to_string(),
        });
        self.publish(&request);
        self.counters.snapshot_requests += 1;
        self.status = SessionStatus::Resyncing;
        self.snapshot_deadline = Some(now.saturating_add(self.snapshot_timeout));
    }

    fn check_snapshot_timeout(&mut self, now: u64) {
        if let Some(deadline) = self.snapshot_deadline {
            if now >= deadline {
                warn!("{}, carrying on with local state", SyncError::SnapshotTimeout);
                self.snapshot_deadline = None;
                self.status = SessionStatus::Degraded;
                self.counters.snapshot_timeouts += 1;
            }
        }
    }

    fn read_inbound(&mut self, now: u64) {
        let batch: Vec<String> = self.inbound.try_iter().collect();
        for text in batch {
            self.counters.received += 1;
            match self.decoder.decode(&text) {
                Ok(msg) => self.handle_message(msg, now),
                Err(e) => {
                    self.counters.malformed += 1;
                    warn!("dropping inbound message: {}", e);
                }
            }
        }
    }

    fn handle_message(&mut self, msg: SyncMessage, now: u64) {
        if msg.origin_id() == self.store.origin_id() {
            return;
        }
        trace!("inbound {}", msg);
        let outcome = match &msg {
            SyncMessage::StepDelta(delta) => self.store.apply_remote_delta(delta),
            SyncMessage::PatternSnapshot(snapshot) => self.take_snapshot(snapshot),
            SyncMessage::ColorPolicy(m) => self.store.set_color_policy(m.policy, m.timestamp, &m.origin_id),
            SyncMessage::Tonality(m) => self.store.set_tonality(
                Tonality {
                    key: m.key,
                    scale: m.scale,
                },
                m.timestamp,
                &m.origin_id,
            ),
            SyncMessage::NoteTrigger(trigger) => {
                self.store.record_note_trigger_at(trigger, now);
                ApplyOutcome::Applied
            }
            SyncMessage::SnapshotRequest(req) => {
                self.answer_snapshot_request(&req.origin_id, now);
                ApplyOutcome::Applied
            }
        };
        if outcome == ApplyOutcome::Stale {
            self.counters.stale += 1;
        }
    }

    /// A snapshot replaces the grid only while we are waiting for one.  Once
    /// synced, answers to other units' requests are left alone: our replica is
    /// live and may hold edits the answer does not.
    fn take_snapshot(&mut self, snapshot: &PatternSnapshot) -> ApplyOutcome {
        let waiting = self.snapshot_deadline.is_some() || self.status == SessionStatus::Degraded;
        if !waiting {
            debug!(
                "snapshot from {} at revision {} was for someone else",
                snapshot.origin_id, snapshot.revision
            );
            return ApplyOutcome::Stale;
        }
        let outcome = self.store.apply_pattern_snapshot(snapshot);
        if outcome.applied() {
            // edits still debouncing were never in that grid, put them back
            let held: Vec<StepDelta> = self.encoder.pending_steps().cloned().collect();
            for delta in held.iter() {
                self.store.apply_remote_delta(delta);
            }
            info!("resynced from {} at revision {}", snapshot.origin_id, snapshot.revision);
        } else if self.store.snapshot().pattern.grid() == snapshot.grid.as_slice() {
            debug!("already at revision {} with {}", snapshot.revision, snapshot.origin_id);
        } else {
            info!(
                "snapshot from {} at revision {} is behind revision {}, keeping the local grid",
                snapshot.origin_id,
                snapshot.revision,
                self.store.snapshot().pattern.revision()
            );
            return outcome;
        }
        self.snapshot_deadline = None;
        self.status = SessionStatus::Synced;
        outcome
    }

    fn answer_snapshot_request(&mut self, from: &str, now: u64) {
        let state = self.store.snapshot();
        let has_state = state.pattern.revision() > 0
            || state.color_policy.timestamp > 0
            || state.tonality.timestamp > 0;
        if !has_state {
            debug!("snapshot request from {}, nothing to share yet", from);
            return;
        }
        debug!("answering snapshot request from {} with revision {}", from, state.pattern.revision());
        let origin_id = self.store.origin_id().to_string();
        let replies = [
            SyncMessage::PatternSnapshot(state.pattern.to_snapshot(&origin_id, now)),
            SyncMessage::ColorPolicy(ColorPolicyMessage {
                policy: state.color_policy.value,
                timestamp: state.color_policy.timestamp,
                origin_id: state.color_policy.origin_id.clone(),
            }),
            SyncMessage::Tonality(TonalityMessage {
                key: state.tonality.value.key,
                scale: state.tonality.value.scale,
                timestamp: state.tonality.timestamp,
                origin_id: state.tonality.origin_id.clone(),
            }),
        ];
        for reply in replies.iter() {
            // settings nobody ever set carry no origin and would not decode
            if !reply.origin_id().is_empty() {
                self.publish(reply);
            }
        }
    }

    fn flush_ready(&mut self, now: u64) {
        for msg in self.encoder.drain_ready(now) {
            self.publish(&msg);
        }
    }

    fn publish(&mut self, msg: &SyncMessage) {
        let text = match DeltaEncoder::encode(msg) {
            Ok(text) => text,
            Err(e) => {
                error!("cannot encode {}: {}", msg, e);
                return;
            }
        };
        match self.channel.publish(&self.topic, &text) {
            Ok(()) => {
                self.counters.published += 1;
                trace!("published {}", msg);
            }
            Err(SyncError::ChannelDisconnected) => {
                self.counters.dropped_offline += 1;
                debug!("offline, dropped {}", msg);
            }
            Err(e) => warn!("publish failed: {}", e),
        }
    }
}

#[cfg(test)]
mod test_session {
    use super::*;
    use crate::lights::color_resolver::Scale;
    use crate::state::drum_pattern::DEFAULT_VELOCITY;
    use crate::sync::local_bus::{BusLink, LocalBus};

    fn unit(bus: &LocalBus, name: &str) -> (SyncSession, BusLink) {
        let chan = bus.join();
        let link = chan.link();
        let store = StateStore::new(name, 4, 16, 500_000);
        (
            SyncSession::new(store, Box::new(chan), SYNC_TOPIC, 50_000, SNAPSHOT_TIMEOUT),
            link,
        )
    }

    #[test]
    fn first_poll_asks_for_a_snapshot() {
        let bus = LocalBus::new();
        let (mut a, _) = unit(&bus, "a");
        assert_eq!(a.status(), SessionStatus::Joining);
        a.poll_at(1_000);
        assert_eq!(a.status(), SessionStatus::Resyncing);
        assert_eq!(a.counters().snapshot_requests, 1);
    }

    #[test]
    fn lonely_unit_goes_degraded() {
        let bus = LocalBus::new();
        let (mut a, _) = unit(&bus, "a");
        a.poll_at(1_000);
        a.poll_at(1_000 + SNAPSHOT_TIMEOUT - 1);
        assert_eq!(a.status(), SessionStatus::Resyncing);
        a.poll_at(1_000 + SNAPSHOT_TIMEOUT);
        assert_eq!(a.status(), SessionStatus::Degraded);
        assert_eq!(a.counters().snapshot_timeouts, 1);
        // still perfectly usable
        a.local_step_toggle_at(0, 0, true, None, 3_000_000).unwrap();
        assert!(a.store().snapshot().pattern.cell(0, 0).unwrap().active);
    }

    #[test]
    fn debounced_edit_reaches_peer() {
        let bus = LocalBus::new();
        let (mut a, _) = unit(&bus, "a");
        let (mut b, _) = unit(&bus, "b");
        a.poll_at(0);
        b.poll_at(0);
        // b's snapshot request reaches a while a has nothing to share
        a.poll_at(1);
        a.local_step_toggle_at(1, 2, true, Some(80), 10_000).unwrap();
        a.local_step_toggle_at(1, 2, false, None, 20_000).unwrap();
        a.local_step_toggle_at(1, 2, true, Some(64), 30_000).unwrap();
        a.poll_at(40_000);
        b.poll_at(40_000);
        assert!(!b.store().snapshot().pattern.cell(1, 2).unwrap().active);
        let before = a.counters().published;
        a.poll_at(60_000);
        assert_eq!(a.counters().published, before + 1);
        b.poll_at(60_000);
        let cell = b.store().snapshot().pattern.cell(1, 2).unwrap().clone();
        assert!(cell.active);
        assert_eq!(cell.velocity, 64);
    }

    #[test]
    fn answers_snapshot_requests_when_it_has_state() {
        let bus = LocalBus::new();
        let (mut a, _) = unit(&bus, "a");
        a.poll_at(0);
        a.local_step_toggle_at(3, 3, true, None, 100).unwrap();
        a.local_color_policy_at(ColorPolicy::Spectrum, 100);
        a.poll_at(100_000);

        let (mut late, _) = unit(&bus, "late");
        late.poll_at(200_000); // sends the request
        a.poll_at(200_001); // answers
        late.poll_at(200_002);
        assert_eq!(late.status(), SessionStatus::Synced);
        let snap = late.store().snapshot();
        assert_eq!(snap.pattern.cell(3, 3).unwrap().velocity, DEFAULT_VELOCITY);
        assert_eq!(snap.pattern.revision(), a.store().snapshot().pattern.revision());
        assert_eq!(snap.color_policy.value, ColorPolicy::Spectrum);
    }

    fn room_snapshot(revision: u64) -> String {
        let room = StateStore::new("room", 4, 16, 500_000);
        room.apply_local_step_toggle_at(0, 0, true, None, 5).unwrap();
        let mut snap = room.pattern_snapshot(6);
        snap.revision = revision;
        DeltaEncoder::encode(&SyncMessage::PatternSnapshot(snap)).unwrap()
    }

    #[test]
    fn held_edits_survive_a_resync() {
        let bus = LocalBus::new();
        let (mut a, _) = unit(&bus, "a");
        let mut room = bus.join();
        a.poll_at(0);
        a.local_step_toggle_at(3, 3, true, None, 10).unwrap();
        room.publish(SYNC_TOPIC, &room_snapshot(5)).unwrap();
        a.poll_at(20);
        assert_eq!(a.status(), SessionStatus::Synced);
        let snap = a.store().snapshot();
        assert!(snap.pattern.cell(0, 0).unwrap().active);
        assert!(snap.pattern.cell(3, 3).unwrap().active);
        assert_eq!(snap.pattern.revision(), 6);
        assert_eq!(a.pending_deltas(), 1);
    }

    #[test]
    fn synced_unit_ignores_other_answers() {
        let bus = LocalBus::new();
        let (mut a, _) = unit(&bus, "a");
        let mut room = bus.join();
        a.poll_at(0);
        room.publish(SYNC_TOPIC, &room_snapshot(1)).unwrap();
        a.poll_at(10);
        assert_eq!(a.status(), SessionStatus::Synced);
        a.local_step_toggle_at(2, 2, true, None, 20).unwrap();
        room.publish(SYNC_TOPIC, &room_snapshot(9)).unwrap();
        a.poll_at(30);
        let snap = a.store().snapshot();
        assert!(snap.pattern.cell(2, 2).unwrap().active);
        assert_eq!(snap.pattern.revision(), 2);
    }

    #[test]
    fn older_answer_leaves_unit_waiting() {
        let bus = LocalBus::new();
        let (mut a, link) = unit(&bus, "a");
        let mut room = bus.join();
        a.poll_at(0);
        link.disconnect();
        a.poll_at(1);
        for step in 0..3 {
            a.local_step_toggle_at(1, step, true, None, 10 + step as u64).unwrap();
        }
        link.connect();
        a.poll_at(100);
        room.publish(SYNC_TOPIC, &room_snapshot(2)).unwrap();
        a.poll_at(200);
        assert_eq!(a.status(), SessionStatus::Resyncing);
        assert_eq!(a.counters().stale, 1);
        assert!(!a.store().snapshot().pattern.cell(0, 0).unwrap().active);
        a.poll_at(100 + SNAPSHOT_TIMEOUT);
        assert_eq!(a.status(), SessionStatus::Degraded);
    }

    #[test]
    fn same_grid_counts_as_synced() {
        let bus = LocalBus::new();
        let (mut a, link) = unit(&bus, "a");
        let mut room = bus.join();
        a.poll_at(0);
        room.publish(SYNC_TOPIC, &room_snapshot(1)).unwrap();
        a.poll_at(10);
        link.disconnect();
        a.poll_at(20);
        link.connect();
        a.poll_at(30);
        assert_eq!(a.status(), SessionStatus::Resyncing);
        // nothing changed in the room while we were gone
        room.publish(SYNC_TOPIC, &room_snapshot(1)).unwrap();
        a.poll_at(40);
        assert_eq!(a.status(), SessionStatus::Synced);
        a.poll_at(30 + SNAPSHOT_TIMEOUT);
        assert_eq!(a.status(), SessionStatus::Synced);
    }

    #[test]
    fn settings_stamp_tops_out() {
        let bus = LocalBus::new();
        let (mut a, _) = unit(&bus, "a");
        a.store().set_tonality(Tonality { key: 2, scale: Scale::Dorian }, u64::MAX, "zz");
        a.local_tonality_at(Tonality { key: 4, scale: Scale::Major }, 10);
        assert_eq!(a.store().snapshot().tonality.timestamp, u64::MAX);
    }

    #[test]
    fn malformed_and_own_messages_are_ignored() {
        let bus = LocalBus::new();
        let (mut a, _) = unit(&bus, "a");
        let mut raw = bus.join();
        a.poll_at(0);
        raw.publish(SYNC_TOPIC, "{\"type\":\"step_delta\"}").unwrap();
        raw.publish(
            SYNC_TOPIC,
            r#"{"type":"step_delta","trackIndex":0,"stepIndex":0,"active":true,"timestamp":5,"originId":"a"}"#,
        )
        .unwrap();
        a.poll_at(1);
        assert_eq!(a.counters().malformed, 1);
        assert_eq!(a.counters().received, 2);
        assert!(!a.store().snapshot().pattern.cell(0, 0).unwrap().active);
    }

    #[test]
    fn offline_edits_stay_local() {
        let bus = LocalBus::new();
        let (mut a, a_link) = unit(&bus, "a");
        let (mut b, _) = unit(&bus, "b");
        a.poll_at(0);
        b.poll_at(0);
        a_link.disconnect();
        a.poll_at(1);
        a.local_step_toggle_at(0, 1, true, None, 10).unwrap();
        a.local_tonality_at(Tonality { key: 9, scale: Scale::NaturalMinor }, 10);
        a.poll_at(100_000);
        b.poll_at(100_000);
        assert!(a.store().snapshot().pattern.cell(0, 1).unwrap().active);
        assert!(!b.store().snapshot().pattern.cell(0, 1).unwrap().active);
        assert!(a.counters().dropped_offline >= 2);
        assert_eq!(a.pending_deltas(), 0);
    }

    #[test]
    fn reconnect_triggers_a_new_request() {
        let bus = LocalBus::new();
        let (mut a, link) = unit(&bus, "a");
        a.poll_at(0);
        link.disconnect();
        a.poll_at(10);
        link.connect();
        a.poll_at(20);
        assert_eq!(a.counters().snapshot_requests, 2);
        assert_eq!(a.status(), SessionStatus::Resyncing);
    }

    #[test]
    fn edits_route_through_handle_edit() {
        let bus = LocalBus::new();
        let (mut a, _) = unit(&bus, "a");
        a.poll_at(0);
        a.handle_edit(
            LocalEdit::NoteTrigger {
                module_id: "keys".to_string(),
                note: 60,
                velocity: 100,
            },
            5,
        )
        .unwrap();
        assert_eq!(a.store().snapshot().triggers.active_for("keys", 5).count(), 1);
        assert_eq!(
            a.handle_edit(
                LocalEdit::StepToggle {
                    track: 10,
                    step: 0,
                    active: true,
                    velocity: None
                },
                5
            ),
            Err(SyncError::OutOfRange { track: 10, step: 0 })
        );
    }
}
