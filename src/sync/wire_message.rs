//! The closed set of messages units send each other.
//!
//! On the wire each one is a small json object tagged by `type`:
//!
//! ```json
//! {"type":"step_delta","trackIndex":2,"stepIndex":5,"active":true,"velocity":100,"timestamp":100,"originId":"b8:27:eb:01:02:03"}
//! {"type":"snapshot_request","originId":"b8:27:eb:01:02:03"}
//! ```
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::lights::color_resolver::{ColorPolicy, Scale};
use crate::state::{
    drum_pattern::{PatternSnapshot, StepDelta},
    note_trigger::NoteTrigger,
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ColorPolicyMessage {
    pub policy: ColorPolicy,
    pub timestamp: u64,
    pub origin_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TonalityMessage {
    pub key: u8,
    pub scale: Scale,
    pub timestamp: u64,
    pub origin_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequest {
    pub origin_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    StepDelta(StepDelta),
    PatternSnapshot(PatternSnapshot),
    ColorPolicy(ColorPolicyMessage),
    Tonality(TonalityMessage),
    NoteTrigger(NoteTrigger),
    SnapshotRequest(SnapshotRequest),
}

impl SyncMessage {
    /// the unit that sent it
    pub fn origin_id(&self) -> &str {
        match self {
            SyncMessage::StepDelta(m) => &m.origin_id,
            SyncMessage::PatternSnapshot(m) => &m.origin_id,
            SyncMessage::ColorPolicy(m) => &m.origin_id,
            SyncMessage::Tonality(m) => &m.origin_id,
            SyncMessage::NoteTrigger(m) => &m.origin_id,
            SyncMessage::SnapshotRequest(m) => &m.origin_id,
        }
    }

    /// the wire tag, handy for logging
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::StepDelta(_) => "step_delta",
            SyncMessage::PatternSnapshot(_) => "pattern_snapshot",
            SyncMessage::ColorPolicy(_) => "color_policy",
            SyncMessage::Tonality(_) => "tonality",
            SyncMessage::NoteTrigger(_) => "note_trigger",
            SyncMessage::SnapshotRequest(_) => "snapshot_request",
        }
    }
}

impl fmt::Display for SyncMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyncMessage::StepDelta(d) => write!(
                f,
                "{{ step_delta ({}, {}) active: {} @ {} from {} }}",
                d.track_index, d.step_index, d.active, d.timestamp, d.origin_id
            ),
            SyncMessage::PatternSnapshot(s) => write!(
                f,
                "{{ pattern_snapshot rev: {} @ {} from {} }}",
                s.revision, s.timestamp, s.origin_id
            ),
            other => write!(f, "{{ {} from {} }}", other.kind(), other.origin_id()),
        }
    }
}
