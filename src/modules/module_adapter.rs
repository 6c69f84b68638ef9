//! The contract every musical module implements.
use crate::lights::{color_resolver::ColorPolicy, compositor::LightLayer};
use crate::state::{session_state::SessionState, session_state::Tonality, state_store::StateChange};

/// Something the local player did that the room should hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEdit {
    StepToggle {
        track: usize,
        step: usize,
        active: bool,
        velocity: Option<u8>,
    },
    NoteTrigger {
        module_id: String,
        note: u8,
        velocity: u8,
    },
    ColorPolicy(ColorPolicy),
    Tonality(Tonality),
}

pub trait ModuleAdapter: Send {
    /// stable name, also the key for this module's note triggers
    fn module_id(&self) -> &str;

    /// Local edits since the last call
    fn poll_edits(&mut self) -> Vec<LocalEdit>;

    /// A synchronized change was committed to the replica.  Modules use this
    /// for their own local playback; the default ignores it.
    fn render(&mut self, _change: &StateChange, _state: &SessionState) {}

    /// The layer this module draws on the strip, if any.  Called once when the
    /// unit starts; the layer moves to the frame thread.
    fn light_layer(&self) -> Option<Box<dyn LightLayer>> {
        None
    }

    /// true when this module's own layer draws its note triggers.  Triggers
    /// from modules nobody claims go to the shared remote notes layer.
    fn claims_note_triggers(&self) -> bool {
        false
    }
}
