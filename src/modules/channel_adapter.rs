//! Adapter for a module that runs on its own thread.
//!
//! The module side keeps the two channel ends handed out by
//! [`ChannelAdapter::new`]: it sends [`LocalEdit`]s in and receives every
//! committed [`StateChange`] back out.
use log::warn;
use std::sync::mpsc;

use super::module_adapter::{LocalEdit, ModuleAdapter};
use crate::lights::compositor::LightLayer;
use crate::modules::note_lights::NoteLightsLayer;
use crate::state::{session_state::SessionState, state_store::StateChange};

pub struct ChannelAdapter {
    module_id: String,
    edits_rx: mpsc::Receiver<LocalEdit>,
    changes_tx: mpsc::Sender<StateChange>,
    module_gone: bool,
    with_note_lights: bool,
}

impl ChannelAdapter {
    /// Returns the adapter plus the module's ends: edits go in, changes come out
    pub fn new(module_id: &str) -> (ChannelAdapter, mpsc::Sender<LocalEdit>, mpsc::Receiver<StateChange>) {
        let (edits_tx, edits_rx) = mpsc::channel();
        let (changes_tx, changes_rx) = mpsc::channel();
        let adapter = ChannelAdapter {
            module_id: module_id.to_string(),
            edits_rx,
            changes_tx,
            module_gone: false,
            with_note_lights: false,
        };
        (adapter, edits_tx, changes_rx)
    }

    /// Draw this module's note triggers on the strip
    pub fn with_note_lights(mut self) -> ChannelAdapter {
        self.with_note_lights = true;
        self
    }
}

impl ModuleAdapter for ChannelAdapter {
    fn module_id(&self) -> &str {
        &self.module_id
    }

    fn poll_edits(&mut self) -> Vec<LocalEdit> {
        self.edits_rx.try_iter().collect()
    }

    fn render(&mut self, change: &StateChange, _state: &SessionState) {
        if self.changes_tx.send(change.clone()).is_err() && !self.module_gone {
            warn!("module {} stopped listening for changes", self.module_id);
            self.module_gone = true;
        }
    }

    fn light_layer(&self) -> Option<Box<dyn LightLayer>> {
        if self.with_note_lights {
            Some(Box::new(NoteLightsLayer::new(&self.module_id)))
        } else {
            None
        }
    }

    fn claims_note_triggers(&self) -> bool {
        self.with_note_lights
    }
}
