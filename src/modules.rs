//! Musical modules and how they plug into a unit.
//!
//! A module (drum grid, keyboard, pad controller, ...) lives outside this
//! crate.  It talks to us through the [`module_adapter::ModuleAdapter`]
//! contract: it hands over local edits, hears about synchronized changes, and
//! may contribute a light layer to the compositor.  A few adapters ship here.
pub mod channel_adapter;
pub mod demo_module;
pub mod drum_grid;
pub mod module_adapter;
pub mod note_lights;
