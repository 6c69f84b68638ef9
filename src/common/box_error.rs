//! Error type used for anything that crosses a thread boundary.
//!
//! The sync session, the websocket thread and the frame scheduler all hand
//! their errors back through join handles or the client loop, so the boxed
//! error has to be `Send + Sync`.
pub type BoxError = std::boxed::Box<
    dyn std::error::Error // must implement Error to satisfy ?
        + std::marker::Send // needed for threads
        + std::marker::Sync, // needed for threads
>;
