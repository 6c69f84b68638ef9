//! Everything between the session state and the LEDs.
//!
//! The [`frame_scheduler::FrameScheduler`] ticks at a fixed rate on its own
//! thread.  Each tick the [`compositor::LedCompositor`] asks every light layer
//! where it wants light, blends that into a [`frame_buffer::FrameBuffer`] and
//! hands it to an [`output_sink::OutputSink`].  None of this ever waits on the
//! network.
pub mod color_resolver;
pub mod compositor;
pub mod frame_buffer;
pub mod frame_scheduler;
pub mod output_sink;
