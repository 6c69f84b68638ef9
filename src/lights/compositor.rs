//! Blending every module's light layer into one frame.
//!
//! Blending is brightness-max: on each pixel the brightest source wins
//! outright and its color is shown dimmed to its intensity.  Colors are never
//! added, so two modules lighting the same pixel cannot wash out to white.
//! On equal intensity the layer registered first keeps the pixel.
use log::{debug, warn};
use std::time::Instant;

use super::{color_resolver::Rgb, frame_buffer::FrameBuffer};
use crate::state::session_state::SessionState;

/// A request for light on one pixel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSource {
    pub pixel: usize,
    pub color: Rgb,
    /// 0.0 ..= 1.0
    pub intensity: f32,
}

/// What a module draws.  Layers run on the frame thread so they must only
/// look at the state they are handed.
pub trait LightLayer: Send {
    fn light_sources(&self, state: &SessionState, strip_len: usize, now: u64) -> Vec<LightSource>;
}

pub struct LedCompositor {
    strip_len: usize,
    layers: Vec<Box<dyn LightLayer>>,
    budget_us: u64,
    last_frame: FrameBuffer,
    overruns: u64,
}

impl LedCompositor {
    /// `budget_us` of 0 means no budget
    pub fn new(strip_len: usize, budget_us: u64) -> LedCompositor {
        LedCompositor {
            strip_len,
            layers: vec![],
            budget_us,
            last_frame: FrameBuffer::blank(strip_len),
            overruns: 0,
        }
    }

    /// Layers blend in the order they are added
    pub fn add_layer(&mut self, layer: Box<dyn LightLayer>) {
        self.layers.push(layer);
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
    pub fn strip_len(&self) -> usize {
        self.strip_len
    }
    pub fn get_overruns(&self) -> u64 {
        self.overruns
    }
    /// the frame most recently composed, blank before the first one
    pub fn last_frame(&self) -> &FrameBuffer {
        &self.last_frame
    }

    /// Compose the frame for `now`.  Returns None when the budget ran out, in
    /// which case the strip should keep showing [`LedCompositor::last_frame`].
    pub fn compose(&mut self, state: &SessionState, now: u64) -> Option<FrameBuffer> {
        let started = Instant::now();
        let mut best: Vec<(f32, Rgb)> = vec![(0.0, Rgb::BLACK); self.strip_len];
        for layer in self.layers.iter() {
            for source in layer.light_sources(state, self.strip_len, now) {
                let intensity = source.intensity.clamp(0.0, 1.0);
                if let Some(slot) = best.get_mut(source.pixel) {
                    if intensity > slot.0 {
                        *slot = (intensity, source.color);
                    }
                }
            }
            if self.budget_us > 0 && started.elapsed().as_micros() > self.budget_us as u128 {
                self.overruns += 1;
                if self.overruns == 1 || self.overruns % 100 == 0 {
                    warn!(
                        "compositor overrun: {} us budget exceeded, {} frames skipped so far",
                        self.budget_us, self.overruns
                    );
                }
                return None;
            }
        }
        let frame = FrameBuffer::from_pixels(best.into_iter().map(|(i, c)| c.dim(i)).collect());
        if frame != self.last_frame {
            debug!("composed {}", frame);
        }
        self.last_frame = frame.clone();
        Some(frame)
    }
}
