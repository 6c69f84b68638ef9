use super::color_resolver::Rgb;
use std::fmt;

/// One finished frame for the strip.  Built once per tick, read only after that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    pixels: Vec<Rgb>,
}

impl FrameBuffer {
    /// all black
    pub fn blank(len: usize) -> FrameBuffer {
        FrameBuffer {
            pixels: vec![Rgb::BLACK; len],
        }
    }
    pub fn from_pixels(pixels: Vec<Rgb>) -> FrameBuffer {
        FrameBuffer { pixels }
    }
    pub fn len(&self) -> usize {
        self.pixels.len()
    }
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
    pub fn pixel(&self, idx: usize) -> Option<Rgb> {
        self.pixels.get(idx).copied()
    }
    pub fn pixels(&self) -> &[Rgb] {
        &self.pixels
    }
    pub fn lit_count(&self) -> usize {
        self.pixels.iter().filter(|p| !p.is_black()).count()
    }
}

impl fmt::Display for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "frame[{} px, {} lit]", self.len(), self.lit_count())
    }
}
