//! Where finished frames go.
//!
//! A unit with a strip drives it through the [`Ws2812Sink`] (raspberry pi
//! SPI, `rpi` feature).  Units without one use the [`NullSink`], and the
//! [`ConsoleSink`] draws the strip in a terminal for bench testing.
use log::{info, trace};
use std::{
    error::Error,
    fmt,
    io::{self, Write},
};

#[cfg(test)]
use mockall::automock;

use super::frame_buffer::FrameBuffer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// the device went away for good, stop sending frames
    Detached,
    /// this frame did not make it, the next one might
    Io(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SinkError::Detached => write!(f, "output device detached"),
            SinkError::Io(msg) => write!(f, "output write failed: {}", msg),
        }
    }
}

impl Error for SinkError {}

impl From<io::Error> for SinkError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected => SinkError::Detached,
            _ => SinkError::Io(e.to_string()),
        }
    }
}

#[cfg_attr(test, automock)]
pub trait OutputSink: Send {
    fn write(&mut self, frame: &FrameBuffer) -> Result<(), SinkError>;
}

/// No hardware, frames go nowhere
#[derive(Default)]
pub struct NullSink {
    frames: u64,
}

impl NullSink {
    pub fn new() -> NullSink {
        NullSink::default()
    }
    pub fn get_frames(&self) -> u64 {
        self.frames
    }
}

impl OutputSink for NullSink {
    fn write(&mut self, frame: &FrameBuffer) -> Result<(), SinkError> {
        self.frames += 1;
        trace!("null sink: {}", frame);
        Ok(())
    }
}

/// Draws the strip as a row of colored blocks using 24 bit ANSI colors
pub struct ConsoleSink {
    out: Box<dyn Write + Send>,
    last: Option<FrameBuffer>,
}

impl ConsoleSink {
    pub fn new() -> ConsoleSink {
        ConsoleSink::with_writer(Box::new(io::stdout()))
    }
    pub fn with_writer(out: Box<dyn Write + Send>) -> ConsoleSink {
        ConsoleSink { out, last: None }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        ConsoleSink::new()
    }
}

/// one terminal line for a frame, starting with a carriage return
pub fn ansi_line(frame: &FrameBuffer) -> String {
    let mut line = String::from("\r");
    for px in frame.pixels() {
        line.push_str(&format!("\x1b[48;2;{};{};{}m ", px.r, px.g, px.b));
    }
    line.push_str("\x1b[0m");
    line
}

impl OutputSink for ConsoleSink {
    fn write(&mut self, frame: &FrameBuffer) -> Result<(), SinkError> {
        // the terminal holds the last frame just like a strip does
        if self.last.as_ref() == Some(frame) {
            return Ok(());
        }
        self.out.write_all(ansi_line(frame).as_bytes())?;
        self.out.flush()?;
        self.last = Some(frame.clone());
        Ok(())
    }
}

/// SPI clock giving three SPI bits per WS2812 bit
pub const WS2812_SPI_CLOCK: u32 = 2_400_000;
const WS2812_RESET_BYTES: usize = 64;

/// Encode a frame for a WS2812 strip on an SPI MOSI line.  Every data bit
/// becomes three SPI bits (`110` for a one, `100` for a zero), colors go out
/// green, red, blue, and a run of zero bytes latches the strip.
pub fn ws2812_encode(frame: &FrameBuffer) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() * 9 + WS2812_RESET_BYTES);
    for px in frame.pixels() {
        for byte in [px.g, px.r, px.b] {
            let mut bits: u32 = 0;
            for n in (0..8).rev() {
                bits <<= 3;
                bits |= if byte & (1 << n) != 0 { 0b110 } else { 0b100 };
            }
            out.extend_from_slice(&[(bits >> 16) as u8, (bits >> 8) as u8, bits as u8]);
        }
    }
    out.resize(out.len() + WS2812_RESET_BYTES, 0);
    out
}

/// Is there a strip we can drive?
pub fn has_strip() -> bool {
    #[cfg(feature = "rpi")]
    {
        match Ws2812Sink::new() {
            Ok(_) => true,
            Err(e) => {
                info!("no led strip: {}", e);
                false
            }
        }
    }
    #[cfg(not(feature = "rpi"))]
    {
        info!("built without rpi support, no led strip");
        false
    }
}

#[cfg(feature = "rpi")]
pub struct Ws2812Sink {
    spi: rppal::spi::Spi,
}

#[cfg(feature = "rpi")]
impl Ws2812Sink {
    pub fn new() -> Result<Ws2812Sink, crate::common::box_error::BoxError> {
        use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, WS2812_SPI_CLOCK, Mode::Mode0)?;
        info!("ws2812 strip on spi0 at {} Hz", WS2812_SPI_CLOCK);
        Ok(Ws2812Sink { spi })
    }
}

#[cfg(feature = "rpi")]
impl OutputSink for Ws2812Sink {
    fn write(&mut self, frame: &FrameBuffer) -> Result<(), SinkError> {
        let data = ws2812_encode(frame);
        match self.spi.write(&data) {
            Ok(_) => Ok(()),
            Err(rppal::spi::Error::Io(e)) => Err(e.into()),
            Err(e) => Err(SinkError::Io(e.to_string())),
        }
    }
}
