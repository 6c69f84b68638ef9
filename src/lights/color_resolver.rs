//! Note to color mapping shared by every device in a session.
//!
//! [`resolve`] is a pure function of its arguments.  Two units given the same
//! note, policy, key and scale light the same color, which is the whole point:
//! nobody sends colors over the wire, only notes.  Everything in here is
//! integer math so there is no float rounding to disagree about.
use serde::{Deserialize, Serialize};
use simple_error::SimpleError;
use std::{fmt, str::FromStr};

/// One pixel
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Rgb {
        Rgb { r, g, b }
    }

    /// Scale the color by an intensity in 0.0 ..= 1.0
    pub fn dim(&self, intensity: f32) -> Rgb {
        let k = intensity.clamp(0.0, 1.0);
        let scale = |c: u8| (c as f32 * k).round() as u8;
        Rgb::new(scale(self.r), scale(self.g), scale(self.b))
    }

    pub fn is_black(&self) -> bool {
        *self == Rgb::BLACK
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Session wide rule for turning notes into colors
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorPolicy {
    /// scale degree picks a spot on the hue wheel
    #[default]
    Harmonic,
    /// pitch class picks from a fixed 12 color palette
    Chromatic,
    /// absolute pitch slides along a red to violet gradient
    Spectrum,
}

impl FromStr for ColorPolicy {
    type Err = SimpleError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "harmonic" => Ok(ColorPolicy::Harmonic),
            "chromatic" => Ok(ColorPolicy::Chromatic),
            "spectrum" => Ok(ColorPolicy::Spectrum),
            other => Err(SimpleError::new(format!("unknown color policy: {}", other))),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    #[default]
    Major,
    NaturalMinor,
    HarmonicMinor,
    Dorian,
    Mixolydian,
    MajorPentatonic,
    MinorPentatonic,
    Blues,
    Chromatic,
}

impl Scale {
    /// semitone offsets from the root, ascending, always starting at 0
    pub fn intervals(&self) -> &'static [u8] {
        match self {
            Scale::Major => &[0, 2, 4, 5, 7, 9, 11],
            Scale::NaturalMinor => &[0, 2, 3, 5, 7, 8, 10],
            Scale::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            Scale::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            Scale::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            Scale::MajorPentatonic => &[0, 2, 4, 7, 9],
            Scale::MinorPentatonic => &[0, 3, 5, 7, 10],
            Scale::Blues => &[0, 3, 5, 6, 7, 10],
            Scale::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        }
    }
}

impl FromStr for Scale {
    type Err = SimpleError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "major" => Ok(Scale::Major),
            "minor" | "natural_minor" => Ok(Scale::NaturalMinor),
            "harmonic_minor" => Ok(Scale::HarmonicMinor),
            "dorian" => Ok(Scale::Dorian),
            "mixolydian" => Ok(Scale::Mixolydian),
            "major_pentatonic" => Ok(Scale::MajorPentatonic),
            "minor_pentatonic" => Ok(Scale::MinorPentatonic),
            "blues" => Ok(Scale::Blues),
            "chromatic" => Ok(Scale::Chromatic),
            other => Err(SimpleError::new(format!("unknown scale: {}", other))),
        }
    }
}

/// One color per pitch class, C first
pub const CHROMATIC_PALETTE: [Rgb; 12] = [
    Rgb::new(255, 0, 0),     // C
    Rgb::new(255, 64, 0),    // C#
    Rgb::new(255, 160, 0),   // D
    Rgb::new(255, 230, 0),   // D#
    Rgb::new(160, 255, 0),   // E
    Rgb::new(0, 255, 40),    // F
    Rgb::new(0, 255, 170),   // F#
    Rgb::new(0, 200, 255),   // G
    Rgb::new(0, 90, 255),    // G#
    Rgb::new(60, 0, 255),    // A
    Rgb::new(160, 0, 255),   // A#
    Rgb::new(255, 0, 170),   // B
];

const SPECTRUM_LOW: u8 = 21; // A0
const SPECTRUM_HIGH: u8 = 108; // C8
const SPECTRUM_MAX_HUE: u32 = 300;

/// Map a note to a color.  `key` is a pitch class (taken mod 12).
pub fn resolve(note: u8, policy: ColorPolicy, key: u8, scale: Scale) -> Rgb {
    match policy {
        ColorPolicy::Harmonic => harmonic(note, key, scale),
        ColorPolicy::Chromatic => CHROMATIC_PALETTE[(note % 12) as usize],
        ColorPolicy::Spectrum => {
            let n = note.clamp(SPECTRUM_LOW, SPECTRUM_HIGH) - SPECTRUM_LOW;
            let hue = n as u32 * SPECTRUM_MAX_HUE / (SPECTRUM_HIGH - SPECTRUM_LOW) as u32;
            hsv_to_rgb(hue, 255, 255)
        }
    }
}

fn harmonic(note: u8, key: u8, scale: Scale) -> Rgb {
    let intervals = scale.intervals();
    let rel = (note as u32 % 12 + 12 - key as u32 % 12) % 12;
    // intervals start at 0 so there is always a tone at or below rel
    let degree = intervals
        .iter()
        .rposition(|&i| i as u32 <= rel)
        .unwrap_or(0);
    let in_scale = intervals[degree] as u32 == rel;
    let hue = degree as u32 * 360 / intervals.len() as u32;
    let sat = if in_scale { 255 } else { 128 };
    hsv_to_rgb(hue, sat, 255)
}

/// hue 0..360, sat and value 0..=255
pub fn hsv_to_rgb(hue: u32, sat: u32, val: u32) -> Rgb {
    let hue = hue % 360;
    let sat = sat.min(255);
    let val = val.min(255);
    let region = hue / 60;
    let rem = (hue % 60) * 255 / 60;
    let p = val * (255 - sat) / 255;
    let q = val * (255 - sat * rem / 255) / 255;
    let t = val * (255 - sat * (255 - rem) / 255) / 255;
    let (r, g, b) = match region {
        0 => (val, t, p),
        1 => (q, val, p),
        2 => (p, val, t),
        3 => (p, q, val),
        4 => (t, p, val),
        _ => (val, p, q),
    };
    Rgb::new(r as u8, g as u8, b as u8)
}
