//! Audio stream format shared by the mixer, channels and decoders.
//!
//! All sample data moving through the mixer is interleaved `f32` on a
//! normalized `[-1.0, 1.0]` scale; `bits_per_sample` records the depth the
//! driver was negotiated at.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample rate, channel layout and bit depth of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Frames per second.
    pub sample_rate: u32,
    /// Interleaved channels per frame.
    pub channels: u16,
    /// Bit depth at the driver boundary.
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// 44.1 kHz stereo float.
    pub const STEREO_44K: Self = Self::new(44_100, 2);
    /// 48 kHz stereo float.
    pub const STEREO_48K: Self = Self::new(48_000, 2);

    /// Float format with the given rate and channel count.
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 32,
        }
    }

    /// Number of interleaved samples in `frames` frames.
    #[inline]
    pub fn samples_for(&self, frames: usize) -> usize {
        frames * self.channels as usize
    }

    /// Number of whole frames in `samples` interleaved samples.
    #[inline]
    pub fn frames_in(&self, samples: usize) -> usize {
        if self.channels == 0 {
            return 0;
        }
        samples / self.channels as usize
    }

    /// Duration of `frames` frames in seconds.
    pub fn duration_seconds(&self, frames: u64) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        frames as f64 / self.sample_rate as f64
    }

    /// Bytes per interleaved frame at the driver bit depth.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::STEREO_44K
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}-bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}
