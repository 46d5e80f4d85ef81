//! Mixer configuration.
//!
//! Read from JSON once at setup; the format it describes is fixed for the
//! lifetime of the mixer.

use crate::defaults;
use crate::error::{Result, SoundError};
use crate::format::AudioFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Upper bound on channel slots a single mixer may own.
pub const MAX_CAPACITY: usize = 1024;

/// Upper bound on frames rendered per channel per slice.
pub const MAX_FRAMES_PER_SLICE: usize = 16_384;

/// What happens to summed samples that leave the normalized range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ClipPolicy {
    /// Clamp every output sample to `[-limit, limit]`.
    HardClamp { limit: f32 },
    /// Leave the sum untouched; the driver sees whatever was mixed.
    None,
}

impl Default for ClipPolicy {
    fn default() -> Self {
        Self::HardClamp { limit: 1.0 }
    }
}

/// How a channel's pan position splits its gain across a stereo pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanLaw {
    /// Unity on both sides at center; the far side is attenuated linearly.
    #[default]
    Balance,
    /// Sin/cos curve: equal power across the field, -3 dB at center.
    ConstantPower,
}

impl PanLaw {
    /// Left/right gain for `gain` at `pan` (-1.0 = full left, 1.0 = full right).
    pub fn stereo_gain(self, gain: f32, pan: f32) -> (f32, f32) {
        let pan = pan.clamp(-1.0, 1.0);
        match self {
            Self::Balance => (gain * (1.0 - pan).min(1.0), gain * (1.0 + pan).min(1.0)),
            Self::ConstantPower => {
                let angle = (pan + 1.0) * 0.25 * std::f32::consts::PI;
                (gain * angle.cos(), gain * angle.sin())
            }
        }
    }
}

/// Configuration for one sound mixer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Number of channel slots.
    pub capacity: usize,
    /// Output sample rate.
    pub sample_rate: u32,
    /// Output channel count (1 or 2).
    pub channels: u16,
    /// Driver bit depth.
    pub bits_per_sample: u16,
    /// Largest block a channel renders in one pull.
    pub max_frames_per_slice: usize,
    /// Output clipping.
    pub clip: ClipPolicy,
    /// Stereo pan law.
    pub pan_law: PanLaw,
    /// Slots in the audio-thread to control-thread event queue.
    pub event_queue_capacity: usize,
    /// Gain applied to the summed output.
    pub master_gain: f32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::CHANNEL_CAPACITY,
            sample_rate: 44_100,
            channels: 2,
            bits_per_sample: 32,
            max_frames_per_slice: defaults::MAX_FRAMES_PER_SLICE,
            clip: ClipPolicy::default(),
            pan_law: PanLaw::default(),
            event_queue_capacity: defaults::EVENT_QUEUE_CAPACITY,
            master_gain: 1.0,
        }
    }
}

impl MixerConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading mixer config from {}", path.display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The output format this configuration negotiates.
    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
        }
    }

    /// Check every field against the ranges the mixer supports.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(SoundError::InvalidConfig(format!(
                "capacity {} out of range (1-{})",
                self.capacity, MAX_CAPACITY
            )));
        }
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(SoundError::InvalidConfig(format!(
                "sample rate {} out of range (8000-192000)",
                self.sample_rate
            )));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(SoundError::InvalidConfig(format!(
                "{} output channels unsupported (mono or stereo only)",
                self.channels
            )));
        }
        if !matches!(self.bits_per_sample, 16 | 24 | 32) {
            return Err(SoundError::InvalidConfig(format!(
                "bit depth {} unsupported",
                self.bits_per_sample
            )));
        }
        if self.max_frames_per_slice == 0 || self.max_frames_per_slice > MAX_FRAMES_PER_SLICE {
            return Err(SoundError::InvalidConfig(format!(
                "max frames per slice {} out of range (1-{})",
                self.max_frames_per_slice, MAX_FRAMES_PER_SLICE
            )));
        }
        if self.event_queue_capacity == 0 {
            return Err(SoundError::InvalidConfig(
                "event queue capacity must be non-zero".into(),
            ));
        }
        if !self.master_gain.is_finite() || self.master_gain < 0.0 {
            return Err(SoundError::InvalidConfig(format!(
                "master gain {} must be finite and non-negative",
                self.master_gain
            )));
        }
        if let ClipPolicy::HardClamp { limit } = self.clip {
            if !limit.is_finite() || limit <= 0.0 {
                return Err(SoundError::InvalidConfig(format!(
                    "clamp limit {} must be finite and positive",
                    limit
                )));
            }
        }
        Ok(())
    }
}
