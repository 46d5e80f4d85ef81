//! soundmix core - foundation types for the channel mixer
//!
//! This crate provides the types shared by the mixer and its collaborators:
//! - Error handling (SoundError, Result)
//! - Stream format description (AudioFormat)
//! - Mixer configuration (MixerConfig, ClipPolicy, PanLaw)

pub mod config;
pub mod error;
pub mod format;

pub use config::{ClipPolicy, MixerConfig, PanLaw};
pub use error::{Result, SoundError};
pub use format::AudioFormat;

/// Limits used when a configuration does not say otherwise.
pub mod defaults {
    /// General-purpose channel slots per mixer.
    pub const CHANNEL_CAPACITY: usize = 32;

    /// Frames a channel renders per pull (one driver slice).
    pub const MAX_FRAMES_PER_SLICE: usize = 4096;

    /// Pending events the audio thread may queue before overflow is counted.
    pub const EVENT_QUEUE_CAPACITY: usize = 256;
}
