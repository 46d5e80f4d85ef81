//! soundmix audio - channel mixer
//!
//! Plays decoded sounds on a fixed pool of channels and sums them in a
//! real-time render callback.
//!
//! Architecture:
//! - `SoundChannel`: one decoder plus its playback state machine
//! - `SoundMixer`: slot pool, connect/disconnect, render callback
//! - `RenderContext` / `PlaybackContext`: per-callback and per-channel render state
//! - `SoundSystem`: process-wide owner of the mixer
//! - `OutputStream`: cpal device driving the render callback (`cpal-output` feature)

pub mod channel;
pub mod context;
pub mod decoder;
pub mod events;
pub mod mixer;
#[cfg(feature = "cpal-output")]
pub mod output;
pub mod system;

pub use channel::{ChannelHandle, ChannelState, MixerLink, SoundChannel};
pub use context::{PlaybackContext, RenderContext};
pub use decoder::{BufferedDecoder, DecodeStatus, Decoder, ToneDecoder};
pub use events::{MixerEvent, MixerEventKind, MixerStats, RetireReason, RetiredChannel};
pub use mixer::{DisconnectStatus, RenderStatus, SoundMixer};
#[cfg(feature = "cpal-output")]
pub use output::OutputStream;
pub use system::SoundSystem;
