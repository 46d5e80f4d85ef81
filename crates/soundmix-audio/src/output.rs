//! Hardware output through cpal.
//!
//! The driver's data callback is the render callback: each buffer the
//! device asks for is filled by [`SoundMixer::render`].

use crate::context::RenderContext;
use crate::mixer::SoundMixer;
use crate::system::SoundSystem;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use soundmix_core::{AudioFormat, Result, SoundError};
use std::sync::Arc;
use tracing::{error, info};

/// A running output stream. Dropping it stops the callback.
pub struct OutputStream {
    stream: cpal::Stream,
    format: AudioFormat,
    device_name: String,
}

impl OutputStream {
    /// Open the default output device at the mixer's format and start rendering.
    pub fn open_default(mixer: Arc<SoundMixer>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| SoundError::Device("no output device available".into()))?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".into());

        let format = mixer.format();
        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let channels = format.channels as usize;
        let mut ctx = RenderContext::new(0, 0);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // No allocations, no I/O, no blocking locks past this point
                    ctx.advance(data.len() / channels);
                    mixer.render(&mut ctx, data);
                },
                move |err| {
                    error!("Output stream error: {}", err);
                    SoundSystem::mark_broken(&err.to_string());
                },
                None,
            )
            .map_err(|e| SoundError::Device(e.to_string()))?;
        stream
            .play()
            .map_err(|e| SoundError::Device(e.to_string()))?;

        info!("Output running on '{}' at {}", device_name, format);
        Ok(Self {
            stream,
            format,
            device_name,
        })
    }

    /// Format the device was opened with.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Name reported by the device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Suspend the callback without closing the device.
    pub fn pause(&self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| SoundError::Device(e.to_string()))
    }

    /// Resume a paused callback.
    pub fn resume(&self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| SoundError::Device(e.to_string()))
    }
}
