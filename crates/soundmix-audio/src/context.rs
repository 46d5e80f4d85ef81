//! State carried across the render boundary.
//!
//! `RenderContext` lives for one driver callback. `PlaybackContext` lives
//! from `prepare_to_play` to `finish_stopping` on one channel and owns the
//! buffers the channel renders into, so nothing is allocated while playing.

use soundmix_core::{AudioFormat, Result, SoundError};

/// Per-callback render state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderContext {
    /// Frames requested by the driver.
    pub frame_count: usize,
    /// Driver timestamp of the first frame, in frames.
    pub sample_time: u64,
    /// Set by the mixer when no channel contributed.
    pub output_is_silence: bool,
    /// Channels mixed into this block.
    pub rendered_channels: usize,
    /// Occupied slots passed over because a control thread held them.
    pub skipped_channels: usize,
    /// Output samples changed by the clip policy.
    pub clipped_samples: usize,
}

impl RenderContext {
    /// Context for a callback of `frame_count` frames starting at `sample_time`.
    pub fn new(frame_count: usize, sample_time: u64) -> Self {
        Self {
            frame_count,
            sample_time,
            ..Default::default()
        }
    }

    /// Reset the status flags for the next callback and advance the clock.
    pub fn advance(&mut self, frame_count: usize) {
        self.sample_time += self.frame_count as u64;
        *self = Self::new(frame_count, self.sample_time);
    }
}

/// Negotiated format and render buffers for one playing channel.
#[derive(Debug)]
pub struct PlaybackContext {
    source: AudioFormat,
    output: AudioFormat,
    max_frames: usize,
    pub(crate) decode_buf: Vec<f32>,
    pub(crate) mix_buf: Vec<f32>,
    pub(crate) frames_rendered: u64,
    pub(crate) started_at: Option<u64>,
}

impl PlaybackContext {
    /// Negotiate `source` against the mixer's `output` format and allocate
    /// buffers for blocks of up to `max_frames` frames.
    pub fn negotiate(source: AudioFormat, output: AudioFormat, max_frames: usize) -> Result<Self> {
        if source.sample_rate != output.sample_rate {
            return Err(SoundError::FormatNegotiationFailed(format!(
                "unsupported sample rate {} Hz (mixer runs at {} Hz)",
                source.sample_rate, output.sample_rate
            )));
        }
        let convertible = source.channels == output.channels
            || matches!((source.channels, output.channels), (1, 2) | (2, 1));
        if source.channels == 0 || !convertible {
            return Err(SoundError::FormatNegotiationFailed(format!(
                "cannot map {} source channels onto {} output channels",
                source.channels, output.channels
            )));
        }
        if max_frames == 0 {
            return Err(SoundError::FormatNegotiationFailed(
                "zero-length render slice".into(),
            ));
        }

        Ok(Self {
            source,
            output,
            max_frames,
            decode_buf: vec![0.0; source.samples_for(max_frames)],
            mix_buf: vec![0.0; output.samples_for(max_frames)],
            frames_rendered: 0,
            started_at: None,
        })
    }

    /// Format the decoder delivers.
    pub fn source_format(&self) -> AudioFormat {
        self.source
    }

    /// Format the channel renders in.
    pub fn output_format(&self) -> AudioFormat {
        self.output
    }

    /// Largest block the channel renders in one call.
    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// Frames of real (non-padding) audio rendered so far.
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Sample time of the first rendered block.
    pub fn started_at(&self) -> Option<u64> {
        self.started_at
    }
}

/// Copy `src` frames into `dst`, converting between mono and stereo.
pub(crate) fn convert_channels(
    src: &[f32],
    dst: &mut [f32],
    src_channels: usize,
    dst_channels: usize,
) {
    match (src_channels, dst_channels) {
        (a, b) if a == b => dst.copy_from_slice(src),
        (1, 2) => {
            for (frame, &s) in dst.chunks_exact_mut(2).zip(src) {
                frame[0] = s;
                frame[1] = s;
            }
        }
        (2, 1) => {
            for (d, frame) in dst.iter_mut().zip(src.chunks_exact(2)) {
                *d = (frame[0] + frame[1]) * 0.5;
            }
        }
        _ => dst.fill(0.0),
    }
}
