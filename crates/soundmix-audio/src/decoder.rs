//! Decoder boundary: pull-based sources of interleaved PCM frames.
//!
//! The mixer never decodes files itself. Anything that can hand over `f32`
//! frames on demand plugs in through [`Decoder`].

use soundmix_core::{AudioFormat, Result};
use std::sync::Arc;

/// Outcome of one [`Decoder::read`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStatus {
    /// Whole frames written to the front of the buffer.
    pub frames: usize,
    /// No frames will follow this read.
    pub end_of_stream: bool,
}

impl DecodeStatus {
    /// More frames may follow.
    pub fn more(frames: usize) -> Self {
        Self {
            frames,
            end_of_stream: false,
        }
    }

    /// Final read of the stream.
    pub fn end(frames: usize) -> Self {
        Self {
            frames,
            end_of_stream: true,
        }
    }
}

/// A source of decoded PCM audio.
///
/// `read` is called from the audio thread and must not block. `release` is
/// called once from a control thread after the last `read`.
pub trait Decoder: Send {
    /// Format of the frames this decoder produces.
    fn format(&self) -> AudioFormat;

    /// Fill the front of `out` with interleaved frames in [`Decoder::format`]
    /// layout. `out.len()` is always a whole number of frames.
    fn read(&mut self, out: &mut [f32]) -> Result<DecodeStatus>;

    /// Drop playback resources. No `read` follows.
    fn release(&mut self) {}
}

impl<D: Decoder + ?Sized> Decoder for Box<D> {
    fn format(&self) -> AudioFormat {
        (**self).format()
    }

    fn read(&mut self, out: &mut [f32]) -> Result<DecodeStatus> {
        (**self).read(out)
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// A fully decoded sound held in memory.
///
/// The sample data is shared, so one buffer can play on many channels at once.
#[derive(Debug, Clone)]
pub struct BufferedDecoder {
    format: AudioFormat,
    samples: Arc<[f32]>,
    position: usize,
    looping: bool,
}

impl BufferedDecoder {
    /// Wrap interleaved samples. A trailing partial frame is ignored.
    pub fn new(format: AudioFormat, samples: impl Into<Arc<[f32]>>) -> Self {
        Self {
            format,
            samples: samples.into(),
            position: 0,
            looping: false,
        }
    }

    /// Restart from the top instead of ending.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Total frames in the buffer.
    pub fn frame_count(&self) -> usize {
        self.format.frames_in(self.samples.len())
    }

    /// Next frame to be read.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Shared sample data.
    pub fn samples(&self) -> &Arc<[f32]> {
        &self.samples
    }
}

impl Decoder for BufferedDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, out: &mut [f32]) -> Result<DecodeStatus> {
        let channels = self.format.channels as usize;
        let total = self.frame_count();
        let wanted = self.format.frames_in(out.len());
        if total == 0 {
            return Ok(DecodeStatus::end(0));
        }

        let mut written = 0;
        while written < wanted {
            if self.position >= total {
                if !self.looping {
                    return Ok(DecodeStatus::end(written));
                }
                self.position = 0;
            }
            let count = (total - self.position).min(wanted - written);
            let src = &self.samples[self.position * channels..(self.position + count) * channels];
            out[written * channels..(written + count) * channels].copy_from_slice(src);
            self.position += count;
            written += count;
        }

        if !self.looping && self.position >= total {
            return Ok(DecodeStatus::end(written));
        }
        Ok(DecodeStatus::more(written))
    }
}

/// Sine generator, optionally of fixed length.
#[derive(Debug, Clone)]
pub struct ToneDecoder {
    format: AudioFormat,
    frequency: f32,
    amplitude: f32,
    phase: f32,
    remaining: Option<u64>,
}

impl ToneDecoder {
    /// Endless tone.
    pub fn new(format: AudioFormat, frequency: f32, amplitude: f32) -> Self {
        Self {
            format,
            frequency,
            amplitude,
            phase: 0.0,
            remaining: None,
        }
    }

    /// Tone that ends after `seconds`.
    pub fn with_duration(mut self, seconds: f64) -> Self {
        let frames = (seconds.max(0.0) * self.format.sample_rate as f64).round() as u64;
        self.remaining = Some(frames);
        self
    }

    /// Frames left before end of stream, if bounded.
    pub fn remaining_frames(&self) -> Option<u64> {
        self.remaining
    }
}

impl Decoder for ToneDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, out: &mut [f32]) -> Result<DecodeStatus> {
        let channels = self.format.channels as usize;
        if channels == 0 {
            return Ok(DecodeStatus::end(0));
        }
        let mut frames = self.format.frames_in(out.len());
        if let Some(remaining) = self.remaining {
            frames = frames.min(remaining as usize);
        }

        let step = std::f32::consts::TAU * self.frequency / self.format.sample_rate as f32;
        for frame in out.chunks_exact_mut(channels).take(frames) {
            let value = self.phase.sin() * self.amplitude;
            frame.fill(value);
            self.phase = (self.phase + step) % std::f32::consts::TAU;
        }

        match self.remaining.as_mut() {
            Some(remaining) => {
                *remaining -= frames as u64;
                if *remaining == 0 {
                    Ok(DecodeStatus::end(frames))
                } else {
                    Ok(DecodeStatus::more(frames))
                }
            }
            None => Ok(DecodeStatus::more(frames)),
        }
    }
}
