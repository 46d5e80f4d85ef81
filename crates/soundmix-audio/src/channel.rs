//! Sound channels: one playback slot each.
//!
//! A channel moves through `Idle -> Preparing -> Playing -> Stopping -> Idle`.
//! The state lives in an atomic shared with every [`ChannelHandle`], so a
//! control thread can watch and steer a channel the audio thread is playing.

use crate::context::{convert_channels, PlaybackContext, RenderContext};
use crate::decoder::Decoder;
use soundmix_core::{AudioFormat, Result, SoundError};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Playback state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelState {
    Idle = 0,
    Preparing = 1,
    Playing = 2,
    Stopping = 3,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Preparing,
            2 => Self::Playing,
            3 => Self::Stopping,
            _ => Self::Idle,
        }
    }

    /// State name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Preparing => "Preparing",
            Self::Playing => "Playing",
            Self::Stopping => "Stopping",
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Preparing)
                | (Self::Preparing, Self::Playing)
                | (Self::Preparing, Self::Stopping)
                | (Self::Playing, Self::Stopping)
                | (Self::Stopping, Self::Idle)
        )
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State shared between a channel and its handles.
#[derive(Debug)]
pub(crate) struct ChannelShared {
    id: u64,
    state: AtomicU8,
    gain: AtomicU32,
    pan: AtomicU32,
    exhausted: AtomicBool,
    failed: AtomicBool,
    finished: AtomicBool,
}

impl ChannelShared {
    fn new() -> Self {
        Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(ChannelState::Idle as u8),
            gain: AtomicU32::new(1.0f32.to_bits()),
            pan: AtomicU32::new(0.0f32.to_bits()),
            exhausted: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move `from -> to` if the channel is currently in `from`.
    pub(crate) fn transition(&self, from: ChannelState, to: ChannelState) -> Result<()> {
        debug_assert!(from.can_transition_to(to));
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| SoundError::InvalidStateTransition {
                from: ChannelState::from_u8(actual).as_str(),
                to: to.as_str(),
            })
    }

    /// Move to `Stopping` from `Preparing` or `Playing`.
    ///
    /// Returns `Ok(false)` if the channel was already stopping.
    pub(crate) fn begin_stopping(&self) -> Result<bool> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            match ChannelState::from_u8(current) {
                ChannelState::Stopping => return Ok(false),
                ChannelState::Preparing | ChannelState::Playing => {}
                ChannelState::Idle => {
                    return Err(SoundError::InvalidStateTransition {
                        from: ChannelState::Idle.as_str(),
                        to: ChannelState::Stopping.as_str(),
                    })
                }
            }
            match self.state.compare_exchange_weak(
                current,
                ChannelState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(true),
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    pub(crate) fn pan(&self) -> f32 {
        f32::from_bits(self.pan.load(Ordering::Relaxed))
    }

    fn set_gain(&self, gain: f32) {
        let gain = if gain.is_finite() { gain.max(0.0) } else { 0.0 };
        self.gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    fn set_pan(&self, pan: f32) {
        let pan = if pan.is_finite() { pan.clamp(-1.0, 1.0) } else { 0.0 };
        self.pan.store(pan.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

/// Where a connected channel sits. Non-owning: the mixer is named by id only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixerLink {
    /// Id of the mixer holding the channel.
    pub mixer_id: u64,
    /// Slot index within that mixer.
    pub slot: usize,
}

/// Samples produced by one channel render.
#[derive(Debug)]
pub(crate) struct RenderedBlock<'a> {
    /// Interleaved samples in the output layout, exactly the requested length.
    pub samples: &'a [f32],
    /// This render hit end of stream for the first time.
    pub reached_end: bool,
}

/// One playback slot: a decoder plus the state needed to play it.
pub struct SoundChannel {
    shared: Arc<ChannelShared>,
    decoder: Box<dyn Decoder>,
    playback: Option<PlaybackContext>,
    link: Option<MixerLink>,
    error: Option<SoundError>,
}

impl SoundChannel {
    /// Create an idle channel playing `decoder`.
    pub fn new<D: Decoder + 'static>(decoder: D) -> Self {
        Self::from_boxed(Box::new(decoder))
    }

    /// Create an idle channel from an already boxed decoder.
    pub fn from_boxed(decoder: Box<dyn Decoder>) -> Self {
        Self {
            shared: Arc::new(ChannelShared::new()),
            decoder,
            playback: None,
            link: None,
            error: None,
        }
    }

    /// Process-unique channel id.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// The decoder reached end of stream.
    pub fn is_exhausted(&self) -> bool {
        self.shared.is_exhausted()
    }

    /// A render call failed; the channel no longer mixes.
    pub fn is_failed(&self) -> bool {
        self.shared.is_failed()
    }

    /// Linear gain.
    pub fn gain(&self) -> f32 {
        self.shared.gain()
    }

    /// Set linear gain. Negative and non-finite values are treated as silence.
    pub fn set_gain(&self, gain: f32) {
        self.shared.set_gain(gain);
    }

    /// Pan position, -1.0 (left) to 1.0 (right).
    pub fn pan(&self) -> f32 {
        self.shared.pan()
    }

    /// Set pan position, clamped to [-1.0, 1.0].
    pub fn set_pan(&self, pan: f32) {
        self.shared.set_pan(pan);
    }

    /// Mixer and slot holding this channel, if connected.
    pub fn link(&self) -> Option<MixerLink> {
        self.link
    }

    /// Negotiated playback state, present from prepare until finish.
    pub fn playback(&self) -> Option<&PlaybackContext> {
        self.playback.as_ref()
    }

    /// Render error that could not be reported through the mixer's event queue.
    pub fn error(&self) -> Option<&SoundError> {
        self.error.as_ref()
    }

    /// Format the decoder delivers.
    pub fn source_format(&self) -> AudioFormat {
        self.decoder.format()
    }

    /// Negotiate the decoder against `output` and allocate render buffers.
    ///
    /// Only valid from `Idle`. On success the channel is `Preparing` and
    /// ready to connect; on a negotiation failure it stays `Idle`.
    pub fn prepare_to_play(&mut self, output: AudioFormat, max_frames: usize) -> Result<()> {
        let state = self.state();
        if state != ChannelState::Idle {
            return Err(SoundError::InvalidStateTransition {
                from: state.as_str(),
                to: ChannelState::Preparing.as_str(),
            });
        }
        let playback = PlaybackContext::negotiate(self.decoder.format(), output, max_frames)?;
        self.shared
            .transition(ChannelState::Idle, ChannelState::Preparing)?;
        self.shared.exhausted.store(false, Ordering::Release);
        self.shared.failed.store(false, Ordering::Release);
        self.shared.finished.store(false, Ordering::Release);
        self.playback = Some(playback);
        self.error = None;
        Ok(())
    }

    /// Stop a channel that is not connected to a mixer.
    ///
    /// Runs the whole `Stopping -> Idle` sequence immediately. Connected
    /// channels are stopped through [`ChannelHandle::stop`] instead.
    pub fn stop(&mut self) -> Result<()> {
        if self.link.is_some() {
            return Err(SoundError::InvalidStateTransition {
                from: self.state().as_str(),
                to: ChannelState::Stopping.as_str(),
            });
        }
        if !self.shared.begin_stopping()? {
            return Err(SoundError::InvalidStateTransition {
                from: ChannelState::Stopping.as_str(),
                to: ChannelState::Stopping.as_str(),
            });
        }
        self.finish_stopping()
    }

    /// Handle sharing this channel's state.
    pub(crate) fn handle(&self, link: MixerLink) -> ChannelHandle {
        ChannelHandle {
            shared: Arc::clone(&self.shared),
            link,
        }
    }

    pub(crate) fn shared(&self) -> &ChannelShared {
        &self.shared
    }

    pub(crate) fn set_link(&mut self, link: Option<MixerLink>) {
        self.link = link;
    }

    /// Park a render error on the channel. A channel fails at most once per
    /// playback, so this only moves; the error is freed on a control thread.
    pub(crate) fn set_error(&mut self, error: SoundError) {
        self.error = Some(error);
    }

    /// Pull `frames` frames (at most one slice) from the decoder.
    ///
    /// Short reads at end of stream are padded with silence, so the block is
    /// always `frames` frames long. Only called by the mixer while `Playing`.
    pub(crate) fn render(
        &mut self,
        ctx: &RenderContext,
        frames: usize,
    ) -> Result<RenderedBlock<'_>> {
        let state = self.shared.state();
        let Some(playback) = self.playback.as_mut().filter(|_| state == ChannelState::Playing)
        else {
            return Err(SoundError::InvalidStateTransition {
                from: state.as_str(),
                to: ChannelState::Playing.as_str(),
            });
        };

        let frames = frames.min(playback.max_frames());
        let src_channels = playback.source_format().channels as usize;
        let out_channels = playback.output_format().channels as usize;
        playback.started_at.get_or_insert(ctx.sample_time);

        let out = &mut playback.mix_buf[..frames * out_channels];
        if self.shared.is_exhausted() {
            out.fill(0.0);
            return Ok(RenderedBlock {
                samples: out,
                reached_end: false,
            });
        }

        let mut filled = 0;
        let mut end_of_stream = false;
        while filled < frames {
            let wanted = frames - filled;
            let decoded = &mut playback.decode_buf[..wanted * src_channels];
            let status = self.decoder.read(decoded)?;
            let got = status.frames.min(wanted);
            convert_channels(
                &decoded[..got * src_channels],
                &mut out[filled * out_channels..(filled + got) * out_channels],
                src_channels,
                out_channels,
            );
            filled += got;
            if status.end_of_stream {
                end_of_stream = true;
                break;
            }
            if got == 0 {
                // Underrun: pad this block, try again next callback
                break;
            }
        }
        out[filled * out_channels..].fill(0.0);
        playback.frames_rendered += filled as u64;

        let reached_end = end_of_stream && !self.shared.exhausted.swap(true, Ordering::AcqRel);
        Ok(RenderedBlock {
            samples: out,
            reached_end,
        })
    }

    /// Release playback resources and return to `Idle`.
    ///
    /// Requires `Stopping`. Taking `&mut self` means no render can be in
    /// flight on this channel.
    pub(crate) fn finish_stopping(&mut self) -> Result<()> {
        self.shared
            .transition(ChannelState::Stopping, ChannelState::Idle)?;
        self.decoder.release();
        self.playback = None;
        self.link = None;
        self.shared.finished.store(true, Ordering::Release);
        Ok(())
    }
}

impl Drop for SoundChannel {
    fn drop(&mut self) {
        if self.playback.take().is_some() {
            self.decoder.release();
        }
    }
}

impl fmt::Debug for SoundChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundChannel")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("link", &self.link)
            .field("playback", &self.playback)
            .finish_non_exhaustive()
    }
}

/// Control-side view of a connected channel.
///
/// Cheap to clone; holds no ownership of the channel or the mixer.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    shared: Arc<ChannelShared>,
    link: MixerLink,
}

impl ChannelHandle {
    /// Id of the channel.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Mixer and slot the channel was connected to.
    pub fn link(&self) -> MixerLink {
        self.link
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// The decoder reached end of stream.
    pub fn is_exhausted(&self) -> bool {
        self.shared.is_exhausted()
    }

    /// A render call failed.
    pub fn is_failed(&self) -> bool {
        self.shared.is_failed()
    }

    /// Playback resources have been released.
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    /// Linear gain.
    pub fn gain(&self) -> f32 {
        self.shared.gain()
    }

    /// Set linear gain; takes effect on the next render.
    pub fn set_gain(&self, gain: f32) {
        self.shared.set_gain(gain);
    }

    /// Pan position.
    pub fn pan(&self) -> f32 {
        self.shared.pan()
    }

    /// Set pan position; takes effect on the next render.
    pub fn set_pan(&self, pan: f32) {
        self.shared.set_pan(pan);
    }

    /// Ask the audio thread to stop this channel.
    ///
    /// Returns immediately. The audio thread retires the channel at its next
    /// callback; [`is_finished`](Self::is_finished) turns true once the mixer
    /// has been reaped.
    pub fn stop(&self) -> Result<()> {
        if self.shared.begin_stopping()? {
            Ok(())
        } else {
            Err(SoundError::InvalidStateTransition {
                from: ChannelState::Stopping.as_str(),
                to: ChannelState::Stopping.as_str(),
            })
        }
    }
}
