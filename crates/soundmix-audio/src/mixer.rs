//! Sound mixer: sums a fixed pool of channels into one output stream.
//!
//! Each slot pairs an atomic occupancy flag with a mutex around the channel.
//! Control threads reserve slots with a compare-exchange and lock only
//! briefly; the audio thread only ever `try_lock`s and skips a busy slot for
//! one block rather than wait. Channels leaving the active set are handed to
//! the control side through a bounded queue, so buffers are never freed on
//! the audio thread. The same holds for render errors: when the event queue
//! is full the error is parked on its channel and freed when it is reaped.

use crate::channel::{ChannelHandle, ChannelState, MixerLink, SoundChannel};
use crate::context::RenderContext;
use crate::decoder::Decoder;
use crate::events::{
    MixerEvent, MixerEventKind, MixerStats, RetireReason, RetiredChannel, StatsCounters,
};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use soundmix_core::{AudioFormat, ClipPolicy, MixerConfig, PanLaw, Result, SoundError};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tracing::{debug, info, warn};

static NEXT_MIXER_ID: AtomicU64 = AtomicU64::new(1);

/// Outcome of [`SoundMixer::disconnect_channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectStatus {
    /// Removed and finalized; collect it with [`SoundMixer::reap`].
    Disconnected,
    /// The audio thread was rendering it. It leaves at the end of that block.
    Deferred,
}

/// Outcome of one [`SoundMixer::render`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// At least one channel was mixed.
    Mixed,
    /// Nothing played; the output is all zeros.
    Silence,
}

struct Slot {
    occupied: AtomicBool,
    channel_id: AtomicU64,
    disconnect_request: AtomicU64,
    channel: Mutex<Option<SoundChannel>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            occupied: AtomicBool::new(false),
            channel_id: AtomicU64::new(0),
            disconnect_request: AtomicU64::new(0),
            channel: Mutex::new(None),
        }
    }

    /// Mark the slot free. Caller has already taken the channel out.
    fn release(&self) {
        self.channel_id.store(0, Ordering::Release);
        self.disconnect_request.store(0, Ordering::Release);
        self.occupied.store(false, Ordering::Release);
    }
}

/// Fixed-capacity channel mixer.
pub struct SoundMixer {
    id: u64,
    format: AudioFormat,
    max_frames: usize,
    clip: ClipPolicy,
    pan_law: PanLaw,
    master_gain: AtomicU32,
    slots: Box<[Slot]>,
    retired_tx: Sender<RetiredChannel>,
    retired_rx: Receiver<RetiredChannel>,
    events_tx: Sender<MixerEvent>,
    events_rx: Receiver<MixerEvent>,
    reaped: Mutex<Vec<RetiredChannel>>,
    stats: StatsCounters,
}

impl SoundMixer {
    /// Create a mixer from a validated configuration.
    pub fn new(config: &MixerConfig) -> Result<Self> {
        config.validate()?;
        let (retired_tx, retired_rx) = crossbeam_channel::bounded(config.capacity);
        let (events_tx, events_rx) = crossbeam_channel::bounded(config.event_queue_capacity);
        let id = NEXT_MIXER_ID.fetch_add(1, Ordering::Relaxed);

        info!(
            "Mixer {} ready: {} channels, {}, {} frames per slice",
            id,
            config.capacity,
            config.format(),
            config.max_frames_per_slice
        );

        Ok(Self {
            id,
            format: config.format(),
            max_frames: config.max_frames_per_slice,
            clip: config.clip,
            pan_law: config.pan_law,
            master_gain: AtomicU32::new(config.master_gain.to_bits()),
            slots: (0..config.capacity).map(|_| Slot::new()).collect(),
            retired_tx,
            retired_rx,
            events_tx,
            events_rx,
            reaped: Mutex::new(Vec::new()),
            stats: StatsCounters::default(),
        })
    }

    /// Process-unique mixer id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Output format, fixed at setup.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Number of channel slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Largest block a channel renders in one pull.
    pub fn max_frames_per_slice(&self) -> usize {
        self.max_frames
    }

    /// Slots currently holding a channel.
    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.occupied.load(Ordering::Acquire))
            .count()
    }

    /// Whether `handle` still refers to a channel in this mixer.
    pub fn is_connected(&self, handle: &ChannelHandle) -> bool {
        let link = handle.link();
        link.mixer_id == self.id
            && self
                .slots
                .get(link.slot)
                .is_some_and(|slot| slot.channel_id.load(Ordering::Acquire) == handle.id())
    }

    /// Gain applied to the summed output.
    pub fn master_gain(&self) -> f32 {
        f32::from_bits(self.master_gain.load(Ordering::Relaxed))
    }

    /// Set the output gain; takes effect on the next render.
    pub fn set_master_gain(&self, gain: f32) {
        let gain = if gain.is_finite() { gain.max(0.0) } else { 0.0 };
        self.master_gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    /// Snapshot of the running counters.
    pub fn stats(&self) -> MixerStats {
        self.stats.snapshot()
    }

    /// Negotiate `channel` against this mixer's format.
    pub fn prepare(&self, channel: &mut SoundChannel) -> Result<()> {
        channel.prepare_to_play(self.format, self.max_frames)
    }

    /// Create, prepare and connect a channel for `decoder`.
    pub fn play<D: Decoder + 'static>(&self, decoder: D) -> Result<ChannelHandle> {
        let mut channel = SoundChannel::new(decoder);
        self.prepare(&mut channel)?;
        self.connect_channel(channel)
    }

    /// Add a prepared channel to the active set.
    ///
    /// Never waits for space: with every slot occupied this fails with
    /// `CapacityExceeded`. Safe to call while the audio thread renders.
    pub fn connect_channel(&self, mut channel: SoundChannel) -> Result<ChannelHandle> {
        let state = channel.state();
        if state != ChannelState::Preparing {
            return Err(SoundError::InvalidStateTransition {
                from: state.as_str(),
                to: ChannelState::Playing.as_str(),
            });
        }
        match channel.playback() {
            Some(playback) if playback.output_format() == self.format => {}
            _ => {
                return Err(SoundError::FormatNegotiationFailed(format!(
                    "channel {} was prepared for a different output format than {}",
                    channel.id(),
                    self.format
                )))
            }
        }

        let Some(index) = self.slots.iter().position(|slot| {
            slot.occupied
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        }) else {
            debug!("Mixer {} full, rejecting channel {}", self.id, channel.id());
            return Err(SoundError::CapacityExceeded {
                capacity: self.slots.len(),
            });
        };

        let slot = &self.slots[index];
        if let Err(e) = channel
            .shared()
            .transition(ChannelState::Preparing, ChannelState::Playing)
        {
            slot.release();
            return Err(e);
        }

        let link = MixerLink {
            mixer_id: self.id,
            slot: index,
        };
        channel.set_link(Some(link));
        let handle = channel.handle(link);
        let channel_id = channel.id();
        {
            // Publish the id before the channel is visible to the audio thread
            let mut guard = slot.channel.lock();
            slot.channel_id.store(channel_id, Ordering::Release);
            *guard = Some(channel);
        }

        debug!("Connected channel {} to mixer {} slot {}", channel_id, self.id, index);
        Ok(handle)
    }

    /// Remove a channel from the active set.
    ///
    /// If the audio thread is rendering the channel right now, the request is
    /// recorded and the channel leaves when that block completes.
    pub fn disconnect_channel(&self, handle: &ChannelHandle) -> Result<DisconnectStatus> {
        if !self.is_connected(handle) {
            return Err(SoundError::NotConnected);
        }
        let index = handle.link().slot;
        let slot = &self.slots[index];

        let Some(mut guard) = slot.channel.try_lock() else {
            slot.disconnect_request.store(handle.id(), Ordering::Release);
            debug!("Channel {} busy, disconnect deferred", handle.id());
            return Ok(DisconnectStatus::Deferred);
        };
        let channel = match guard.take() {
            Some(channel) if channel.id() == handle.id() => channel,
            other => {
                *guard = other;
                return Err(SoundError::NotConnected);
            }
        };
        slot.release();
        drop(guard);

        self.finalize(channel, index, RetireReason::Disconnected);
        Ok(DisconnectStatus::Disconnected)
    }

    /// Finalize every channel the audio thread has retired and return them.
    ///
    /// Deferred disconnects the audio thread has not picked up yet are
    /// serviced here too, as long as the slot is not busy.
    pub fn reap(&self) -> Vec<RetiredChannel> {
        self.service_deferred_disconnects();

        let mut reaped = std::mem::take(&mut *self.reaped.lock());
        for mut retired in self.retired_rx.try_iter() {
            if let Err(e) = retired.channel.finish_stopping() {
                warn!("Channel {} could not be finalized: {}", retired.channel.id(), e);
            }
            if let Some(error) = retired.channel.error() {
                warn!(
                    "Channel {} failed while the event queue was full: {}",
                    retired.channel.id(),
                    error
                );
            }
            debug!(
                "Reaped channel {} from slot {} ({})",
                retired.channel.id(),
                retired.slot,
                retired.reason
            );
            reaped.push(retired);
        }
        reaped
    }

    /// Drain pending notifications from the audio thread.
    pub fn drain_events(&self) -> Vec<MixerEvent> {
        let events: Vec<MixerEvent> = self.events_rx.try_iter().collect();
        for event in &events {
            if let MixerEventKind::RenderFailed(error) = &event.kind {
                warn!(
                    "Channel {} in slot {} dropped after render failure: {}",
                    event.channel_id, event.slot, error
                );
            }
        }
        events
    }

    /// Take every channel out of the mixer and finalize it.
    ///
    /// Blocks on each slot, so call it once the driver has stopped rendering.
    pub fn disconnect_all(&self) -> Vec<RetiredChannel> {
        for (index, slot) in self.slots.iter().enumerate() {
            let mut guard = slot.channel.lock();
            let Some(channel) = guard.take() else {
                continue;
            };
            slot.release();
            drop(guard);
            self.finalize(channel, index, RetireReason::Disconnected);
        }
        let reaped = self.reap();
        info!("Mixer {} disconnected {} channels", self.id, reaped.len());
        reaped
    }

    /// Mix every active channel into `output` (interleaved, mixer format).
    ///
    /// Real-time safe: no allocation, no blocking, no logging. Per-channel
    /// failures are queued as events; the call itself cannot fail.
    pub fn render(&self, ctx: &mut RenderContext, output: &mut [f32]) -> RenderStatus {
        let channels = self.format.channels as usize;
        let frames = ctx.frame_count.min(self.format.frames_in(output.len()));
        output.fill(0.0);
        let out = &mut output[..frames * channels];

        ctx.rendered_channels = 0;
        ctx.skipped_channels = 0;
        ctx.clipped_samples = 0;

        for (index, slot) in self.slots.iter().enumerate() {
            if !slot.occupied.load(Ordering::Acquire) {
                continue;
            }
            let Some(mut guard) = slot.channel.try_lock() else {
                ctx.skipped_channels += 1;
                continue;
            };
            let Some(channel) = guard.as_mut() else {
                continue;
            };

            if let Some(reason) = Self::pending_retirement(slot, channel) {
                self.retire(index, slot, &mut guard, reason);
                continue;
            }
            if self.mix_channel(index, channel, ctx, out, frames) {
                ctx.rendered_channels += 1;
            }
            if let Some(reason) = Self::pending_retirement(slot, channel) {
                self.retire(index, slot, &mut guard, reason);
            }
        }

        ctx.clipped_samples = self.apply_master(out);
        ctx.output_is_silence = ctx.rendered_channels == 0;

        self.stats.callbacks.fetch_add(1, Ordering::Relaxed);
        StatsCounters::add(&self.stats.frames, frames as u64);
        StatsCounters::add(&self.stats.skipped_channels, ctx.skipped_channels as u64);
        StatsCounters::add(&self.stats.clipped_samples, ctx.clipped_samples as u64);

        if ctx.output_is_silence {
            RenderStatus::Silence
        } else {
            RenderStatus::Mixed
        }
    }

    fn pending_retirement(slot: &Slot, channel: &SoundChannel) -> Option<RetireReason> {
        if channel.is_failed() {
            Some(RetireReason::Failed)
        } else if channel.is_exhausted() {
            Some(RetireReason::Exhausted)
        } else if slot.disconnect_request.load(Ordering::Acquire) == channel.id() {
            Some(RetireReason::Disconnected)
        } else if channel.state() != ChannelState::Playing {
            Some(RetireReason::Stopped)
        } else {
            None
        }
    }

    /// Render one channel in slice-sized pieces and add it to `out`.
    ///
    /// Stops pulling as soon as the channel leaves `Playing`, so a stop that
    /// lands between slices is not a failure. A decoder error drops the
    /// channel from that slice on. Returns whether any samples were summed.
    fn mix_channel(
        &self,
        index: usize,
        channel: &mut SoundChannel,
        ctx: &RenderContext,
        out: &mut [f32],
        frames: usize,
    ) -> bool {
        let channels = self.format.channels as usize;
        let (left, right) = if channels == 2 {
            self.pan_law.stereo_gain(channel.gain(), channel.pan())
        } else {
            (channel.gain(), channel.gain())
        };

        let mut offset = 0;
        while offset < frames && channel.state() == ChannelState::Playing {
            let error = match channel.render(ctx, frames - offset) {
                Ok(block) => {
                    let rendered = block.samples.len() / channels;
                    if rendered == 0 {
                        break;
                    }
                    let dst = &mut out[offset * channels..(offset + rendered) * channels];
                    mix_into(dst, block.samples, channels, left, right);
                    offset += rendered;
                    if block.reached_end {
                        break;
                    }
                    continue;
                }
                Err(error) => error,
            };
            // A stop landed between the state check and the pull
            if channel.state() != ChannelState::Playing {
                break;
            }

            channel.shared().mark_failed();
            StatsCounters::add(&self.stats.failed_renders, 1);
            let event = MixerEvent {
                channel_id: channel.id(),
                slot: index,
                kind: MixerEventKind::RenderFailed(error),
            };
            if let Err(overflow) = self.events_tx.try_send(event) {
                StatsCounters::add(&self.stats.dropped_events, 1);
                // Park the error on the channel so it is freed on reap
                if let MixerEventKind::RenderFailed(error) = overflow.into_inner().kind {
                    channel.set_error(error);
                }
            }
            break;
        }
        offset > 0
    }

    /// Hand the slot's channel to the control side. If the queue is full the
    /// channel stays put (already `Stopping`) and is retried next block.
    fn retire(
        &self,
        index: usize,
        slot: &Slot,
        guard: &mut Option<SoundChannel>,
        reason: RetireReason,
    ) {
        let Some(channel) = guard.take() else {
            return;
        };
        // Only Idle is rejected, and an Idle channel never sits in a slot
        let _ = channel.shared().begin_stopping();
        let channel_id = channel.id();

        match self.retired_tx.try_send(RetiredChannel {
            channel,
            slot: index,
            reason,
        }) {
            Ok(()) => {
                slot.release();
                self.send_event(channel_id, index, MixerEventKind::Retired(reason));
            }
            Err(TrySendError::Full(retired)) | Err(TrySendError::Disconnected(retired)) => {
                *guard = Some(retired.channel);
            }
        }
    }

    /// Queue a heap-free event; on overflow it is counted and dropped.
    fn send_event(&self, channel_id: u64, slot: usize, kind: MixerEventKind) {
        let event = MixerEvent {
            channel_id,
            slot,
            kind,
        };
        if self.events_tx.try_send(event).is_err() {
            StatsCounters::add(&self.stats.dropped_events, 1);
        }
    }

    /// Stop, release and park a channel removed on a control thread.
    fn finalize(&self, mut channel: SoundChannel, slot: usize, reason: RetireReason) {
        let _ = channel.shared().begin_stopping();
        if let Err(e) = channel.finish_stopping() {
            warn!("Channel {} could not be finalized: {}", channel.id(), e);
        }
        debug!("Disconnected channel {} from slot {}", channel.id(), slot);
        self.send_event(channel.id(), slot, MixerEventKind::Retired(reason));
        self.reaped.lock().push(RetiredChannel {
            channel,
            slot,
            reason,
        });
    }

    fn service_deferred_disconnects(&self) {
        for (index, slot) in self.slots.iter().enumerate() {
            let requested = slot.disconnect_request.load(Ordering::Acquire);
            if requested == 0 {
                continue;
            }
            let Some(mut guard) = slot.channel.try_lock() else {
                continue;
            };
            match guard.take() {
                Some(channel) if channel.id() == requested => {
                    slot.release();
                    drop(guard);
                    self.finalize(channel, index, RetireReason::Disconnected);
                }
                other => {
                    *guard = other;
                    // The channel already left on its own
                    let _ = slot.disconnect_request.compare_exchange(
                        requested,
                        0,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                }
            }
        }
    }

    /// Apply master gain and the clip policy. Returns the number of samples clipped.
    fn apply_master(&self, out: &mut [f32]) -> usize {
        let master = self.master_gain();
        match self.clip {
            ClipPolicy::HardClamp { limit } => {
                let mut clipped = 0;
                for s in out.iter_mut() {
                    let v = *s * master;
                    if v.abs() > limit {
                        clipped += 1;
                    }
                    *s = v.clamp(-limit, limit);
                }
                clipped
            }
            ClipPolicy::None => {
                if master != 1.0 {
                    for s in out.iter_mut() {
                        *s *= master;
                    }
                }
                0
            }
        }
    }
}

/// Add `src` into `dst` with per-side gains.
fn mix_into(dst: &mut [f32], src: &[f32], channels: usize, left: f32, right: f32) {
    if channels == 2 {
        for (d, s) in dst.chunks_exact_mut(2).zip(src.chunks_exact(2)) {
            d[0] += s[0] * left;
            d[1] += s[1] * right;
        }
    } else {
        for (d, s) in dst.iter_mut().zip(src) {
            *d += s * left;
        }
    }
}
