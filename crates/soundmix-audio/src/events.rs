//! Notifications from the audio thread to control threads.
//!
//! The render path never returns errors. It queues a [`MixerEvent`] with a
//! non-blocking send instead, and the control side drains the queue.

use crate::channel::SoundChannel;
use soundmix_core::SoundError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why a channel left the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetireReason {
    /// The decoder hit end of stream.
    Exhausted,
    /// A control thread asked the channel to stop.
    Stopped,
    /// A control thread disconnected the channel.
    Disconnected,
    /// The channel's render failed.
    Failed,
}

impl fmt::Display for RetireReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exhausted => "exhausted",
            Self::Stopped => "stopped",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What happened to a channel.
#[derive(Debug)]
pub enum MixerEventKind {
    /// The channel's render returned an error and was excluded from mixing.
    RenderFailed(SoundError),
    /// The channel left its slot.
    Retired(RetireReason),
}

/// One notification, tagged with the channel and slot it concerns.
#[derive(Debug)]
pub struct MixerEvent {
    pub channel_id: u64,
    pub slot: usize,
    pub kind: MixerEventKind,
}

/// A channel removed from the mixer and finalized on a control thread.
#[derive(Debug)]
pub struct RetiredChannel {
    /// The channel, back in `Idle` once reaped.
    pub channel: SoundChannel,
    /// Slot it occupied.
    pub slot: usize,
    /// Why it was removed.
    pub reason: RetireReason,
}

/// Running totals kept by the mixer.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub callbacks: AtomicU64,
    pub frames: AtomicU64,
    pub skipped_channels: AtomicU64,
    pub clipped_samples: AtomicU64,
    pub dropped_events: AtomicU64,
    pub failed_renders: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> MixerStats {
        MixerStats {
            callbacks: self.callbacks.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            skipped_channels: self.skipped_channels.load(Ordering::Relaxed),
            clipped_samples: self.clipped_samples.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            failed_renders: self.failed_renders.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the mixer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MixerStats {
    /// Render callbacks serviced.
    pub callbacks: u64,
    /// Output frames produced.
    pub frames: u64,
    /// Channel renders skipped because the slot was busy.
    pub skipped_channels: u64,
    /// Output samples altered by clipping.
    pub clipped_samples: u64,
    /// Events lost to a full queue.
    pub dropped_events: u64,
    /// Channel renders that returned an error.
    pub failed_renders: u64,
}
