//! Integration tests for mixing and the channel lifecycle.

use soundmix_audio::{
    BufferedDecoder, ChannelState, DecodeStatus, Decoder, MixerEventKind, RenderContext,
    RenderStatus, RetireReason, SoundChannel, SoundMixer, ToneDecoder,
};
use soundmix_core::{AudioFormat, ClipPolicy, MixerConfig, PanLaw, Result, SoundError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

fn mixer(capacity: usize) -> SoundMixer {
    SoundMixer::new(&MixerConfig {
        capacity,
        max_frames_per_slice: 128,
        ..Default::default()
    })
    .unwrap()
}

fn render(mixer: &SoundMixer, ctx: &mut RenderContext, frames: usize) -> Vec<f32> {
    ctx.advance(frames);
    let mut out = vec![0.0f32; frames * 2];
    mixer.render(ctx, &mut out);
    out
}

/// Decoder that records reads made after it was released.
struct TrackedDecoder {
    format: AudioFormat,
    remaining: usize,
    released: Arc<AtomicBool>,
    late_reads: Arc<AtomicUsize>,
}

impl Decoder for TrackedDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, out: &mut [f32]) -> Result<DecodeStatus> {
        if self.released.load(Ordering::SeqCst) {
            self.late_reads.fetch_add(1, Ordering::SeqCst);
        }
        let frames = self.format.frames_in(out.len()).min(self.remaining);
        out[..self.format.samples_for(frames)].fill(0.1);
        self.remaining -= frames;
        if self.remaining == 0 {
            Ok(DecodeStatus::end(frames))
        } else {
            Ok(DecodeStatus::more(frames))
        }
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

fn tracked(remaining: usize) -> (TrackedDecoder, Arc<AtomicBool>, Arc<AtomicUsize>) {
    let released = Arc::new(AtomicBool::new(false));
    let late_reads = Arc::new(AtomicUsize::new(0));
    let decoder = TrackedDecoder {
        format: AudioFormat::STEREO_44K,
        remaining,
        released: Arc::clone(&released),
        late_reads: Arc::clone(&late_reads),
    };
    (decoder, released, late_reads)
}

#[test]
fn channel_walks_full_lifecycle() {
    let mixer = mixer(4);
    let mut channel = SoundChannel::new(BufferedDecoder::new(
        AudioFormat::STEREO_44K,
        vec![0.5f32; 200],
    ));
    assert_eq!(channel.state(), ChannelState::Idle);

    mixer.prepare(&mut channel).unwrap();
    assert_eq!(channel.state(), ChannelState::Preparing);
    assert!(channel.playback().is_some());

    let handle = mixer.connect_channel(channel).unwrap();
    assert_eq!(handle.state(), ChannelState::Playing);

    handle.stop().unwrap();
    assert_eq!(handle.state(), ChannelState::Stopping);

    let mut ctx = RenderContext::new(0, 0);
    render(&mixer, &mut ctx, 64);
    let reaped = mixer.reap();
    assert_eq!(reaped.len(), 1);
    assert_eq!(handle.state(), ChannelState::Idle);
    assert!(handle.is_finished());

    // A finalized channel can be prepared and played again
    let mut channel = reaped.into_iter().next().unwrap().channel;
    assert!(channel.link().is_none());
    assert!(channel.playback().is_none());
    mixer.prepare(&mut channel).unwrap();
    let again = mixer.connect_channel(channel).unwrap();
    assert!(mixer.is_connected(&again));
}

#[test]
fn failed_negotiation_leaves_channel_idle() {
    let mixer = mixer(2);
    let mut channel = SoundChannel::new(ToneDecoder::new(AudioFormat::STEREO_48K, 440.0, 0.5));
    let err = mixer.prepare(&mut channel).unwrap_err();
    assert!(matches!(err, SoundError::FormatNegotiationFailed(_)));
    assert_eq!(channel.state(), ChannelState::Idle);
    assert!(channel.playback().is_none());
}

#[test]
fn preparing_twice_is_rejected() {
    let mixer = mixer(2);
    let mut channel = SoundChannel::new(ToneDecoder::new(AudioFormat::STEREO_44K, 440.0, 0.5));
    mixer.prepare(&mut channel).unwrap();
    assert!(matches!(
        mixer.prepare(&mut channel),
        Err(SoundError::InvalidStateTransition {
            from: "Preparing",
            to: "Preparing"
        })
    ));
}

#[test]
fn unconnected_prepared_channel_can_be_stopped() {
    let (decoder, released, _) = tracked(1000);
    let mut channel = SoundChannel::new(decoder);
    channel
        .prepare_to_play(AudioFormat::STEREO_44K, 128)
        .unwrap();
    channel.stop().unwrap();
    assert_eq!(channel.state(), ChannelState::Idle);
    assert!(released.load(Ordering::SeqCst));
}

#[test]
fn connect_fails_once_every_slot_is_taken() {
    let mixer = mixer(5);
    let handles: Vec<_> = (0..5)
        .map(|_| {
            mixer
                .play(ToneDecoder::new(AudioFormat::STEREO_44K, 220.0, 0.1))
                .unwrap()
        })
        .collect();
    let err = mixer
        .play(ToneDecoder::new(AudioFormat::STEREO_44K, 220.0, 0.1))
        .unwrap_err();
    assert!(matches!(err, SoundError::CapacityExceeded { capacity: 5 }));

    mixer.disconnect_channel(&handles[2]).unwrap();
    assert!(mixer
        .play(ToneDecoder::new(AudioFormat::STEREO_44K, 220.0, 0.1))
        .is_ok());
}

#[test]
fn two_half_scale_channels_mix_to_full_scale() {
    let mixer = mixer(4);
    for _ in 0..2 {
        let source = BufferedDecoder::new(AudioFormat::STEREO_44K, vec![0.5f32; 64]).looping(true);
        mixer.play(source).unwrap();
    }
    let mut ctx = RenderContext::new(0, 0);
    let out = render(&mixer, &mut ctx, 256);
    assert!(out.iter().all(|&s| (s - 1.0).abs() < 1e-6));
    assert_eq!(ctx.clipped_samples, 0);
    assert!(!ctx.output_is_silence);
}

#[test]
fn constant_power_pan_attenuates_center() {
    let mixer = SoundMixer::new(&MixerConfig {
        pan_law: PanLaw::ConstantPower,
        clip: ClipPolicy::None,
        ..Default::default()
    })
    .unwrap();
    let source = BufferedDecoder::new(AudioFormat::STEREO_44K, vec![1.0f32; 2]).looping(true);
    mixer.play(source).unwrap();

    let mut ctx = RenderContext::new(0, 0);
    let out = render(&mixer, &mut ctx, 4);
    let expected = std::f32::consts::FRAC_1_SQRT_2;
    assert!(out.iter().all(|&s| (s - expected).abs() < 1e-5));
}

#[test]
fn end_of_stream_is_padded_with_silence() {
    let mixer = mixer(2);
    let handle = mixer
        .play(BufferedDecoder::new(AudioFormat::STEREO_44K, vec![0.25f32; 2 * 100]))
        .unwrap();

    let mut ctx = RenderContext::new(0, 0);
    let out = render(&mixer, &mut ctx, 256);
    assert!(out[..200].iter().all(|&s| s == 0.25));
    assert!(out[200..].iter().all(|&s| s == 0.0));
    assert!(handle.is_exhausted());

    let events = mixer.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e.kind, MixerEventKind::Retired(RetireReason::Exhausted))));
    assert_eq!(mixer.reap().len(), 1);

    let out = render(&mixer, &mut ctx, 64);
    assert!(out.iter().all(|&s| s == 0.0));
    assert!(ctx.output_is_silence);
}

#[test]
fn mono_source_plays_on_both_sides() {
    let mixer = mixer(2);
    let source = BufferedDecoder::new(AudioFormat::new(44_100, 1), vec![0.4f32; 8]).looping(true);
    mixer.play(source).unwrap();

    let mut ctx = RenderContext::new(0, 0);
    let out = render(&mixer, &mut ctx, 32);
    assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6));
}

#[test]
fn render_context_tracks_sample_time() {
    let mixer = mixer(1);
    let mut ctx = RenderContext::new(0, 0);
    for _ in 0..4 {
        render(&mixer, &mut ctx, 100);
    }
    assert_eq!(ctx.sample_time, 300);
    assert_eq!(ctx.frame_count, 100);
    assert_eq!(mixer.stats().frames, 400);
    assert_eq!(mixer.stats().callbacks, 4);
}

#[test]
fn decoder_is_never_read_after_release() {
    let mixer = mixer(8);
    let mut probes = Vec::new();
    for i in 0..6 {
        let (decoder, released, late) = tracked(50 + i * 40);
        let handle = mixer.play(decoder).unwrap();
        probes.push((handle, released, late));
    }
    probes[0].0.stop().unwrap();
    mixer.disconnect_channel(&probes[1].0).unwrap();

    let mut ctx = RenderContext::new(0, 0);
    for _ in 0..8 {
        render(&mixer, &mut ctx, 64);
        mixer.reap();
    }
    mixer.disconnect_all();

    for (handle, released, late) in &probes {
        assert!(handle.is_finished());
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(late.load(Ordering::SeqCst), 0);
    }
}

#[test]
fn render_status_reflects_activity() {
    let mixer = mixer(2);
    let mut ctx = RenderContext::new(32, 0);
    let mut out = vec![0.0f32; 64];
    assert_eq!(mixer.render(&mut ctx, &mut out), RenderStatus::Silence);

    mixer
        .play(ToneDecoder::new(AudioFormat::STEREO_44K, 440.0, 0.5))
        .unwrap();
    ctx.advance(32);
    assert_eq!(mixer.render(&mut ctx, &mut out), RenderStatus::Mixed);
    assert!(out.iter().any(|&s| s != 0.0));
}

#[test]
fn config_file_drives_mixer_setup() {
    let path = std::env::temp_dir().join(format!("soundmix-config-{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{ "capacity": 3, "sample_rate": 48000, "channels": 1, "clip": { "mode": "none" } }"#,
    )
    .unwrap();

    let config = MixerConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(config.capacity, 3);
    assert_eq!(config.clip, ClipPolicy::None);

    let mixer = SoundMixer::new(&config).unwrap();
    assert_eq!(mixer.capacity(), 3);
    assert_eq!(mixer.format(), AudioFormat::new(48_000, 1));
}

#[test]
fn missing_config_file_is_io_error() {
    let path = std::env::temp_dir().join("soundmix-does-not-exist.json");
    assert!(matches!(MixerConfig::load(path), Err(SoundError::Io(_))));
}
