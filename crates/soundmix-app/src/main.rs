//! soundmix - channel mixer demo
//!
//! Usage: `soundmix [config.json] [seconds] [--live]`
//!
//! Without `--live` the mixer is rendered offline as fast as possible and a
//! level summary is printed. `--live` plays through the default output
//! device (requires the `cpal-output` feature).

use anyhow::{Context, Result};
use soundmix_audio::{
    BufferedDecoder, ChannelHandle, MixerEventKind, RenderContext, SoundMixer, SoundSystem,
    ToneDecoder,
};
use soundmix_core::{AudioFormat, MixerConfig};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Frames rendered per simulated driver callback.
const BLOCK_FRAMES: usize = 512;

struct Options {
    config: Option<PathBuf>,
    seconds: f64,
    live: bool,
}

impl Options {
    fn from_args() -> Self {
        let mut options = Self {
            config: None,
            seconds: 2.0,
            live: false,
        };
        for arg in std::env::args().skip(1) {
            if arg == "--live" {
                options.live = true;
            } else if let Ok(seconds) = arg.parse::<f64>() {
                options.seconds = seconds.max(0.0);
            } else {
                options.config = Some(PathBuf::from(arg));
            }
        }
        options
    }
}

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = Options::from_args();
    let config = match &options.config {
        Some(path) => MixerConfig::load(path)
            .with_context(|| format!("loading mixer config {}", path.display()))?,
        None => MixerConfig::default(),
    };

    info!("soundmix starting ({})", config.format());
    let mixer = SoundSystem::init(&config)?;

    let result = if options.live {
        run_live(&mixer, options.seconds)
    } else {
        run_offline(&mixer, options.seconds)
    };

    SoundSystem::shutdown()?;
    result
}

/// Three sine voices of an A major chord.
fn start_chord(mixer: &SoundMixer, seconds: f64) -> Result<Vec<ChannelHandle>> {
    let format = mixer.format();
    [220.0, 277.18, 329.63]
        .into_iter()
        .enumerate()
        .map(|(i, freq)| {
            let handle = mixer.play(ToneDecoder::new(format, freq, 0.2).with_duration(seconds))?;
            handle.set_pan(i as f32 - 1.0);
            Ok(handle)
        })
        .collect()
}

/// A looping click track: 5 ms of signal every 250 ms.
fn click_track(format: AudioFormat) -> BufferedDecoder {
    let period = format.sample_rate as usize / 4;
    let click = format.sample_rate as usize / 200;
    let samples: Vec<f32> = (0..period)
        .flat_map(|frame| {
            let value = if frame < click { 0.5 } else { 0.0 };
            std::iter::repeat(value).take(format.channels as usize)
        })
        .collect();
    BufferedDecoder::new(format, samples).looping(true)
}

fn service(mixer: &SoundMixer) {
    for event in mixer.drain_events() {
        if let MixerEventKind::Retired(reason) = event.kind {
            info!("Channel {} left slot {} ({})", event.channel_id, event.slot, reason);
        }
    }
    for retired in mixer.reap() {
        info!(
            "Channel {} finalized ({}), now {}",
            retired.channel.id(),
            retired.reason,
            retired.channel.state()
        );
    }
}

fn run_offline(mixer: &SoundMixer, seconds: f64) -> Result<()> {
    let format = mixer.format();
    let total_frames = (seconds * format.sample_rate as f64) as u64;
    let block = BLOCK_FRAMES.min(mixer.max_frames_per_slice());

    start_chord(mixer, seconds * 0.75)?;
    let click = mixer.play(click_track(format))?;

    let mut ctx = RenderContext::new(0, 0);
    let mut out = vec![0.0f32; format.samples_for(block)];
    let mut rendered = 0u64;
    let mut peak = 0.0f32;
    let mut sum_squares = 0.0f64;

    while rendered < total_frames {
        let frames = block.min((total_frames - rendered) as usize);
        ctx.advance(frames);
        mixer.render(&mut ctx, &mut out[..format.samples_for(frames)]);

        for &s in &out[..format.samples_for(frames)] {
            peak = peak.max(s.abs());
            sum_squares += (s as f64) * (s as f64);
        }
        rendered += frames as u64;

        if rendered >= total_frames / 2 && mixer.is_connected(&click) {
            click.stop()?;
        }
        service(mixer);
    }

    let samples = format.samples_for(rendered as usize).max(1);
    let rms = (sum_squares / samples as f64).sqrt();
    let stats = mixer.stats();
    info!(
        "Rendered {:.2}s: peak {:.3}, rms {:.3}, {} callbacks, {} clipped samples",
        format.duration_seconds(rendered),
        peak,
        rms,
        stats.callbacks,
        stats.clipped_samples
    );
    if stats.dropped_events > 0 {
        warn!("{} mixer events were dropped", stats.dropped_events);
    }
    Ok(())
}

#[cfg(feature = "cpal-output")]
fn run_live(mixer: &std::sync::Arc<SoundMixer>, seconds: f64) -> Result<()> {
    use soundmix_audio::OutputStream;
    use std::time::{Duration, Instant};

    let stream = OutputStream::open_default(std::sync::Arc::clone(mixer))?;
    info!("Playing on {}", stream.device_name());
    start_chord(mixer, seconds)?;

    let deadline = Instant::now() + Duration::from_secs_f64(seconds);
    while Instant::now() < deadline && !SoundSystem::is_broken() {
        std::thread::sleep(Duration::from_millis(50));
        service(mixer);
    }
    drop(stream);
    Ok(())
}

#[cfg(not(feature = "cpal-output"))]
fn run_live(_mixer: &std::sync::Arc<SoundMixer>, _seconds: f64) -> Result<()> {
    anyhow::bail!("live output needs the `cpal-output` feature")
}
