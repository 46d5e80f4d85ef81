//! The mixer under a rendering thread and several control threads at once.

use soundmix_audio::{
    BufferedDecoder, ChannelHandle, DecodeStatus, Decoder, RenderContext, SoundMixer,
};
use soundmix_core::{AudioFormat, MixerConfig, Result, SoundError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const CAPACITY: usize = 8;

/// Looping source that counts reads made after release.
struct Probe {
    released: bool,
    late_reads: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl Decoder for Probe {
    fn format(&self) -> AudioFormat {
        AudioFormat::STEREO_44K
    }

    fn read(&mut self, out: &mut [f32]) -> Result<DecodeStatus> {
        if self.released {
            self.late_reads.fetch_add(1, Ordering::SeqCst);
        }
        out.fill(0.01);
        Ok(DecodeStatus::more(out.len() / 2))
    }

    fn release(&mut self) {
        self.released = true;
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

fn stress_mixer() -> Arc<SoundMixer> {
    Arc::new(
        SoundMixer::new(&MixerConfig {
            capacity: CAPACITY,
            max_frames_per_slice: 256,
            event_queue_capacity: 32,
            ..Default::default()
        })
        .unwrap(),
    )
}

fn spawn_renderer(mixer: Arc<SoundMixer>, running: Arc<AtomicBool>) -> thread::JoinHandle<u64> {
    thread::spawn(move || {
        let mut ctx = RenderContext::new(0, 0);
        let mut out = vec![0.0f32; 512 * 2];
        let mut blocks = 0u64;
        while running.load(Ordering::Acquire) {
            ctx.advance(512);
            mixer.render(&mut ctx, &mut out);
            assert!(out.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
            blocks += 1;
        }
        blocks
    })
}

#[test]
fn control_threads_and_renderer_make_progress() {
    let mixer = stress_mixer();
    let running = Arc::new(AtomicBool::new(true));
    let late_reads = Arc::new(AtomicUsize::new(0));
    let releases = Arc::new(AtomicUsize::new(0));
    let handles: Arc<Mutex<Vec<ChannelHandle>>> = Arc::new(Mutex::new(Vec::new()));

    let renderer = spawn_renderer(Arc::clone(&mixer), Arc::clone(&running));

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let mixer = Arc::clone(&mixer);
            let late_reads = Arc::clone(&late_reads);
            let releases = Arc::clone(&releases);
            let handles = Arc::clone(&handles);
            thread::spawn(move || {
                let mut lingering: Option<ChannelHandle> = None;
                for round in 0..200 {
                    if let Some(previous) = lingering.take() {
                        let _ = previous.stop();
                    }
                    let probe = Probe {
                        released: false,
                        late_reads: Arc::clone(&late_reads),
                        releases: Arc::clone(&releases),
                    };
                    let handle = match mixer.play(probe) {
                        Ok(handle) => handle,
                        Err(SoundError::CapacityExceeded { capacity }) => {
                            assert_eq!(capacity, CAPACITY);
                            mixer.reap();
                            continue;
                        }
                        Err(e) => panic!("unexpected connect error: {e}"),
                    };
                    assert!(mixer.active_count() <= CAPACITY);

                    match (worker + round) % 3 {
                        0 => {
                            let _ = handle.stop();
                        }
                        1 => {
                            let _ = mixer.disconnect_channel(&handle);
                        }
                        _ => lingering = Some(handle.clone()),
                    }
                    handles.lock().unwrap().push(handle);
                    mixer.reap();
                    mixer.drain_events();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    // Let the renderer retire whatever was stopped while the workers ran
    thread::sleep(Duration::from_millis(20));
    running.store(false, Ordering::Release);
    let blocks = renderer.join().unwrap();
    assert!(blocks > 0);

    mixer.disconnect_all();
    mixer.reap();

    let handles = handles.lock().unwrap();
    assert!(!handles.is_empty());
    assert_eq!(mixer.active_count(), 0);
    for handle in handles.iter() {
        assert!(handle.is_finished(), "channel {} never finished", handle.id());
        assert!(!mixer.is_connected(handle));
    }
    // Channels rejected for capacity release on drop
    assert!(releases.load(Ordering::SeqCst) >= handles.len());
    assert_eq!(late_reads.load(Ordering::SeqCst), 0);
}

#[test]
fn async_stop_completes_while_rendering() {
    let mixer = stress_mixer();
    let running = Arc::new(AtomicBool::new(true));
    let renderer = spawn_renderer(Arc::clone(&mixer), Arc::clone(&running));

    let source = BufferedDecoder::new(AudioFormat::STEREO_44K, vec![0.2f32; 64]).looping(true);
    let handle = mixer.play(source).unwrap();
    handle.stop().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !handle.is_finished() && Instant::now() < deadline {
        mixer.reap();
        thread::sleep(Duration::from_millis(1));
    }

    running.store(false, Ordering::Release);
    renderer.join().unwrap();
    assert!(handle.is_finished());
    assert_eq!(mixer.active_count(), 0);
}

#[test]
fn disconnect_from_many_threads_resolves_once() {
    let mixer = stress_mixer();
    let source = BufferedDecoder::new(AudioFormat::STEREO_44K, vec![0.2f32; 64]).looping(true);
    let handle = mixer.play(source).unwrap();

    let outcomes: Vec<_> = (0..4)
        .map(|_| {
            let mixer = Arc::clone(&mixer);
            let handle = handle.clone();
            thread::spawn(move || mixer.disconnect_channel(&handle).is_ok())
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|t| t.join().unwrap())
        .collect();

    assert!(outcomes.iter().any(|&ok| ok));
    let reaped = mixer.reap();
    assert_eq!(reaped.len(), 1);
    assert!(handle.is_finished());
}
