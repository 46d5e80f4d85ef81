//! Sound system lifecycle driven through the global entry points.
//!
//! The subsystem is process-wide, so this module keeps to a single test.

use soundmix_audio::{RenderContext, SoundSystem, ToneDecoder};
use soundmix_core::{MixerConfig, SoundError};

#[test]
fn system_plays_until_shutdown() {
    let config = MixerConfig::from_json_str(r#"{ "capacity": 2, "master_gain": 0.5 }"#).unwrap();
    let mixer = SoundSystem::init(&config).unwrap();
    let format = mixer.format();

    let a = SoundSystem::play(ToneDecoder::new(format, 440.0, 0.5)).unwrap();
    SoundSystem::play(ToneDecoder::new(format, 660.0, 0.5).with_duration(0.001)).unwrap();
    assert!(matches!(
        SoundSystem::play(ToneDecoder::new(format, 880.0, 0.5)),
        Err(SoundError::CapacityExceeded { capacity: 2 })
    ));

    let mut ctx = RenderContext::new(0, 0);
    let mut out = vec![0.0f32; format.samples_for(256)];
    ctx.advance(256);
    mixer.render(&mut ctx, &mut out);
    assert!(out.iter().all(|&s| s.abs() <= 0.5));

    // The short tone ran out and its slot is free again
    assert_eq!(mixer.reap().len(), 1);
    assert_eq!(mixer.active_count(), 1);

    let retired = SoundSystem::shutdown().unwrap();
    assert_eq!(retired.len(), 1);
    assert!(a.is_finished());
    assert!(!SoundSystem::is_set_up());
    assert!(matches!(SoundSystem::mixer(), Err(SoundError::NotInitialized)));
}
