//! Process-wide sound subsystem.
//!
//! Owns the one mixer the audio driver renders from, together with the
//! "set up" and "broken" flags. Nothing plays until [`SoundSystem::init`]
//! has run, and [`SoundSystem::shutdown`] returns the process to that state.

use crate::channel::ChannelHandle;
use crate::decoder::Decoder;
use crate::events::RetiredChannel;
use crate::mixer::SoundMixer;
use parking_lot::RwLock;
use soundmix_core::{MixerConfig, Result, SoundError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

static SYSTEM: RwLock<Option<SoundSystem>> = parking_lot::const_rwlock(None);

/// The sound subsystem singleton.
pub struct SoundSystem {
    mixer: Arc<SoundMixer>,
    broken: AtomicBool,
}

impl SoundSystem {
    /// Build the mixer and install the subsystem.
    pub fn init(config: &MixerConfig) -> Result<Arc<SoundMixer>> {
        let mut system = SYSTEM.write();
        if system.is_some() {
            return Err(SoundError::AlreadyInitialized);
        }
        let mixer = Arc::new(SoundMixer::new(config)?);
        *system = Some(SoundSystem {
            mixer: Arc::clone(&mixer),
            broken: AtomicBool::new(false),
        });
        info!("Sound system initialized");
        Ok(mixer)
    }

    /// Tear the subsystem down, finalizing every channel still connected.
    ///
    /// Stop the output driver first: this waits on each slot in turn.
    pub fn shutdown() -> Result<Vec<RetiredChannel>> {
        let system = SYSTEM.write().take().ok_or(SoundError::NotInitialized)?;
        let retired = system.mixer.disconnect_all();
        info!("Sound system shut down, {} channels released", retired.len());
        Ok(retired)
    }

    /// The subsystem's mixer.
    pub fn mixer() -> Result<Arc<SoundMixer>> {
        SYSTEM
            .read()
            .as_ref()
            .map(|system| Arc::clone(&system.mixer))
            .ok_or(SoundError::NotInitialized)
    }

    /// Whether [`init`](Self::init) has run without a matching shutdown.
    pub fn is_set_up() -> bool {
        SYSTEM.read().is_some()
    }

    /// Whether the output path has failed since setup.
    pub fn is_broken() -> bool {
        SYSTEM
            .read()
            .as_ref()
            .is_some_and(|system| system.broken.load(Ordering::Acquire))
    }

    /// Record an unrecoverable output failure. Later `play` calls fail.
    pub fn mark_broken(reason: &str) {
        if let Some(system) = SYSTEM.read().as_ref() {
            if !system.broken.swap(true, Ordering::AcqRel) {
                error!("Sound system broken: {}", reason);
            }
        }
    }

    /// Play `decoder` on the subsystem's mixer.
    pub fn play<D: Decoder + 'static>(decoder: D) -> Result<ChannelHandle> {
        let mixer = {
            let system = SYSTEM.read();
            let system = system.as_ref().ok_or(SoundError::NotInitialized)?;
            if system.broken.load(Ordering::Acquire) {
                return Err(SoundError::Device("sound system is broken".into()));
            }
            Arc::clone(&system.mixer)
        };
        mixer.play(decoder)
    }
}
