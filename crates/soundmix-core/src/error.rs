//! Error types for soundmix.

use thiserror::Error;

/// Main error type for mixer and channel operations.
#[derive(Error, Debug)]
pub enum SoundError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mixer capacity exceeded ({capacity} channels)")]
    CapacityExceeded { capacity: usize },

    #[error("Format negotiation failed: {0}")]
    FormatNegotiationFailed(String),

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Channel is not connected to this mixer")]
    NotConnected,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Sound system not initialized")]
    NotInitialized,

    #[error("Sound system already initialized")]
    AlreadyInitialized,

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SoundError {
    /// True for failures raised on the render path rather than by a control call.
    pub fn is_render_failure(&self) -> bool {
        matches!(self, Self::Decoder(_))
    }
}

/// Result type alias for soundmix operations.
pub type Result<T> = std::result::Result<T, SoundError>;
