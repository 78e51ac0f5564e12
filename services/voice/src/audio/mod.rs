//! Audio devices for the native client.
//!
//! cpal streams are not `Send` on every platform, so each device runs on a
//! thread of its own and only owned data crosses back into async code.

pub mod microphone;
pub mod speaker;

pub use microphone::MicrophoneUplink;
pub use speaker::{SpeakerOutput, spawn_virtual_speaker};

/// Errors raised while opening an audio device.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("No {0} device available")]
    NoDevice(&'static str),
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("Audio device error: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("Audio stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("Audio playback error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("Failed to start audio thread: {0}")]
    Thread(#[from] std::io::Error),
    #[error("Audio thread exited before the device was ready")]
    ThreadExited,
    #[error(transparent)]
    Codec(#[from] medvoice_core::audio_codec::CodecError),
}
