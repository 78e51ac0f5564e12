//! Real-time voice session core.
//!
//! Keeps one duplex connection to a conversational voice agent alive,
//! streams microphone audio up, schedules agent audio for gap-free
//! playback and tracks the conversation state that UI layers observe.
//!
//! - `audio_codec`: PCM16 frames to and from `f32` sample buffers, resampling.
//! - `playback`: the gap-free scheduler, its output seam, a software mixer and the analyser tap.
//! - `router`: classification of inbound frames.
//! - `state_machine`: `VoiceBotStatus` transitions and the effects they produce.
//! - `transcript`: the append-only conversation record.
//! - `functions`: the function-call seam and its exactly-once ledger.
//! - `session`: connection lifecycle and the session actor tying it all together.

pub mod audio_codec;
pub mod error;
pub mod functions;
pub mod playback;
pub mod router;
pub mod session;
pub mod state_machine;
pub mod transcript;

pub use error::SessionError;
pub use session::{SessionCommand, SessionConfig, SessionDependencies, SessionHandle, VoiceSession};
pub use state_machine::VoiceBotStatus;
