//! Gap-free scheduling of agent audio onto an output timeline.

pub mod analyser;
pub mod mixer;
pub mod output;
pub mod scheduler;

pub use analyser::VoiceAnalyser;
pub use mixer::{SharedMixer, TimelineMixer};
pub use output::{AudioOutput, SourceId};
pub use scheduler::{PlaybackScheduler, ScheduledAudioSource};
