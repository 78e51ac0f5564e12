use crate::audio_codec::AudioBuffer;
use crate::playback::VoiceAnalyser;
use std::sync::Arc;

/// Handle to a buffer started on an [`AudioOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u64);

/// A clocked output that plays buffers at absolute times on its timeline.
#[cfg_attr(test, mockall::automock)]
pub trait AudioOutput: Send {
    /// Current position of the output clock, in seconds.
    fn current_time(&self) -> f64;

    /// Starts `buffer` at timeline position `at`. Everything played from it
    /// is also fed to `analyser`.
    fn start(&mut self, buffer: Arc<AudioBuffer>, at: f64, analyser: Arc<VoiceAnalyser>)
    -> SourceId;

    /// Stops a source. Unknown or finished ids are ignored.
    fn stop(&mut self, id: SourceId);
}
