use crate::audio_codec::{CodecError, decode_pcm16};
use crate::playback::{AudioOutput, SourceId, VoiceAnalyser};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// A decoded frame bound to its slot on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledAudioSource {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledAudioSource {
    pub fn end(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Chains inbound audio frames back-to-back on an [`AudioOutput`].
///
/// A single cursor marks where the next frame starts. Each frame starts at
/// `max(cursor, now)` and pushes the cursor forward by its own duration, so
/// frames never overlap, never leave gaps while audio keeps arriving, and
/// never start in the past after a stall.
pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    analyser: Arc<VoiceAnalyser>,
    sources: VecDeque<ScheduledAudioSource>,
    cursor: Option<f64>,
    sample_rate: u32,
}

impl PlaybackScheduler {
    /// `sample_rate` is the rate of the PCM frames that will be enqueued.
    pub fn new(output: Box<dyn AudioOutput>, sample_rate: u32) -> Self {
        Self {
            output,
            analyser: Arc::new(VoiceAnalyser::new()),
            sources: VecDeque::new(),
            cursor: None,
            sample_rate,
        }
    }

    /// Decodes `frame` and schedules it right after the previous one.
    pub fn enqueue(&mut self, frame: &[u8]) -> Result<ScheduledAudioSource, CodecError> {
        let buffer = decode_pcm16(frame, self.sample_rate)?;
        let now = self.output.current_time();
        self.prune(now);

        let start_at = self.cursor.map_or(now, |cursor| cursor.max(now));
        let duration = buffer.duration();
        let id = self
            .output
            .start(Arc::new(buffer), start_at, self.analyser.clone());
        self.cursor = Some(start_at + duration);

        let source = ScheduledAudioSource {
            id,
            start_at,
            duration,
        };
        self.sources.push_back(source);
        Ok(source)
    }

    /// Stops every scheduled source, played or not, and resets the cursor.
    /// Returns how many sources were stopped.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.sources.len();
        for source in self.sources.drain(..) {
            self.output.stop(source.id);
        }
        self.cursor = None;
        if cancelled > 0 {
            debug!(cancelled, "Cancelled scheduled playback");
        }
        cancelled
    }

    /// Sources that had not finished as of the last enqueue.
    pub fn pending(&self) -> usize {
        self.sources.len()
    }

    pub fn scheduled(&self) -> impl Iterator<Item = &ScheduledAudioSource> {
        self.sources.iter()
    }

    /// Where the next frame would start if the output clock stood still.
    pub fn next_start(&self) -> Option<f64> {
        self.cursor
    }

    pub fn analyser(&self) -> Arc<VoiceAnalyser> {
        self.analyser.clone()
    }

    fn prune(&mut self, now: f64) {
        while self.sources.front().is_some_and(|source| source.end() <= now) {
            self.sources.pop_front();
        }
    }
}
