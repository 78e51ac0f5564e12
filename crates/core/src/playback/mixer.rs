//! A software output whose clock advances only as frames are rendered.
//!
//! The device callback pulls mono frames out of the mixer; the scheduler
//! pushes sources into it. Because the clock is the rendered frame count,
//! the same mixer drives a real speaker and deterministic tests.

use crate::audio_codec::AudioBuffer;
use crate::playback::{AudioOutput, SourceId, VoiceAnalyser};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct ActiveSource {
    id: SourceId,
    buffer: Arc<AudioBuffer>,
    start_at: f64,
    analyser: Arc<VoiceAnalyser>,
}

impl ActiveSource {
    fn end(&self) -> f64 {
        self.start_at + self.buffer.duration()
    }
}

#[derive(Debug)]
pub struct TimelineMixer {
    sample_rate: u32,
    frames_rendered: u64,
    next_id: u64,
    sources: Vec<ActiveSource>,
    scratch: Vec<f32>,
}

impl TimelineMixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_rendered: 0,
            next_id: 0,
            sources: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    /// Number of sources that have not finished playing.
    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn start(
        &mut self,
        buffer: Arc<AudioBuffer>,
        at: f64,
        analyser: Arc<VoiceAnalyser>,
    ) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;
        self.sources.push(ActiveSource {
            id,
            buffer,
            start_at: at,
            analyser,
        });
        id
    }

    pub fn stop(&mut self, id: SourceId) {
        self.sources.retain(|source| source.id != id);
    }

    /// Renders the next `out.len()` mono frames and advances the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let rate = self.sample_rate as f64;
        let block_start = self.current_time();

        for source in &self.sources {
            let first = ((source.start_at - block_start) * rate).ceil().max(0.0) as usize;
            let last = (((source.end() - block_start) * rate).ceil().max(0.0) as usize).min(out.len());
            if first >= last {
                continue;
            }
            self.scratch.clear();
            for (i, slot) in out.iter_mut().enumerate().take(last).skip(first) {
                let offset = block_start + i as f64 / rate - source.start_at;
                let sample = source.buffer.sample_at(offset);
                *slot += sample;
                self.scratch.push(sample);
            }
            source.analyser.tap(&self.scratch);
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        self.frames_rendered += out.len() as u64;

        let now = self.current_time();
        self.sources.retain(|source| source.end() > now);
    }
}

/// A [`TimelineMixer`] shared between the scheduler and a device callback.
#[derive(Debug, Clone)]
pub struct SharedMixer(Arc<Mutex<TimelineMixer>>);

impl SharedMixer {
    pub fn new(sample_rate: u32) -> Self {
        Self(Arc::new(Mutex::new(TimelineMixer::new(sample_rate))))
    }

    fn lock(&self) -> MutexGuard<'_, TimelineMixer> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn render(&self, out: &mut [f32]) {
        self.lock().render(out);
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate()
    }

    pub fn active_sources(&self) -> usize {
        self.lock().active_sources()
    }
}

impl AudioOutput for SharedMixer {
    fn current_time(&self) -> f64 {
        self.lock().current_time()
    }

    fn start(&mut self, buffer: Arc<AudioBuffer>, at: f64, analyser: Arc<VoiceAnalyser>) -> SourceId {
        self.lock().start(buffer, at, analyser)
    }

    fn stop(&mut self, id: SourceId) {
        self.lock().stop(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn constant(value: f32, frames: usize, rate: u32) -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::new(vec![value; frames], rate))
    }

    #[test]
    fn test_clock_advances_with_rendered_frames() {
        let mut mixer = TimelineMixer::new(1_000);
        assert_eq!(mixer.current_time(), 0.0);
        mixer.render(&mut [0.0; 250]);
        assert_abs_diff_eq!(mixer.current_time(), 0.25, epsilon = 1e-9);
    }

    #[test]
    fn test_source_plays_inside_its_window_only() {
        let mut mixer = TimelineMixer::new(1_024);
        let analyser = Arc::new(VoiceAnalyser::with_smoothing(0.0));
        mixer.start(constant(0.5, 128, 1_024), 0.0625, analyser.clone());

        let mut out = [0.0f32; 256];
        mixer.render(&mut out);
        assert!(out[..64].iter().all(|&s| s == 0.0));
        assert!(out[64..192].iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert!(out[192..].iter().all(|&s| s == 0.0));
        assert_abs_diff_eq!(analyser.level(), 0.5, epsilon = 1e-6);
        assert_eq!(mixer.active_sources(), 0);
    }

    #[test]
    fn test_sources_span_render_blocks() {
        let mut mixer = TimelineMixer::new(1_024);
        let analyser = Arc::new(VoiceAnalyser::new());
        mixer.start(constant(0.25, 48, 1_024), 0.0, analyser);

        let mut out = [0.0f32; 32];
        mixer.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.25));
        assert_eq!(mixer.active_sources(), 1);
        mixer.render(&mut out);
        assert!(out[..16].iter().all(|&s| s == 0.25));
        assert!(out[16..].iter().all(|&s| s == 0.0));
        assert_eq!(mixer.active_sources(), 0);
    }

    #[test]
    fn test_overlapping_sources_are_mixed_and_clamped() {
        let mut mixer = TimelineMixer::new(1_000);
        let analyser = Arc::new(VoiceAnalyser::new());
        mixer.start(constant(0.75, 10, 1_000), 0.0, analyser.clone());
        mixer.start(constant(0.75, 10, 1_000), 0.0, analyser);

        let mut out = [0.0f32; 10];
        mixer.render(&mut out);
        assert!(out.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_stop_silences_source() {
        let mut mixer = TimelineMixer::new(1_000);
        let id = mixer.start(constant(0.5, 100, 1_000), 0.0, Arc::new(VoiceAnalyser::new()));
        mixer.stop(id);
        mixer.stop(id);
        let mut out = [1.0f32; 10];
        mixer.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_buffers_at_other_rates_keep_their_duration() {
        let mut mixer = TimelineMixer::new(48_000);
        // 24 kHz buffer of 240 samples lasts 10 ms, i.e. 480 output frames.
        mixer.start(constant(0.5, 240, 24_000), 0.0, Arc::new(VoiceAnalyser::new()));
        let mut out = vec![0.0f32; 960];
        mixer.render(&mut out);
        assert!(out[..480].iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert!(out[480..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_shared_mixer_implements_output() {
        let mut shared = SharedMixer::new(1_000);
        let id = AudioOutput::start(
            &mut shared,
            constant(0.5, 10, 1_000),
            0.0,
            Arc::new(VoiceAnalyser::new()),
        );
        assert_eq!(shared.active_sources(), 1);
        shared.stop(id);
        assert_eq!(shared.active_sources(), 0);
        shared.render(&mut [0.0; 100]);
        assert_abs_diff_eq!(shared.current_time(), 0.1, epsilon = 1e-9);
    }
}
