//! Read-only amplitude and spectrum view of whatever is being played.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::{Mutex, PoisonError};

pub const ANALYSER_WINDOW: usize = 2048;
pub const ANALYSER_SMOOTHING: f32 = 0.96;
pub const ANALYSER_BANDS: usize = 16;

#[derive(Debug)]
struct AnalyserState {
    window: VecDeque<f32>,
    level: f32,
    bands: [f32; ANALYSER_BANDS],
}

/// Taps played audio for visualizers.
///
/// The output tap pushes samples in; UI readers pull a smoothed level and
/// coarse band magnitudes out. Neither side can influence playback timing.
#[derive(Debug)]
pub struct VoiceAnalyser {
    state: Mutex<AnalyserState>,
    smoothing: f32,
}

impl Default for VoiceAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceAnalyser {
    pub fn new() -> Self {
        Self::with_smoothing(ANALYSER_SMOOTHING)
    }

    pub fn with_smoothing(smoothing: f32) -> Self {
        Self {
            state: Mutex::new(AnalyserState {
                window: VecDeque::with_capacity(ANALYSER_WINDOW),
                level: 0.0,
                bands: [0.0; ANALYSER_BANDS],
            }),
            smoothing: smoothing.clamp(0.0, 1.0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AnalyserState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feeds a block of played samples.
    pub fn tap(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
        let mut state = self.lock();
        for &sample in samples.iter().rev().take(ANALYSER_WINDOW).rev() {
            if state.window.len() == ANALYSER_WINDOW {
                state.window.pop_front();
            }
            state.window.push_back(sample);
        }
        state.level = self.smoothing * state.level + (1.0 - self.smoothing) * rms;
    }

    /// Smoothed RMS amplitude.
    pub fn level(&self) -> f32 {
        self.lock().level
    }

    /// The most recent window of samples, oldest first, zero-padded at the front.
    pub fn time_domain(&self) -> Vec<f32> {
        let state = self.lock();
        let mut out = vec![0.0; ANALYSER_WINDOW - state.window.len()];
        out.extend(state.window.iter().copied());
        out
    }

    /// Smoothed magnitudes of log-spaced bands across the spectrum, low to high.
    pub fn frequency_bands(&self) -> [f32; ANALYSER_BANDS] {
        let samples = self.time_domain();
        let windowed: Vec<f32> = samples
            .iter()
            .enumerate()
            .map(|(n, s)| s * hann(n, ANALYSER_WINDOW))
            .collect();

        let mut state = self.lock();
        for band in 0..ANALYSER_BANDS {
            let magnitude = goertzel(&windowed, band_bin(band));
            state.bands[band] =
                self.smoothing * state.bands[band] + (1.0 - self.smoothing) * magnitude;
        }
        state.bands
    }

    /// Forgets all history.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.window.clear();
        state.level = 0.0;
        state.bands = [0.0; ANALYSER_BANDS];
    }
}

/// Centre bin of `band`, spaced logarithmically between bin 1 and Nyquist.
pub(crate) fn band_bin(band: usize) -> f32 {
    let nyquist = (ANALYSER_WINDOW / 2) as f32;
    nyquist.powf((band as f32 + 0.5) / ANALYSER_BANDS as f32)
}

fn hann(n: usize, len: usize) -> f32 {
    0.5 * (1.0 - (2.0 * PI * n as f32 / (len - 1) as f32).cos())
}

fn goertzel(samples: &[f32], bin: f32) -> f32 {
    let coeff = 2.0 * (2.0 * PI * bin / samples.len() as f32).cos();
    let (mut prev, mut prev2) = (0.0f32, 0.0f32);
    for &x in samples {
        let s = x + coeff * prev - prev2;
        prev2 = prev;
        prev = s;
    }
    let power = prev * prev + prev2 * prev2 - coeff * prev * prev2;
    power.max(0.0).sqrt() * 2.0 / samples.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sine(bin: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| (2.0 * PI * bin * n as f32 / ANALYSER_WINDOW as f32).sin())
            .collect()
    }

    #[test]
    fn test_silence_has_zero_level() {
        let analyser = VoiceAnalyser::new();
        analyser.tap(&[0.0; 512]);
        assert_eq!(analyser.level(), 0.0);
        assert!(analyser.frequency_bands().iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_level_is_smoothed() {
        let analyser = VoiceAnalyser::new();
        analyser.tap(&[0.5; 256]);
        assert_abs_diff_eq!(analyser.level(), 0.04 * 0.5, epsilon = 1e-6);

        let unsmoothed = VoiceAnalyser::with_smoothing(0.0);
        unsmoothed.tap(&[0.5; 256]);
        assert_abs_diff_eq!(unsmoothed.level(), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_time_domain_keeps_latest_window() {
        let analyser = VoiceAnalyser::new();
        analyser.tap(&[1.0; 10]);
        let window = analyser.time_domain();
        assert_eq!(window.len(), ANALYSER_WINDOW);
        assert_eq!(window[ANALYSER_WINDOW - 1], 1.0);
        assert_eq!(window[ANALYSER_WINDOW - 11], 0.0);

        analyser.tap(&vec![0.25; ANALYSER_WINDOW + 100]);
        assert!(analyser.time_domain().iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_tone_peaks_in_its_band() {
        let analyser = VoiceAnalyser::with_smoothing(0.0);
        let target = 10;
        analyser.tap(&sine(band_bin(target), ANALYSER_WINDOW));
        let bands = analyser.frequency_bands();
        let loudest = bands
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(loudest, Some(target));
    }

    #[test]
    fn test_clear() {
        let analyser = VoiceAnalyser::with_smoothing(0.0);
        analyser.tap(&[0.9; 64]);
        analyser.clear();
        assert_eq!(analyser.level(), 0.0);
        assert!(analyser.time_domain().iter().all(|&s| s == 0.0));
    }
}
