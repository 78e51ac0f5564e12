//! Conversions between raw PCM16 wire frames and `f32` sample buffers.
//!
//! Every frame on the wire is little-endian, signed 16-bit, mono. Samples
//! inside the crate are normalized `f32` in `[-1.0, 1.0]`.

use bytes::{BufMut, Bytes, BytesMut};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("audio frame is empty")]
    Empty,
    #[error("audio frame has an odd byte length ({0}), expected whole 16-bit samples")]
    OddLength(usize),
    #[error("failed to build resampler: {0}")]
    ResamplerSetup(#[from] rubato::ResamplerConstructionError),
    #[error("resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),
}

/// Decoded mono audio at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Linearly interpolated sample `offset` seconds into the buffer.
    /// Positions outside the buffer are silent.
    pub fn sample_at(&self, offset: f64) -> f32 {
        if offset < 0.0 {
            return 0.0;
        }
        let position = offset * self.sample_rate as f64;
        let index = position.floor() as usize;
        let Some(&current) = self.samples.get(index) else {
            return 0.0;
        };
        let next = self.samples.get(index + 1).copied().unwrap_or(current);
        let frac = (position - index as f64) as f32;
        current + (next - current) * frac
    }
}

/// Decodes one binary frame of PCM16 audio.
pub fn decode_pcm16(frame: &[u8], sample_rate: u32) -> Result<AudioBuffer, CodecError> {
    if frame.is_empty() {
        return Err(CodecError::Empty);
    }
    if frame.len() % 2 != 0 {
        return Err(CodecError::OddLength(frame.len()));
    }
    let pcm16: Vec<i16> = frame
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();
    Ok(AudioBuffer::new(convert_i16_to_f32(&pcm16), sample_rate))
}

/// Encodes samples as a PCM16 frame, clamping out-of-range values.
pub fn encode_pcm16(samples: &[f32]) -> Bytes {
    let mut frame = BytesMut::with_capacity(samples.len() * 2);
    for sample in convert_f32_to_i16(samples) {
        frame.put_i16_le(sample);
    }
    frame.freeze()
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Averages interleaved multi-channel samples down to mono.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Streaming mono sample-rate converter.
///
/// Input arrives in arbitrary sizes; samples that do not fill a whole
/// resampler chunk are carried over to the next call.
pub struct PcmResampler {
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    from_rate: u32,
    to_rate: u32,
}

impl PcmResampler {
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self, CodecError> {
        let inner = if from_rate == to_rate {
            None
        } else {
            Some(FastFixedIn::<f32>::new(
                to_rate as f64 / from_rate as f64,
                1.0,
                PolynomialDegree::Cubic,
                chunk_size,
                1,
            )?)
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
            from_rate,
            to_rate,
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn is_identity(&self) -> bool {
        self.inner.is_none()
    }

    /// Resamples every whole chunk available and keeps the remainder.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, CodecError> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };
        self.pending.extend_from_slice(samples);

        let mut output = Vec::new();
        loop {
            let needed = inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk = vec![self.pending.drain(..needed).collect::<Vec<f32>>()];
            let mut resampled = inner.process(&chunk, None)?;
            output.append(&mut resampled[0]);
        }
        Ok(output)
    }

    /// Pushes out whatever is left in the carry-over buffer.
    pub fn flush(&mut self) -> Result<Vec<f32>, CodecError> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let chunk = vec![std::mem::take(&mut self.pending)];
        let mut resampled = inner.process_partial(Some(chunk.as_slice()), None)?;
        Ok(std::mem::take(&mut resampled[0]))
    }

    /// Drops buffered input and filter state.
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_decode_pcm16() {
        // 16384 = 0x4000 little endian, -32768 = 0x8000
        let buffer = decode_pcm16(&[0x00, 0x40, 0x00, 0x80], 24_000).unwrap();
        assert_eq!(buffer.samples.len(), 2);
        assert_eq!(buffer.sample_rate, 24_000);
        assert_abs_diff_eq!(buffer.samples[0], 0.5, epsilon = 0.0001);
        assert_abs_diff_eq!(buffer.samples[1], -1.0, epsilon = 0.0001);
    }

    #[test]
    fn test_decode_rejects_empty_and_odd_frames() {
        assert!(matches!(decode_pcm16(&[], 24_000), Err(CodecError::Empty)));
        assert!(matches!(
            decode_pcm16(&[0x00, 0x40, 0x01], 24_000),
            Err(CodecError::OddLength(3))
        ));
    }

    #[test]
    fn test_duration() {
        let buffer = decode_pcm16(&vec![0u8; 4_800], 24_000).unwrap();
        assert_abs_diff_eq!(buffer.duration(), 0.1, epsilon = 1e-9);
        assert_eq!(AudioBuffer::new(vec![0.0; 10], 0).duration(), 0.0);
    }

    #[test]
    fn test_encode_pcm16_clamps() {
        let frame = encode_pcm16(&[0.0, 1.0, -1.0, 2.0, -2.0]);
        assert_eq!(frame.len(), 10);
        let decoded: Vec<i16> = frame
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(decoded, vec![0, i16::MAX, -i16::MAX, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_encode_then_decode_is_close() {
        let samples = [0.25f32, -0.5, 0.75];
        let decoded = decode_pcm16(&encode_pcm16(&samples), 16_000).unwrap();
        for (a, b) in samples.iter().zip(decoded.samples.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 0.001);
        }
    }

    #[test]
    fn test_sample_at_interpolates() {
        let buffer = AudioBuffer::new(vec![0.0, 1.0], 2);
        assert_abs_diff_eq!(buffer.sample_at(0.0), 0.0);
        assert_abs_diff_eq!(buffer.sample_at(0.25), 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(buffer.sample_at(0.5), 1.0, epsilon = 1e-6);
        assert_eq!(buffer.sample_at(1.5), 0.0);
        assert_eq!(buffer.sample_at(-0.1), 0.0);
    }

    #[test]
    fn test_downmix() {
        assert_eq!(downmix(&[0.2, 0.4, -1.0, 1.0], 2), vec![0.3f32, 0.0]);
        assert_eq!(downmix(&[0.1, 0.2], 1), vec![0.1f32, 0.2]);
    }

    #[test]
    fn test_identity_resampler_passes_through() {
        let mut resampler = PcmResampler::new(16_000, 16_000, 512).unwrap();
        assert!(resampler.is_identity());
        assert_eq!(resampler.process(&[0.1, 0.2]).unwrap(), vec![0.1, 0.2]);
        assert!(resampler.flush().unwrap().is_empty());
    }

    #[test]
    fn test_downsampling_carries_remainder() {
        let mut resampler = PcmResampler::new(48_000, 16_000, 480).unwrap();
        assert!(!resampler.is_identity());

        // Less than one chunk: nothing comes out yet.
        let out = resampler.process(&vec![0.0; 300]).unwrap();
        assert!(out.is_empty());

        // Completing the chunk produces roughly a third as many samples.
        let out = resampler.process(&vec![0.0; 300]).unwrap();
        assert!(!out.is_empty());
        assert!(out.len() <= 200);

        let tail = resampler.flush().unwrap();
        assert!(!tail.is_empty());

        resampler.reset();
        assert!(resampler.flush().unwrap().is_empty());
    }
}
