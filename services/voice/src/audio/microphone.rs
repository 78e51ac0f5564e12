use super::AudioError;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use medvoice_core::SessionHandle;
use medvoice_core::audio_codec::{PcmResampler, downmix, encode_pcm16};
use medvoice_protocol::settings::INPUT_SAMPLE_RATE;
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

/// Device samples fed to the resampler per chunk.
const RESAMPLER_CHUNK: usize = 1024;

/// Captures the default input device and streams it to the session as
/// 16 kHz mono PCM16. Capture stops when this value is dropped.
pub struct MicrophoneUplink {
    stop: std_mpsc::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
    pump: JoinHandle<()>,
}

impl MicrophoneUplink {
    pub fn start(session: SessionHandle) -> Result<Self, AudioError> {
        let (samples_tx, samples_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("medvoice-microphone".to_string())
            .spawn(move || {
                let stream = match open_stream(samples_tx) {
                    Ok((stream, sample_rate)) => {
                        let _ = ready_tx.send(Ok(sample_rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Microphone stream closed");
            })?;

        let device_rate = ready_rx.recv().map_err(|_| AudioError::ThreadExited)??;
        let resampler = PcmResampler::new(device_rate, INPUT_SAMPLE_RATE, RESAMPLER_CHUNK)?;
        let span = tracing::info_span!("microphone_uplink", device_rate);
        let pump = tokio::spawn(
            uplink(samples_rx, resampler, move |frame| {
                session.send_microphone_frame(frame)
            })
            .instrument(span),
        );

        Ok(Self {
            stop: stop_tx,
            thread: Some(thread),
            pump,
        })
    }
}

impl Drop for MicrophoneUplink {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.pump.abort();
    }
}

fn open_stream(
    samples: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or(AudioError::NoDevice("input"))?;
    let supported = device.default_input_config()?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    info!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        ?sample_format,
        "Opening microphone"
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, samples)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, samples)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, samples)?,
        other => return Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    };
    stream.play()?;
    Ok((stream, config.sample_rate.0))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    samples: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let interleaved: Vec<f32> = data.iter().map(|s| f32::from_sample(*s)).collect();
            // The receiver only goes away during shutdown.
            let _ = samples.send(downmix(&interleaved, channels));
        },
        |err| error!(error = %err, "Microphone stream error"),
        None,
    )
}

/// Resamples captured blocks to the uplink rate and hands each encoded
/// frame to `send`, which reports whether the frame was accepted.
async fn uplink<F>(
    mut samples: mpsc::UnboundedReceiver<Vec<f32>>,
    mut resampler: PcmResampler,
    mut send: F,
) where
    F: FnMut(Bytes) -> bool,
{
    let mut dropped: u64 = 0;
    while let Some(block) = samples.recv().await {
        let resampled = match resampler.process(&block) {
            Ok(resampled) => resampled,
            Err(e) => {
                warn!(error = %e, "Resampling failed, discarding buffered audio");
                resampler.reset();
                continue;
            }
        };
        if resampled.is_empty() {
            continue;
        }
        if !send(encode_pcm16(&resampled)) {
            dropped += 1;
            if dropped % 100 == 1 {
                debug!(dropped, "Microphone frame dropped, session is busy");
            }
        }
    }
    debug!(dropped, "Microphone uplink finished");
}
