use super::AudioError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use medvoice_core::playback::SharedMixer;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Plays a [`SharedMixer`] through the default output device.
///
/// The mixer runs at the device rate; agent audio is interpolated up to it
/// when rendered. Playback stops when this value is dropped.
pub struct SpeakerOutput {
    mixer: SharedMixer,
    stop: std_mpsc::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SpeakerOutput {
    pub fn start() -> Result<Self, AudioError> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("medvoice-speaker".to_string())
            .spawn(move || {
                let stream = match open_stream() {
                    Ok((stream, mixer)) => {
                        let _ = ready_tx.send(Ok(mixer));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Parked until the output is dropped.
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Speaker stream closed");
            })?;

        let mixer = ready_rx.recv().map_err(|_| AudioError::ThreadExited)??;
        Ok(Self {
            mixer,
            stop: stop_tx,
            thread: Some(thread),
        })
    }

    /// The mixer to hand to the session as its audio output.
    pub fn mixer(&self) -> SharedMixer {
        self.mixer.clone()
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn open_stream() -> Result<(cpal::Stream, SharedMixer), AudioError> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or(AudioError::NoDevice("output"))?;
    let supported = device.default_output_config()?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let mixer = SharedMixer::new(config.sample_rate.0);

    info!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        ?sample_format,
        "Opening speaker"
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, mixer.clone())?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, mixer.clone())?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, mixer.clone())?,
        other => return Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    };
    stream.play()?;
    Ok((stream, mixer))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: SharedMixer,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut mono: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            mono.resize(data.len() / channels, 0.0);
            mixer.render(&mut mono);
            for (frame, sample) in data.chunks_mut(channels).zip(&mono) {
                frame.fill(T::from_sample(*sample));
            }
        },
        |err| error!(error = %err, "Speaker stream error"),
        None,
    )
}

/// Drives a [`SharedMixer`] in real time without an audio device, so the
/// playback clock advances and finished sources retire.
pub fn spawn_virtual_speaker(mixer: SharedMixer, block: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let frames = (mixer.sample_rate() as f64 * block.as_secs_f64()).round().max(1.0) as usize;
        let mut scratch = vec![0.0; frames];
        let mut ticker = tokio::time::interval(block);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        loop {
            ticker.tick().await;
            mixer.render(&mut scratch);
        }
    })
}
