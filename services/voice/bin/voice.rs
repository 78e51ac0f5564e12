//! Main entrypoint for the medvoice client.
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Opening the audio devices (or a virtual speaker with `--no-audio`).
//! 3. Spawning the voice session and connecting it to the agent.
//! 4. Running the console until the user quits, presses Ctrl+C, or the
//!    agent connection is rate limited.

use anyhow::Context;
use clap::Parser;
use medvoice_core::functions::FunctionCallHandler;
use medvoice_core::playback::SharedMixer;
use medvoice_core::session::{CredentialProvider, StaticCredential};
use medvoice_core::{SessionConfig, SessionDependencies, VoiceSession};
use medvoice_protocol::settings::OUTPUT_SAMPLE_RATE;
use medvoice_protocol::{SettingsConfiguration, available_voices};
use medvoice_service::{
    audio::{MicrophoneUplink, SpeakerOutput, spawn_virtual_speaker},
    config::{Config, CredentialSource, resolve_voice},
    console::{self, ConsoleExit},
    credentials::HttpCredentialProvider,
    notes::ClinicalNoteFunctions,
    transport::TungsteniteConnector,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Talk to the medical assistant from the terminal.
#[derive(Parser, Debug)]
#[command(name = "medvoice", version, about)]
struct Args {
    /// Voice to speak with, by name or model (overrides AGENT_VOICE).
    #[arg(long)]
    voice: Option<String>,

    /// Custom instructions appended to the base prompt (overrides AGENT_INSTRUCTIONS).
    #[arg(long)]
    instructions: Option<String>,

    /// Print the available voices and exit.
    #[arg(long)]
    list_voices: bool,

    /// Run without audio devices; agent audio is played into a virtual speaker.
    #[arg(long)]
    no_audio: bool,
}

/// Listens for the `Ctrl+C` signal to end the session.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.list_voices {
        for voice in available_voices() {
            println!("{:<8} {:<20} {}, {}", voice.name, voice.canonical_name, voice.accent, voice.gender);
        }
        return Ok(());
    }

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::from_level(config.log_level).into())
                .from_env_lossy(),
        )
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing session...");

    let mut overrides = config.overrides();
    if let Some(voice) = &args.voice {
        overrides.voice = resolve_voice(voice).map_err(anyhow::Error::msg)?;
    }
    if let Some(instructions) = args.instructions {
        overrides.instructions = Some(instructions).filter(|text| !text.trim().is_empty());
    }

    // --- 3. Audio Output ---
    let speaker = if args.no_audio {
        None
    } else {
        Some(SpeakerOutput::start().context("Failed to open speaker")?)
    };
    let mixer = match &speaker {
        Some(speaker) => speaker.mixer(),
        None => {
            let mixer = SharedMixer::new(OUTPUT_SAMPLE_RATE);
            spawn_virtual_speaker(mixer.clone(), Duration::from_millis(20));
            mixer
        }
    };

    // --- 4. Session ---
    let credentials: Arc<dyn CredentialProvider> = match &config.credential {
        CredentialSource::ApiKey(key) => Arc::new(StaticCredential::new(key.clone())),
        CredentialSource::Endpoint(url) => Arc::new(HttpCredentialProvider::new(url.clone())),
    };
    let notes = Arc::new(ClinicalNoteFunctions::new());
    let functions: Arc<dyn FunctionCallHandler> = notes.clone();
    let deps = SessionDependencies {
        connector: Arc::new(TungsteniteConnector::new(config.agent_url.clone())),
        credentials,
        functions,
        output: Box::new(mixer),
    };
    let base_settings = SettingsConfiguration::medical_assistant(config.instructions.clone(), Vec::new());
    let (session, task) = VoiceSession::spawn(SessionConfig::default(), base_settings, overrides, deps);

    let printer = console::spawn_transcript_printer(session.subscribe_transcript());
    session.start().await?;

    // --- 5. Audio Input ---
    let microphone = if args.no_audio {
        None
    } else {
        Some(MicrophoneUplink::start(session.clone()).context("Failed to open microphone")?)
    };

    info!(
        agent_url = %config.agent_url,
        audio = !args.no_audio,
        "Session running. Type 'help' for commands."
    );

    let exit = tokio::select! {
        result = console::run(session.clone(), notes.clone()) => Some(result?),
        _ = shutdown_signal() => None,
    };

    // --- 6. Shutdown ---
    drop(microphone);
    session.shutdown().await.ok();
    task.await.context("Voice session task panicked")?;
    printer.abort();
    drop(speaker);

    let saved = notes.saved_notes().await.len();
    info!(saved_notes = saved, "Session has shut down.");
    if exit == Some(ConsoleExit::RateLimited) {
        anyhow::bail!("Agent connection rate limited");
    }
    Ok(())
}
