//! The voice session actor.
//!
//! One task owns the connection, the router, the state machine, the
//! playback scheduler and the function ledger. Commands from the UI,
//! transport events and timers are all handled inside a single
//! `tokio::select!` loop, one at a time and in arrival order. Observers
//! get state through `watch` and `broadcast` channels.

pub mod connection;
pub mod credentials;
pub mod transport;

pub use connection::{
    CONNECT_TIMEOUT, CloseOutcome, ConnectionActivity, ConnectionSnapshot, KEEPALIVE_INTERVAL,
    ReconnectPolicy, SessionConnection, SocketState,
};
pub use credentials::{CredentialProvider, StaticCredential};
pub use transport::{OutboundFrame, TransportConnector, TransportEvent, TransportHandle, TransportPeer};

use crate::error::SessionError;
use crate::functions::{FunctionCallHandler, FunctionCallLedger};
use crate::playback::{AudioOutput, PlaybackScheduler, VoiceAnalyser};
use crate::router::ProtocolEventRouter;
use crate::state_machine::{ConversationStateMachine, Effect, VoiceBotStatus};
use crate::transcript::ConversationMessage;
use anyhow::Context;
use bytes::Bytes;
use medvoice_protocol::{
    ClientMessage, FunctionOutput, SettingsConfiguration, SettingsOverrides, combined_instructions,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub keepalive_interval: Duration,
    /// Limit on credential fetch plus handshake for one attempt.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Capacity of the command channel. Microphone frames beyond it are dropped.
    pub command_buffer: usize,
    pub transcript_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: KEEPALIVE_INTERVAL,
            connect_timeout: CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            command_buffer: 256,
            transcript_buffer: 128,
        }
    }
}

/// Commands accepted by a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Open the first connection.
    Start,
    ToggleSleep,
    /// Switch to a voice model (or provider voice id).
    ///
    /// The live `UpdateSpeak` frame only has a `model` field, so a provider
    /// voice id is sent there as is. The next settings frame carries it as
    /// `voice_id` plus `provider`.
    SetVoice(String),
    /// Replace the custom instructions appended to the base prompt.
    SetInstructions(Option<String>),
    /// PCM16 microphone audio at the uplink rate.
    MicrophoneFrame(Bytes),
    /// Answers a function call from outside the handler, e.g. a UI prompt.
    FunctionResponse {
        function_call_id: String,
        output: FunctionOutput,
    },
    Shutdown,
}

/// The collaborators a session is built from.
pub struct SessionDependencies {
    pub connector: Arc<dyn TransportConnector>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub functions: Arc<dyn FunctionCallHandler>,
    pub output: Box<dyn AudioOutput>,
}

pub struct VoiceSession {
    connector: Arc<dyn TransportConnector>,
    credentials: Arc<dyn CredentialProvider>,
    functions: Arc<dyn FunctionCallHandler>,
    base_settings: SettingsConfiguration,
    overrides: SettingsOverrides,

    connection: SessionConnection,
    router: ProtocolEventRouter,
    machine: ConversationStateMachine,
    scheduler: PlaybackScheduler,
    ledger: FunctionCallLedger,

    commands: mpsc::Receiver<SessionCommand>,
    status_tx: watch::Sender<VoiceBotStatus>,
    connection_tx: watch::Sender<ConnectionSnapshot>,
    transcript_tx: broadcast::Sender<ConversationMessage>,
    published: usize,
}

impl VoiceSession {
    /// Builds a session and runs it on its own task.
    ///
    /// Functions declared by the handler are added to the settings frame
    /// unless the base settings already declare a function of that name.
    pub fn spawn(
        config: SessionConfig,
        mut base_settings: SettingsConfiguration,
        overrides: SettingsOverrides,
        deps: SessionDependencies,
    ) -> (SessionHandle, JoinHandle<()>) {
        let declared = &mut base_settings.agent.think.functions;
        for definition in deps.functions.definitions() {
            if !declared.iter().any(|d| d.name == definition.name) {
                declared.push(definition);
            }
        }

        let (commands_tx, commands_rx) = mpsc::channel(config.command_buffer.max(1));
        let (status_tx, status_rx) = watch::channel(VoiceBotStatus::None);
        let (connection_tx, connection_rx) = watch::channel(ConnectionSnapshot::default());
        let (transcript_tx, _) = broadcast::channel(config.transcript_buffer.max(1));

        let scheduler = PlaybackScheduler::new(deps.output, base_settings.audio.output.sample_rate);
        let analyser = scheduler.analyser();

        let session = VoiceSession {
            connector: deps.connector,
            credentials: deps.credentials,
            functions: deps.functions,
            base_settings,
            overrides,
            connection: SessionConnection::new(config.reconnect, config.keepalive_interval)
                .with_connect_timeout(config.connect_timeout),
            router: ProtocolEventRouter::new(),
            machine: ConversationStateMachine::new(),
            scheduler,
            ledger: FunctionCallLedger::new(),
            commands: commands_rx,
            status_tx,
            connection_tx,
            transcript_tx: transcript_tx.clone(),
            published: 0,
        };

        let session_id = Uuid::new_v4();
        let span = tracing::info_span!("voice_session", %session_id);
        let task = tokio::spawn(session.run().instrument(span));

        let handle = SessionHandle {
            commands: commands_tx,
            status: status_rx,
            connection: connection_rx,
            transcript: transcript_tx,
            analyser,
        };
        (handle, task)
    }

    async fn run(mut self) {
        info!("Voice session started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
                activity = self.connection.next_activity() => self.on_activity(activity).await,
            }
            self.publish();
        }

        self.scheduler.cancel_all();
        self.connection.close();
        self.publish();
        info!("Voice session stopped");
    }

    async fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start => match self.connection.state() {
                SocketState::Unstarted => self.connect(0),
                state => debug!(?state, "Start ignored, session already started"),
            },
            SessionCommand::ToggleSleep => {
                let effects = self.machine.toggle_sleep();
                self.apply(effects).await;
            }
            SessionCommand::SetVoice(voice) => {
                if voice == self.overrides.voice {
                    return;
                }
                info!(%voice, "Voice changed");
                self.overrides.voice = voice.clone();
                if self.connection.is_connected() {
                    self.send_control(ClientMessage::UpdateSpeak { model: voice });
                }
            }
            SessionCommand::SetInstructions(instructions) => {
                if instructions == self.overrides.instructions {
                    return;
                }
                info!("Instructions changed");
                self.overrides.instructions = instructions;
                if self.connection.is_connected() {
                    let instructions = combined_instructions(
                        &self.base_settings.agent.think.instructions,
                        self.overrides.instructions.as_deref(),
                    );
                    self.send_control(ClientMessage::UpdateInstructions { instructions });
                }
            }
            SessionCommand::MicrophoneFrame(frame) => {
                if self.machine.status() != VoiceBotStatus::Sleeping {
                    self.connection.send(OutboundFrame::Binary(frame));
                }
            }
            SessionCommand::FunctionResponse {
                function_call_id,
                output,
            } => {
                if let Some(response) = self.ledger.record(&function_call_id, output) {
                    if !self.send_control(response) {
                        warn!(call_id = %function_call_id, "Function call response could not be sent");
                    }
                }
            }
            SessionCommand::Shutdown => {}
        }
    }

    async fn on_activity(&mut self, activity: ConnectionActivity) {
        match activity {
            ConnectionActivity::Transport(TransportEvent::Opened) => self.on_opened(),
            ConnectionActivity::Transport(TransportEvent::Frame(frame)) => {
                if let Some(event) = self.router.route(frame) {
                    let effects = self.machine.handle(event);
                    self.apply(effects).await;
                }
            }
            ConnectionActivity::Transport(TransportEvent::Error(message)) => {
                self.connection.on_error(&message);
            }
            ConnectionActivity::Transport(TransportEvent::Closed) => {
                let outcome = self.connection.on_close();
                log_close_outcome(outcome);
            }
            ConnectionActivity::KeepaliveDue => {
                self.send_control(ClientMessage::KeepAlive);
            }
            ConnectionActivity::ReconnectDue(attempt) => self.connect(attempt),
            ConnectionActivity::ConnectFailed(outcome) => log_close_outcome(outcome),
        }
    }

    /// Starts attempt `attempt`. The connect resolves in the select loop.
    fn connect(&mut self, attempt: u32) {
        if !self.connection.begin_attempt(attempt) {
            return;
        }
        self.ledger.clear();
        info!(attempt, "Connecting to agent");

        let credentials = self.credentials.clone();
        let connector = self.connector.clone();
        self.connection.start_connect(async move {
            open_transport(credentials.as_ref(), connector.as_ref()).await
        });
    }

    fn on_opened(&mut self) {
        self.connection.on_open();
        let settings = self.overrides.apply(&self.base_settings);
        let agent_speaks_first = settings.replays_greeting();
        if !self.send_control(ClientMessage::SettingsConfiguration(settings)) {
            warn!("Settings frame could not be sent");
        }
        self.machine.on_connected(agent_speaks_first);
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::PlayAudio(frame) => {
                    if let Err(e) = self.scheduler.enqueue(&frame) {
                        warn!(error = %e, bytes = frame.len(), "Dropping undecodable audio frame");
                    }
                }
                Effect::CancelPlayback => {
                    self.scheduler.cancel_all();
                }
                Effect::RejectFunctionCall(call) => {
                    let response = self.ledger.reject(&call.function_call_id);
                    if !self.send_control(response) {
                        warn!(call_id = %call.function_call_id, "Function call response could not be sent");
                    }
                }
                Effect::AnswerFunctionCall(request) => {
                    let response = self.ledger.answer(&request, self.functions.as_ref()).await;
                    if !self.send_control(response) {
                        // Not retried; the agent times the call out on its side.
                        warn!(
                            call_id = %request.function_call_id,
                            "Function call response could not be sent"
                        );
                    }
                }
            }
        }
    }

    /// Serializes and sends a control frame. Returns whether it was handed
    /// to the transport.
    fn send_control(&self, message: ClientMessage) -> bool {
        let kind = message.kind();
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!(kind, error = %e, "Failed to serialize control frame");
                return false;
            }
        };
        let sent = self.connection.send(OutboundFrame::Text(text));
        if sent {
            debug!(kind, "Sent control frame");
        } else {
            debug!(kind, "Control frame dropped, transport not open");
        }
        sent
    }

    fn publish(&mut self) {
        let status = self.machine.status();
        self.status_tx.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });

        let snapshot = self.connection.snapshot();
        self.connection_tx.send_if_modified(|current| {
            let changed = *current != snapshot;
            *current = snapshot;
            changed
        });

        let transcript = self.machine.transcript();
        for message in &transcript[self.published..] {
            // No subscribers is fine; the transcript is also kept in the machine.
            let _ = self.transcript_tx.send(message.clone());
        }
        self.published = transcript.len();
    }
}

async fn open_transport(
    credentials: &dyn CredentialProvider,
    connector: &dyn TransportConnector,
) -> anyhow::Result<TransportHandle> {
    let credential = credentials
        .fetch()
        .await
        .context("Failed to obtain agent credential")?;
    connector
        .connect(credential)
        .await
        .context("Failed to open agent transport")
}

fn log_close_outcome(outcome: CloseOutcome) {
    match outcome {
        CloseOutcome::Retry { attempt, delay } => {
            info!(attempt, delay_ms = delay.as_millis() as u64, "Connection lost, will retry")
        }
        CloseOutcome::RateLimited => error!("Connection rate limited, not retrying"),
        CloseOutcome::Ignored => debug!("Close ignored"),
    }
}

/// A cloneable front end to a running [`VoiceSession`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<VoiceBotStatus>,
    connection: watch::Receiver<ConnectionSnapshot>,
    transcript: broadcast::Sender<ConversationMessage>,
    analyser: Arc<VoiceAnalyser>,
}

impl SessionHandle {
    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Stopped)
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Start).await
    }

    pub async fn toggle_sleep(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::ToggleSleep).await
    }

    pub async fn set_voice(&self, voice: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionCommand::SetVoice(voice.into())).await
    }

    pub async fn set_instructions(&self, instructions: Option<String>) -> Result<(), SessionError> {
        self.send(SessionCommand::SetInstructions(instructions)).await
    }

    pub async fn send_function_response(
        &self,
        function_call_id: impl Into<String>,
        output: FunctionOutput,
    ) -> Result<(), SessionError> {
        self.send(SessionCommand::FunctionResponse {
            function_call_id: function_call_id.into(),
            output,
        })
        .await
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown).await
    }

    /// Queues microphone audio without waiting. Returns false if the frame
    /// was dropped because the session is backed up or gone.
    pub fn send_microphone_frame(&self, frame: Bytes) -> bool {
        self.commands
            .try_send(SessionCommand::MicrophoneFrame(frame))
            .is_ok()
    }

    pub fn status(&self) -> VoiceBotStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<VoiceBotStatus> {
        self.status.clone()
    }

    pub fn connection(&self) -> ConnectionSnapshot {
        *self.connection.borrow()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.connection.clone()
    }

    /// Transcript entries appended from now on.
    pub fn subscribe_transcript(&self) -> broadcast::Receiver<ConversationMessage> {
        self.transcript.subscribe()
    }

    /// Live view of the agent audio being played.
    pub fn agent_analyser(&self) -> Arc<VoiceAnalyser> {
        self.analyser.clone()
    }
}
