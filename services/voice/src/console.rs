//! Line-oriented control of a running session from the terminal.

use crate::config::resolve_voice;
use crate::notes::ClinicalNoteFunctions;
use medvoice_core::SessionHandle;
use medvoice_core::session::ConnectionSnapshot;
use medvoice_core::transcript::{ConversationMessage, TranscriptEntry};
use medvoice_protocol::available_voices;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub const HELP: &str = "\
Commands:
  sleep                 pause or resume the assistant
  voice <name>          switch voice (Asteria, Orion, Luna, Arcas)
  instructions [text]   set custom instructions, or clear them
  note                  show the note being dictated
  notes                 list saved notes
  status                show conversation and connection state
  help                  show this help
  quit                  end the session";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    ToggleSleep,
    SetVoice(String),
    SetInstructions(Option<String>),
    ShowNote,
    ListNotes,
    Status,
    Help,
    Quit,
}

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_lowercase().as_str() {
        "sleep" | "wake" => ConsoleCommand::ToggleSleep,
        "voice" => {
            if rest.is_empty() {
                return Err("usage: voice <name>".to_string());
            }
            ConsoleCommand::SetVoice(resolve_voice(rest)?)
        }
        "instructions" => {
            ConsoleCommand::SetInstructions(Some(rest.to_string()).filter(|text| !text.is_empty()))
        }
        "note" => ConsoleCommand::ShowNote,
        "notes" => ConsoleCommand::ListNotes,
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '{}', try 'help'", other)),
    };
    Ok(Some(command))
}

pub const RATE_LIMITED_NOTICE: &str = "\
The agent refused every reconnect attempt and the session has given up.
Wait a few minutes, then restart medvoice.";

pub const STOPPED_NOTICE: &str = "The voice session has stopped.";

/// Why the console stopped reading commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    Quit,
    EndOfInput,
    RateLimited,
    SessionStopped,
}

/// Resolves once the session can no longer do anything useful: retries are
/// exhausted, or the session task is gone.
pub async fn session_ended(connection: &mut watch::Receiver<ConnectionSnapshot>) -> ConsoleExit {
    match connection.wait_for(|snapshot| snapshot.rate_limited).await {
        Ok(_) => ConsoleExit::RateLimited,
        Err(_) => ConsoleExit::SessionStopped,
    }
}

/// Reads commands from stdin until `quit`, end of input, or the session
/// giving up.
pub async fn run(
    session: SessionHandle,
    notes: Arc<ClinicalNoteFunctions>,
) -> anyhow::Result<ConsoleExit> {
    run_with(BufReader::new(tokio::io::stdin()), session, notes).await
}

pub async fn run_with<R>(
    input: R,
    session: SessionHandle,
    notes: Arc<ClinicalNoteFunctions>,
) -> anyhow::Result<ConsoleExit>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut connection = session.subscribe_connection();
    println!("{}", HELP);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => return Ok(ConsoleExit::EndOfInput),
            },
            exit = session_ended(&mut connection) => {
                match exit {
                    ConsoleExit::RateLimited => {
                        error!("Session rate limited, closing the console");
                        println!("{}", RATE_LIMITED_NOTICE);
                    }
                    _ => println!("{}", STOPPED_NOTICE),
                }
                return Ok(exit);
            }
        };
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };
        debug!(?command, "Console command");

        match command {
            ConsoleCommand::ToggleSleep => session.toggle_sleep().await?,
            ConsoleCommand::SetVoice(voice) => session.set_voice(voice).await?,
            ConsoleCommand::SetInstructions(text) => session.set_instructions(text).await?,
            ConsoleCommand::ShowNote => {
                let note = notes.current_note().await;
                if note.is_empty() {
                    println!("(no note in progress)");
                } else {
                    print!("{}", note);
                }
            }
            ConsoleCommand::ListNotes => {
                let saved = notes.saved_notes().await;
                if saved.is_empty() {
                    println!("(no saved notes)");
                }
                for note in saved {
                    println!("--- {} ({})", note.id, note.saved_at.to_rfc3339());
                    print!("{}", note.content);
                }
            }
            ConsoleCommand::Status => {
                let connection = session.connection();
                println!(
                    "status: {}  connection: {:?}  reconnect attempts: {}{}",
                    session.status(),
                    connection.state,
                    connection.reconnect_attempts,
                    if connection.rate_limited { "  (rate limited)" } else { "" }
                );
            }
            ConsoleCommand::Help => {
                println!("{}", HELP);
                for voice in available_voices() {
                    println!("  {:<8} {} ({}, {})", voice.name, voice.canonical_name, voice.accent, voice.gender);
                }
            }
            ConsoleCommand::Quit => return Ok(ConsoleExit::Quit),
        }
    }
}

/// Whether a transcript entry is shown to the user rather than only logged.
pub fn is_printable(message: &ConversationMessage) -> bool {
    !matches!(message.entry, TranscriptEntry::BehindTheScenes(_))
}

/// Prints conversation turns and latency reports as they are appended.
pub fn spawn_transcript_printer(
    mut transcript: broadcast::Receiver<ConversationMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match transcript.recv().await {
                Ok(message) if is_printable(&message) => println!("{}", message),
                Ok(message) => debug!(%message, "Transcript tag"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Transcript printer fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
