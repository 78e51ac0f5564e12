//! The append-only record of a conversation that UI layers observe.

use chrono::{DateTime, Utc};
use medvoice_protocol::Role;
use serde::Serialize;

/// Per-stage latencies reported when the agent starts speaking, in seconds.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LatencyMetrics {
    pub tts_latency: f64,
    pub ttt_latency: f64,
    pub total_latency: Option<f64>,
}

/// Protocol milestones recorded for debugging views.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum BehindTheScenesEvent {
    SettingsApplied,
    UserStartedSpeaking,
    AgentStartedSpeaking,
    ConversationText { role: Role, content: String },
    EndOfThought,
    /// The user spoke over the agent.
    Interruption,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptEntry {
    Conversation { role: Role, content: String },
    Latency(LatencyMetrics),
    BehindTheScenes(BehindTheScenesEvent),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ConversationMessage {
    pub received_at: DateTime<Utc>,
    pub entry: TranscriptEntry,
}

impl ConversationMessage {
    pub fn now(entry: TranscriptEntry) -> Self {
        Self {
            received_at: Utc::now(),
            entry,
        }
    }

    pub fn is_tag(&self, tag: &BehindTheScenesEvent) -> bool {
        matches!(&self.entry, TranscriptEntry::BehindTheScenes(event) if event == tag)
    }
}

impl std::fmt::Display for ConversationMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let at = self.received_at.format("%H:%M:%S");
        match &self.entry {
            TranscriptEntry::Conversation { role, content } => write!(f, "[{at}] {role}: {content}"),
            TranscriptEntry::Latency(metrics) => write!(
                f,
                "[{at}] latency tts={:.3}s ttt={:.3}s total={}",
                metrics.tts_latency,
                metrics.ttt_latency,
                metrics
                    .total_latency
                    .map_or_else(|| "n/a".to_string(), |t| format!("{t:.3}s"))
            ),
            TranscriptEntry::BehindTheScenes(event) => write!(f, "[{at}] ({event:?})"),
        }
    }
}
