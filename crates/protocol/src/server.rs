//! Events sent from the agent to the client.
//!
//! Text frames are classified by shape before they are typed: a frame that
//! carries a `role` is a conversation turn whatever its `type` says, every
//! other frame is dispatched on its `type` tag. Unknown tags are not errors.

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `type` tags of the events the agent emits.
pub mod event_type {
    pub const WELCOME: &str = "Welcome";
    pub const SETTINGS_APPLIED: &str = "SettingsApplied";
    pub const CONVERSATION_TEXT: &str = "ConversationText";
    pub const USER_STARTED_SPEAKING: &str = "UserStartedSpeaking";
    pub const AGENT_THINKING: &str = "AgentThinking";
    pub const FUNCTION_CALL_REQUEST: &str = "FunctionCallRequest";
    pub const AGENT_STARTED_SPEAKING: &str = "AgentStartedSpeaking";
    pub const AGENT_AUDIO_DONE: &str = "AgentAudioDone";
    pub const END_OF_THOUGHT: &str = "EndOfThought";
    pub const ERROR: &str = "Error";
}

/// The speaker of a conversation turn.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A transcribed user turn or a generated assistant turn.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ConversationText {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

/// The agent asks the client to invoke one of the declared functions.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionCallRequest {
    pub function_name: String,
    pub function_call_id: String,
    #[serde(default)]
    pub input: Value,
}

/// A function call whose payload could not be typed but whose id is known,
/// so it can still be answered.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidFunctionCall {
    pub function_call_id: String,
    pub reason: String,
}

/// Emitted when synthesized audio starts; carries per-stage latencies in seconds.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AgentStartedSpeaking {
    pub tts_latency: Option<f64>,
    pub ttt_latency: Option<f64>,
    pub total_latency: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ErrorEvent {
    #[serde(default, alias = "description")]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// A recognized inbound control event.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Welcome,
    SettingsApplied,
    ConversationText(ConversationText),
    UserStartedSpeaking,
    AgentThinking,
    FunctionCallRequest(FunctionCallRequest),
    InvalidFunctionCall(InvalidFunctionCall),
    AgentStartedSpeaking(AgentStartedSpeaking),
    AgentAudioDone,
    EndOfThought,
    Error(ErrorEvent),
}

impl ServerEvent {
    /// Types a parsed JSON frame.
    ///
    /// Returns `Ok(None)` for well-formed frames of an unknown kind, and an
    /// error when the frame is not an object or a known kind has a payload
    /// that does not match its schema.
    pub fn from_value(value: Value) -> Result<Option<Self>, serde_json::Error> {
        if !value.is_object() {
            return Err(serde_json::Error::custom("control frame is not a JSON object"));
        }
        if value.get("role").is_some() {
            return Ok(Some(Self::ConversationText(serde_json::from_value(value)?)));
        }

        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return Ok(None);
        };
        let event = match kind {
            event_type::WELCOME => Self::Welcome,
            event_type::SETTINGS_APPLIED => Self::SettingsApplied,
            event_type::USER_STARTED_SPEAKING => Self::UserStartedSpeaking,
            event_type::AGENT_THINKING => Self::AgentThinking,
            event_type::AGENT_AUDIO_DONE => Self::AgentAudioDone,
            event_type::END_OF_THOUGHT => Self::EndOfThought,
            event_type::FUNCTION_CALL_REQUEST => {
                let call_id = value
                    .get("function_call_id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match (serde_json::from_value(value), call_id) {
                    (Ok(request), _) => Self::FunctionCallRequest(request),
                    (Err(e), Some(function_call_id)) => Self::InvalidFunctionCall(InvalidFunctionCall {
                        function_call_id,
                        reason: e.to_string(),
                    }),
                    (Err(e), None) => return Err(e),
                }
            }
            event_type::AGENT_STARTED_SPEAKING => {
                Self::AgentStartedSpeaking(serde_json::from_value(value)?)
            }
            event_type::ERROR => Self::Error(serde_json::from_value(value)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Parses a raw text frame. See [`ServerEvent::from_value`].
    pub fn parse(text: &str) -> Result<Option<Self>, serde_json::Error> {
        Self::from_value(serde_json::from_str(text)?)
    }
}
