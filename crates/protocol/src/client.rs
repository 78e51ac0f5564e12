//! Control frames sent from the client to the agent.

use crate::settings::SettingsConfiguration;
use serde::{Deserialize, Serialize};

/// The outcome string attached to a `FunctionCallResponse`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FunctionOutput {
    Success,
    Error,
}

/// Messages sent from the client to the agent endpoint.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Full session configuration. Sent once, immediately after the socket opens.
    SettingsConfiguration(SettingsConfiguration),
    /// Switches the agent voice on a live session.
    UpdateSpeak { model: String },
    /// Replaces the agent instructions on a live session.
    UpdateInstructions { instructions: String },
    /// Answers a `FunctionCallRequest`, correlated by its call id.
    FunctionCallResponse {
        function_call_id: String,
        output: FunctionOutput,
    },
    /// Heartbeat that keeps an idle connection from being dropped.
    KeepAlive,
}

impl ClientMessage {
    /// Serializes the message into the JSON text frame sent on the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// The `type` tag of this message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::SettingsConfiguration(_) => "SettingsConfiguration",
            ClientMessage::UpdateSpeak { .. } => "UpdateSpeak",
            ClientMessage::UpdateInstructions { .. } => "UpdateInstructions",
            ClientMessage::FunctionCallResponse { .. } => "FunctionCallResponse",
            ClientMessage::KeepAlive => "KeepAlive",
        }
    }
}
