//! Wire types for the voice agent endpoint.
//!
//! The agent speaks a mixed protocol over one websocket: binary frames carry
//! raw PCM16 audio in both directions, text frames carry JSON control
//! messages. This crate only describes the JSON half:
//!
//! - `client`: frames the client sends (settings, updates, keepalive, function responses).
//! - `server`: events the agent emits and their payloads.
//! - `settings`: the session-configuration payload and the override layer applied to it.
//! - `voices`: the catalogue of selectable agent voices.

pub mod client;
pub mod server;
pub mod settings;
pub mod voices;

pub use client::{ClientMessage, FunctionOutput};
pub use server::{
    AgentStartedSpeaking, ConversationText, ErrorEvent, FunctionCallRequest, InvalidFunctionCall, Role,
    ServerEvent,
};
pub use settings::{
    FunctionDefinition, SettingsConfiguration, SettingsOverrides, combined_instructions,
};
pub use voices::{Voice, available_voices, default_voice, find_voice};
