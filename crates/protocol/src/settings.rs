//! The session-configuration payload and the override layer applied to it.

use crate::server::Role;
use crate::voices::default_voice;
use serde::Serialize;
use serde_json::Value;

/// Sample rate of microphone audio sent to the agent.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of synthesized audio received from the agent.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

const LINEAR16: &str = "linear16";
const DEFAULT_LISTEN_MODEL: &str = "46658e06-4884-4582-9bc2-e92ef7baa396";
const DEFAULT_THINK_PROVIDER: &str = "open_ai";
const DEFAULT_THINK_MODEL: &str = "gpt-4o";
const MEDICAL_GREETING: &str =
    "Hi I am Aura, your Medical Assistant! Which task would you like to start with?";

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SettingsConfiguration {
    pub audio: AudioConfig,
    pub agent: AgentConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextConfig>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AudioConfig {
    pub input: AudioInput,
    pub output: AudioOutput,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AudioInput {
    pub encoding: String,
    pub sample_rate: u32,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AudioOutput {
    pub encoding: String,
    pub sample_rate: u32,
    pub container: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input: AudioInput {
                encoding: LINEAR16.to_string(),
                sample_rate: INPUT_SAMPLE_RATE,
            },
            output: AudioOutput {
                encoding: LINEAR16.to_string(),
                sample_rate: OUTPUT_SAMPLE_RATE,
                container: "none".to_string(),
            },
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub listen: ListenConfig,
    pub think: ThinkConfig,
    pub speak: SpeakConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ListenConfig {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyterms: Option<Vec<String>>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ThinkConfig {
    pub provider: ThinkProvider,
    pub model: String,
    pub instructions: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionDefinition>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ThinkProvider {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_to_groq: Option<bool>,
}

/// Text-to-speech settings. Either `model` (a catalogue voice) or
/// `voice_id` + `provider` (a third-party voice) is set.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct SpeakConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rep_penalty: Option<f32>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ContextConfig {
    pub messages: Vec<ContextMessage>,
    pub replay: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}

/// A function the agent may invoke, with JSON-schema typed parameters.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl SettingsConfiguration {
    /// The medical-assistant session: the greeting is replayed on connect so
    /// the agent speaks first.
    pub fn medical_assistant(
        instructions: impl Into<String>,
        functions: Vec<FunctionDefinition>,
    ) -> Self {
        Self {
            audio: AudioConfig::default(),
            agent: AgentConfig {
                listen: ListenConfig {
                    model: DEFAULT_LISTEN_MODEL.to_string(),
                    keyterms: None,
                },
                think: ThinkConfig {
                    provider: ThinkProvider {
                        kind: DEFAULT_THINK_PROVIDER.to_string(),
                        fallback_to_groq: Some(false),
                    },
                    model: DEFAULT_THINK_MODEL.to_string(),
                    instructions: instructions.into(),
                    functions,
                },
                speak: SpeakConfig {
                    model: Some(default_voice().canonical_name.to_string()),
                    ..Default::default()
                },
            },
            context: Some(ContextConfig {
                messages: vec![ContextMessage {
                    role: Role::Assistant,
                    content: MEDICAL_GREETING.to_string(),
                }],
                replay: true,
            }),
        }
    }

    /// True when the agent opens the conversation by replaying a greeting.
    pub fn replays_greeting(&self) -> bool {
        self.context
            .as_ref()
            .is_some_and(|c| c.replay && c.messages.iter().any(|m| m.role == Role::Assistant))
    }
}

/// Appends user-supplied instructions to the base prompt.
pub fn combined_instructions(base: &str, custom: Option<&str>) -> String {
    match custom {
        Some(custom) if !custom.trim().is_empty() => format!("{}\n{}", base, custom),
        _ => base.to_string(),
    }
}

/// User-level adjustments layered over a base settings payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsOverrides {
    /// Catalogue voice name, or a provider voice id when `tts_provider` is set.
    pub voice: String,
    pub instructions: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temp: Option<f32>,
    pub rep_penalty: Option<f32>,
    pub tts_provider: Option<String>,
    pub keyterms: Vec<String>,
}

impl Default for SettingsOverrides {
    fn default() -> Self {
        Self {
            voice: default_voice().canonical_name.to_string(),
            instructions: None,
            provider: None,
            model: None,
            temp: None,
            rep_penalty: None,
            tts_provider: None,
            keyterms: Vec::new(),
        }
    }
}

impl SettingsOverrides {
    /// Produces the settings frame actually sent for `base`.
    pub fn apply(&self, base: &SettingsConfiguration) -> SettingsConfiguration {
        let mut settings = base.clone();

        settings.agent.listen.keyterms = Some(self.keyterms.clone());

        let think = &mut settings.agent.think;
        if let (Some(provider), Some(model)) = (&self.provider, &self.model) {
            think.provider = ThinkProvider {
                kind: provider.clone(),
                fallback_to_groq: None,
            };
            think.model = model.clone();
        }
        think.instructions =
            combined_instructions(&base.agent.think.instructions, self.instructions.as_deref());

        let mut speak = if self.voice.is_empty() {
            base.agent.speak.clone()
        } else if let Some(tts_provider) = &self.tts_provider {
            SpeakConfig {
                voice_id: Some(self.voice.clone()),
                provider: Some(tts_provider.clone()),
                ..Default::default()
            }
        } else {
            SpeakConfig {
                model: Some(self.voice.clone()),
                ..Default::default()
            }
        };
        if self.temp.is_some() {
            speak.temp = self.temp;
        }
        if self.rep_penalty.is_some() {
            speak.rep_penalty = self.rep_penalty;
        }
        settings.agent.speak = speak;

        settings
    }
}
