use medvoice_protocol::{SettingsOverrides, default_voice, find_voice};
use secrecy::SecretString;
use std::path::PathBuf;
use tracing::Level;

/// Endpoint of the hosted voice agent.
pub const DEFAULT_AGENT_URL: &str = "wss://agent.deepgram.com/v1/agent/converse";

/// Base prompt for the medical assistant when none is configured.
pub const DEFAULT_INSTRUCTIONS: &str = "You are Aura, a medical assistant that helps a clinician \
dictate clinical notes by voice.

Collect the note one field at a time: patient name, date of birth, gender, medical record number, \
visit date, visit time, visit type, provider, chief complaint, history of present illness, review \
of systems, physical examination, assessment and plan. Call the matching function as soon as the \
clinician gives you a value. Use other_notes for anything that fits no field.

When the clinician says the note is complete, call save_note. When they ask to start over, call \
clear_note.

Keep every reply short and direct. Never invent clinical details and never give medical advice.";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where the token for each connection attempt comes from.
#[derive(Clone, Debug)]
pub enum CredentialSource {
    /// A long-lived API key.
    ApiKey(SecretString),
    /// An HTTP endpoint that mints a short-lived key per request.
    Endpoint(String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub agent_url: String,
    pub credential: CredentialSource,
    /// Canonical model name of the agent voice.
    pub voice: String,
    /// The base prompt. Custom instructions are appended to it.
    pub instructions: String,
    pub custom_instructions: Option<String>,
    pub think_provider: Option<String>,
    pub think_model: Option<String>,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let agent_url = std::env::var("AGENT_URL").unwrap_or_else(|_| DEFAULT_AGENT_URL.to_string());
        if !agent_url.starts_with("wss://") && !agent_url.starts_with("ws://") {
            return Err(ConfigError::InvalidValue(
                "AGENT_URL".to_string(),
                format!("'{}' is not a websocket URL", agent_url),
            ));
        }

        let credential = match (
            non_empty_var("DEEPGRAM_API_KEY"),
            non_empty_var("CREDENTIAL_URL"),
        ) {
            (Some(key), _) => CredentialSource::ApiKey(SecretString::from(key)),
            (None, Some(url)) => CredentialSource::Endpoint(url),
            (None, None) => {
                return Err(ConfigError::MissingVar(
                    "DEEPGRAM_API_KEY or CREDENTIAL_URL must be set".to_string(),
                ));
            }
        };

        let voice = match non_empty_var("AGENT_VOICE") {
            Some(query) => resolve_voice(&query)
                .map_err(|reason| ConfigError::InvalidValue("AGENT_VOICE".to_string(), reason))?,
            None => default_voice().canonical_name.to_string(),
        };

        let instructions = match non_empty_var("AGENT_INSTRUCTIONS_PATH") {
            Some(path) => {
                let path = PathBuf::from(path);
                std::fs::read_to_string(&path).map_err(|e| {
                    ConfigError::InvalidValue(
                        "AGENT_INSTRUCTIONS_PATH".to_string(),
                        format!("cannot read {}: {}", path.display(), e),
                    )
                })?
            }
            None => DEFAULT_INSTRUCTIONS.to_string(),
        };
        let custom_instructions = non_empty_var("AGENT_INSTRUCTIONS");

        let think_provider = non_empty_var("THINK_PROVIDER");
        let think_model = non_empty_var("THINK_MODEL");
        if think_provider.is_some() != think_model.is_some() {
            return Err(ConfigError::InvalidValue(
                "THINK_PROVIDER".to_string(),
                "THINK_PROVIDER and THINK_MODEL must be set together".to_string(),
            ));
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            agent_url,
            credential,
            voice,
            instructions,
            custom_instructions,
            think_provider,
            think_model,
            log_level,
        })
    }

    /// The per-run settings layer built from this configuration.
    pub fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            voice: self.voice.clone(),
            instructions: self.custom_instructions.clone(),
            provider: self.think_provider.clone(),
            model: self.think_model.clone(),
            ..Default::default()
        }
    }
}

/// Maps a voice display name or canonical name to its canonical name.
pub fn resolve_voice(query: &str) -> Result<String, String> {
    find_voice(query)
        .map(|voice| voice.canonical_name.to_string())
        .ok_or_else(|| format!("'{}' is not a known voice", query))
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("AGENT_URL");
            env::remove_var("DEEPGRAM_API_KEY");
            env::remove_var("CREDENTIAL_URL");
            env::remove_var("AGENT_VOICE");
            env::remove_var("AGENT_INSTRUCTIONS");
            env::remove_var("AGENT_INSTRUCTIONS_PATH");
            env::remove_var("THINK_PROVIDER");
            env::remove_var("THINK_MODEL");
            env::remove_var("RUST_LOG");
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("DEEPGRAM_API_KEY", "test-deepgram-key");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    fn test_resolve_voice() {
        assert_eq!(resolve_voice("Luna").unwrap(), "aura-2-speaker-180");
        assert_eq!(resolve_voice("aura-2-speaker-31").unwrap(), "aura-2-speaker-31");
        assert!(resolve_voice("Nobody").is_err());
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.agent_url, DEFAULT_AGENT_URL);
        match &config.credential {
            CredentialSource::ApiKey(key) => assert_eq!(key.expose_secret(), "test-deepgram-key"),
            other => panic!("Expected an API key, got {:?}", other),
        }
        assert_eq!(config.voice, "aura-2-speaker-45");
        assert_eq!(config.instructions, DEFAULT_INSTRUCTIONS);
        assert_eq!(config.custom_instructions, None);
        assert_eq!(config.think_provider, None);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("AGENT_URL", "ws://127.0.0.1:9000/agent");
            env::set_var("CREDENTIAL_URL", "http://127.0.0.1:9000/token");
            env::set_var("AGENT_VOICE", "Orion");
            env::set_var("AGENT_INSTRUCTIONS", "Speak slowly.");
            env::set_var("THINK_PROVIDER", "anthropic");
            env::set_var("THINK_MODEL", "claude-3-haiku-20240307");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.agent_url, "ws://127.0.0.1:9000/agent");
        match &config.credential {
            CredentialSource::Endpoint(url) => assert_eq!(url, "http://127.0.0.1:9000/token"),
            other => panic!("Expected a credential endpoint, got {:?}", other),
        }
        assert_eq!(config.voice, "aura-2-speaker-31");
        assert_eq!(config.custom_instructions.as_deref(), Some("Speak slowly."));
        assert_eq!(config.log_level, Level::DEBUG);

        let overrides = config.overrides();
        assert_eq!(overrides.voice, "aura-2-speaker-31");
        assert_eq!(overrides.provider.as_deref(), Some("anthropic"));
        assert_eq!(overrides.model.as_deref(), Some("claude-3-haiku-20240307"));
    }

    #[test]
    #[serial]
    fn test_api_key_wins_over_credential_url() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("CREDENTIAL_URL", "http://127.0.0.1:9000/token");
        }

        let config = Config::from_env().unwrap();
        assert!(matches!(config.credential, CredentialSource::ApiKey(_)));
    }

    #[test]
    #[serial]
    fn test_instructions_read_from_file() {
        clear_env_vars();
        set_minimal_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "You are a terse scribe.").unwrap();
        unsafe {
            env::set_var("AGENT_INSTRUCTIONS_PATH", file.path());
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.instructions, "You are a terse scribe.");
    }

    #[test]
    #[serial]
    fn test_unreadable_instructions_file() {
        clear_env_vars();
        set_minimal_env();
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            env::set_var("AGENT_INSTRUCTIONS_PATH", dir.path().join("missing.md"));
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "AGENT_INSTRUCTIONS_PATH"),
            _ => panic!("Expected InvalidValue for AGENT_INSTRUCTIONS_PATH"),
        }
    }

    #[test]
    #[serial]
    fn test_config_missing_credentials() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("DEEPGRAM_API_KEY")),
            _ => panic!("Expected MissingVar for DEEPGRAM_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_values() {
        let cases = [
            ("AGENT_URL", "https://agent.example.com"),
            ("AGENT_VOICE", "Nobody"),
            ("THINK_PROVIDER", "anthropic"),
            ("RUST_LOG", "not-a-level"),
        ];
        for (var, value) in cases {
            clear_env_vars();
            set_minimal_env();
            unsafe {
                env::set_var(var, value);
            }

            match Config::from_env().unwrap_err() {
                ConfigError::InvalidValue(name, _) => assert_eq!(name, var),
                other => panic!("Expected InvalidValue for {}, got {:?}", var, other),
            }
        }
    }
}
