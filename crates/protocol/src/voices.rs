//! Catalogue of agent voices.

/// A selectable text-to-speech voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice {
    /// Display name.
    pub name: &'static str,
    /// Model identifier sent in `speak.model` / `UpdateSpeak`.
    pub canonical_name: &'static str,
    pub accent: &'static str,
    pub gender: &'static str,
}

const VOICES: [Voice; 4] = [
    Voice {
        name: "Asteria",
        canonical_name: "aura-2-speaker-45",
        accent: "American",
        gender: "Female",
    },
    Voice {
        name: "Orion",
        canonical_name: "aura-2-speaker-31",
        accent: "American",
        gender: "Male",
    },
    Voice {
        name: "Luna",
        canonical_name: "aura-2-speaker-180",
        accent: "American",
        gender: "Female",
    },
    Voice {
        name: "Arcas",
        canonical_name: "aura-2-speaker-225",
        accent: "American",
        gender: "Male",
    },
];

pub fn available_voices() -> &'static [Voice] {
    &VOICES
}

pub fn default_voice() -> &'static Voice {
    &VOICES[0]
}

/// Looks a voice up by display name (case-insensitive) or canonical name.
pub fn find_voice(query: &str) -> Option<&'static Voice> {
    let query = query.trim();
    VOICES
        .iter()
        .find(|v| v.canonical_name == query || v.name.eq_ignore_ascii_case(query))
}
