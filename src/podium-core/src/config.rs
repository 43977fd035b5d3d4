//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::DebateError;
use crate::persona::{self, Persona};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    /// Extra personas merged over the built-in roster; a matching id replaces
    /// the built-in entry.
    #[serde(default)]
    pub personas: Vec<PersonaConfig>,
}

/// Model names for the two kinds of completion.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    pub chat: String,
    pub summary: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            chat: "gpt-4o-mini".to_string(),
            summary: "gpt-4o-mini".to_string(),
        }
    }
}

/// Defaults applied when the command line leaves a setting out.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    pub mode: String,
    pub length: String,
    pub language: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            mode: "formal".to_string(),
            length: "medium".to_string(),
            language: "English".to_string(),
        }
    }
}

/// A persona as written in a config file. Only id and name are required.
#[derive(Debug, Clone, Deserialize)]
pub struct PersonaConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub biography: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub core: String,
}

impl PersonaConfig {
    fn into_persona(self) -> Persona {
        let mut persona = Persona::new(self.id, self.name)
            .with_description(self.description)
            .with_biography(self.biography)
            .with_core(self.core);
        if let Some(voice) = self.voice {
            persona = persona.with_voice(voice);
        }
        persona
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DebateError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DebateError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from string content.
    pub fn parse(content: &str) -> Result<Self, DebateError> {
        toml::from_str(content)
            .map_err(|e| DebateError::Config(format!("Failed to parse config: {e}")))
    }

    /// The full roster: built-in personas with config entries merged in.
    pub fn roster(&self) -> Vec<Persona> {
        let mut roster = persona::builtin_roster();
        for entry in self.personas.iter().cloned() {
            let persona = entry.into_persona();
            match roster.iter_mut().find(|p| p.id == persona.id) {
                Some(existing) => *existing = persona,
                None => roster.push(persona),
            }
        }
        roster
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_builtin_roster() {
        let config = Config::default();
        let roster = config.roster();
        assert!(roster.len() >= 6);
        assert!(persona::find_persona(&roster, "frank-miller").is_some());
    }

    #[test]
    fn test_parse_overrides_and_extends_roster() {
        let config = Config::parse(
            r#"
            [models]
            chat = "local-chat"
            summary = "local-summary"

            [[personas]]
            id = "frank-miller"
            name = "Frank Miller"
            core = "You are quieter these days."

            [[personas]]
            id = "new-voice"
            name = "New Voice"
            voice = "am_adam"
            "#,
        )
        .unwrap();

        assert_eq!(config.models.chat, "local-chat");
        let roster = config.roster();
        let frank = persona::find_persona(&roster, "frank-miller").unwrap();
        assert_eq!(frank.core, "You are quieter these days.");
        let added = persona::find_persona(&roster, "new-voice").unwrap();
        assert_eq!(added.voice, "am_adam");
    }

    #[test]
    fn test_parse_rejects_bad_toml() {
        assert!(Config::parse("models = 3").is_err());
    }
}
