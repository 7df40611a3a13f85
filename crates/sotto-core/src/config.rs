//! Configuration management for sotto.
//!
//! This module provides core configuration that doesn't depend on
//! platform-specific libraries.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::presets::{PromptPreset, default_preset, preset_by_id};
use crate::APP_NAME;

/// Core configuration structure for the application.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Gemini API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_key: Option<String>,

    /// Model to use for transcriptions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Prompt preset id deciding what the model does with a recording
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Copy finished transcripts to the system clipboard
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub copy_to_clipboard: bool,

    /// Discard recordings under this duration (in seconds)
    #[serde(
        default = "default_discard_duration",
        skip_serializing_if = "is_default_discard_duration"
    )]
    pub discard_duration: f32,

    /// Number of retries for failed transcription requests
    #[serde(
        default = "default_retries",
        skip_serializing_if = "is_default_retries"
    )]
    pub retries: u8,
}

fn default_true() -> bool {
    true
}

fn is_true(v: &bool) -> bool {
    *v
}

fn default_discard_duration() -> f32 {
    0.3
}

fn is_default_discard_duration(v: &f32) -> bool {
    (*v - 0.3).abs() < f32::EPSILON
}

fn default_retries() -> u8 {
    1
}

fn is_default_retries(v: &u8) -> bool {
    *v == 1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_key: None,
            model: None,
            prompt: None,
            copy_to_clipboard: true,
            discard_duration: default_discard_duration(),
            retries: default_retries(),
        }
    }
}

impl Config {
    /// Get the Gemini API key
    pub fn key_gemini(&self) -> Option<&str> {
        self.gemini_key.as_deref()
    }

    /// Get the model name
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Get the prompt preset named by the config, falling back to the
    /// default preset when unset or unknown.
    pub fn preset(&self) -> &'static PromptPreset {
        self.prompt
            .as_deref()
            .and_then(preset_by_id)
            .unwrap_or_else(default_preset)
    }

    /// Get the discard duration as a Duration
    pub fn discard_duration(&self) -> Duration {
        Duration::from_secs_f32(self.discard_duration)
    }
}

/// Manages loading and saving configuration files.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager with the default configuration directory.
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Creates a new ConfigManager with a specified configuration directory.
    #[cfg(test)]
    pub fn with_config_dir<P: AsRef<std::path::Path>>(dir: P) -> Self {
        let config_path = dir.as_ref().join(format!("{}.toml", APP_NAME));
        Self { config_path }
    }

    /// Returns the default path to the configuration file.
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to retrieve configuration directory")?;
        Ok(config_dir.join(APP_NAME).join(format!("{}.toml", APP_NAME)))
    }

    /// Loads the configuration from the config file or returns default.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config file at {:?}", self.config_path))?;

        let config: Config = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file at {:?}", self.config_path))?;

        if config.key_gemini().is_none() {
            warn!(
                "Gemini API key is not set. Transcriptions will not work without it. \
                 Set gemini_key in {:?}.",
                self.config_path
            );
        }

        Ok(config)
    }

    /// Saves the configuration to the config file.
    pub fn save(&self, config: &Config) -> Result<()> {
        let config_dir = self
            .config_path
            .parent()
            .with_context(|| format!("Failed to get parent directory of {:?}", self.config_path))?;

        fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config directory at {:?}", config_dir))?;

        let serialized =
            toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, serialized)
            .with_context(|| format!("Failed to write config file at {:?}", self.config_path))?;

        Ok(())
    }

    /// Returns the path to the configuration file.
    pub fn config_path(&self) -> &std::path::Path {
        &self.config_path
    }
}
