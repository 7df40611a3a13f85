//! Core types and configuration for sotto.
//!
//! This crate provides platform-agnostic types that can be used across
//! all sotto sub-crates.

mod config;
mod presets;
mod state;

pub use config::{Config, ConfigManager};
pub use presets::{PROMPT_PRESETS, PromptPreset, default_preset, preset_by_id};
pub use state::{RecorderSnapshot, RecorderState, UNKNOWN_FAILURE_MESSAGE};

/// Application name
pub const APP_NAME: &str = "sotto";

/// Pretty application name for display
pub const APP_NAME_PRETTY: &str = "Sotto";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";
