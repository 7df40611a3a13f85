// Re-export from sub-crates
pub use sotto_core::{
    APP_NAME, APP_NAME_PRETTY, Config, ConfigManager, DEFAULT_LOG_LEVEL, PROMPT_PRESETS,
    PromptPreset, RecorderSnapshot, RecorderState,
};
pub use sotto_audio::{
    AudioRecorder, CaptureAdapter, CaptureError, CpalAdapter, RecorderError, RecordingResult,
    Subscription,
};
pub use sotto_transcribe::{
    DEFAULT_MODEL, GeminiClient, GeminiConfig, TranscribeError, Transcriber,
};

// App-specific modules
pub mod event;
pub mod notify;
pub mod pipeline;

// Version from this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
