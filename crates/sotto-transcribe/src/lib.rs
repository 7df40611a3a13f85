//! Transcription backend library for sotto.
//!
//! This crate provides a trait-based abstraction for audio transcription,
//! with an implementation for Google's Gemini API.

mod gemini;

use async_trait::async_trait;
pub use bytes::Bytes;
pub use gemini::{DEFAULT_MODEL, GeminiClient, GeminiConfig};
use thiserror::Error;

/// Errors that can occur during transcription.
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("No API key configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Model returned no transcript")]
    EmptyTranscript,

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),
}

/// Result type for transcription operations.
pub type Result<T> = std::result::Result<T, TranscribeError>;

/// What the model should do with a recording. Fields left unset fall
/// back to the client's defaults.
#[derive(Debug, Clone, Default)]
pub struct TranscriptionRequest {
    /// Model override
    pub model: Option<String>,
    /// Prompt steering the output; a plain-transcript prompt is used
    /// when unset
    pub prompt: Option<String>,
}

/// Trait for transcription backends.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe audio to text.
    ///
    /// # Arguments
    /// * `audio` - Encoded audio as reference-counted bytes, so retries
    ///   do not copy the recording
    /// * `mime_type` - Mime type of `audio` (e.g. "audio/wav")
    /// * `request` - Model and prompt selection
    async fn transcribe(
        &self,
        audio: Bytes,
        mime_type: &str,
        request: &TranscriptionRequest,
    ) -> Result<String>;

    /// Returns the name of this transcriber for logging/debugging.
    fn name(&self) -> &str;
}
