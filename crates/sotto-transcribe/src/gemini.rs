//! Gemini API transcription backend.
//!
//! Sends the recording inline (base64) to the generateContent endpoint
//! and extracts the first non-empty text part of the response.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, TranscribeError, Transcriber, TranscriptionRequest};

const GENERATE_CONTENT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Default model when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-09-2025";

/// Prompt used when the request carries none.
const DEFAULT_PROMPT: &str = "Provide a transcript of this audio clip.";

/// Configuration for the Gemini transcription client.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Gemini API key
    pub api_key: String,

    /// Model to use (defaults to [`DEFAULT_MODEL`])
    pub model: Option<String>,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Returns the configured model or the default.
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Gemini generateContent API client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        Self::new(GeminiConfig::new(api_key))
    }
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData<'a>>,
}

#[derive(Serialize)]
struct InlineData<'a> {
    #[serde(rename = "mimeType")]
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// First non-empty text part across candidates, trimmed.
fn extract_transcript(response: GenerateContentResponse) -> Result<String> {
    for candidate in response.candidates {
        let Some(content) = candidate.content else {
            continue;
        };
        for part in content.parts {
            if let Some(text) = part.text {
                let text = text.trim();
                if !text.is_empty() {
                    return Ok(text.to_string());
                }
            }
        }
    }
    Err(TranscribeError::EmptyTranscript)
}

#[async_trait]
impl Transcriber for GeminiClient {
    async fn transcribe(
        &self,
        audio: Bytes,
        mime_type: &str,
        request: &TranscriptionRequest,
    ) -> Result<String> {
        let api_key = self.config.api_key.trim();
        if api_key.is_empty() {
            return Err(TranscribeError::NoApiKey);
        }

        let model = request.model.as_deref().unwrap_or_else(|| self.config.model());
        let prompt = request.prompt.as_deref().unwrap_or(DEFAULT_PROMPT);

        debug!(
            model = model,
            mime_type = mime_type,
            audio_bytes = audio.len(),
            "Sending transcription request to Gemini"
        );

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part {
                        text: Some(prompt),
                        inline_data: None,
                    },
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type,
                            data: BASE64.encode(&audio),
                        }),
                    },
                ],
            }],
        };

        let url = format!("{GENERATE_CONTENT_ENDPOINT}/{model}:generateContent");
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::ApiError(format!(
                "API returned {status}: {body}"
            )));
        }

        let response: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| TranscribeError::TranscriptionFailed(e.to_string()))?;

        extract_transcript(response)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
