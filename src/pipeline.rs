use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use sotto_audio::RecordingResult;
use sotto_core::Config;
use sotto_transcribe::{GeminiClient, Transcriber, TranscriptionRequest};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::event::AppEvent;

/// Processing pipeline for finished recordings. This accepts the audio a
/// stop produced and carries it through transcription, delivering the
/// outcome back to the frontend as app events in submit order.
pub struct TranscribePipeline {
    transcriber: Option<Arc<dyn Transcriber>>,
    config: Arc<RwLock<Config>>,
    transcription_handles: mpsc::UnboundedSender<TranscriptionTask>,
}

type TranscriptionTask = tokio::task::JoinHandle<TaskOutcome>;

pub enum SubmitResult {
    Sent,
    Discarded,
    NotConfigured,
}

impl TranscribePipeline {
    /// Create a pipeline with the Gemini backend from the config. Must be
    /// called from within a tokio runtime; transcriptions and the results
    /// collector run on it.
    pub fn new(config: Arc<RwLock<Config>>, event_sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        let transcriber = config
            .read()
            .key_gemini()
            .map(|key| Arc::new(GeminiClient::from_api_key(key)) as Arc<dyn Transcriber>);
        Self::with_transcriber(transcriber, config, event_sender)
    }

    /// Create a pipeline over a specific transcription backend, or none.
    pub fn with_transcriber(
        transcriber: Option<Arc<dyn Transcriber>>,
        config: Arc<RwLock<Config>>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let transcription_handles = start_results_collector(event_sender);
        Self {
            transcriber,
            config,
            transcription_handles,
        }
    }

    /// Submits a finished recording to the processing pipeline. This is
    /// non-blocking and all recordings are processed in order.
    pub fn submit(&self, recording: RecordingResult) -> anyhow::Result<SubmitResult> {
        info!(
            bytes = recording.audio().len(),
            format = recording.format(),
            length = ?recording.duration(),
            "audio submitted"
        );

        // A recording without a known length is never discarded
        if let Some(duration) = recording.duration() {
            if duration < self.config.read().discard_duration() {
                info!(discard_duration = ?self.config.read().discard_duration(), "discarding recording");
                return Ok(SubmitResult::Discarded);
            }
        }

        let Some(transcriber) = self.transcriber.clone() else {
            warn!("No Gemini API key configured, dropping recording");
            return Ok(SubmitResult::NotConfigured);
        };
        let config = self.config.clone();

        // Spawn a new task to handle the transcription
        let handle = tokio::spawn(transcribe(transcriber, config, recording));

        // Send the transcription task to the collector
        self.transcription_handles.send(handle)?;
        Ok(SubmitResult::Sent)
    }
}

/// Helper to call the transcription backend and collect some basic stats.
async fn transcribe(
    transcriber: Arc<dyn Transcriber>,
    config: Arc<RwLock<Config>>,
    recording: RecordingResult,
) -> TaskOutcome {
    let format = recording.format().to_string();
    let audio = recording.into_audio();
    let bytes = audio.len();
    let mut num_retries = config.read().retries;

    let request = {
        let config = config.read();
        TranscriptionRequest {
            model: config.model.clone(),
            prompt: Some(config.preset().prompt.to_string()),
        }
    };

    // Send off the audio to the backend for transcription
    let mut before = Instant::now();
    let mut result = transcriber.transcribe(audio.clone(), &format, &request).await;
    while result.is_err() && num_retries > 0 {
        warn!("Retrying transcription, previous error: {:?}", result);
        before = Instant::now();
        result = transcriber.transcribe(audio.clone(), &format, &request).await;
        num_retries -= 1;
    }
    let text = match result {
        Ok(text) => text,
        Err(err) => {
            return TaskOutcome::Failed {
                retries: config.read().retries,
                error: err.to_string(),
            };
        }
    };
    let duration = before.elapsed();

    let mb_per_second = bytes as f64 / (1024.0 * 1024.0) / duration.as_secs_f64();
    info!(
        duration = ?duration,
        mb_per_second = mb_per_second,
        "transcription completed"
    );

    TaskOutcome::Success(text)
}

enum TaskOutcome {
    Success(String),
    Failed { retries: u8, error: String },
}

fn start_results_collector(
    event_sender: mpsc::UnboundedSender<AppEvent>,
) -> mpsc::UnboundedSender<TranscriptionTask> {
    let (task_sender, mut task_receiver) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(task) = task_receiver.recv().await {
            match task.await {
                Ok(TaskOutcome::Success(text)) => {
                    info!("Transcription: {}", text);
                    event_sender.send(AppEvent::TranscriptReady(text)).ok();
                }
                Ok(TaskOutcome::Failed { retries, error }) => {
                    error!("Transcription failed after {} retries: {}", retries, error);
                    event_sender.send(AppEvent::TranscriptFailed(error)).ok();
                }
                Err(e) => {
                    error!("Error joining transcription task: {:?}", e);
                }
            }
        }

        // The sender side dropping is the normal shutdown path
        debug!("Results collector task ended");
    });

    task_sender
}
