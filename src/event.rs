//! Application events for the frontend loop.

use sotto_core::RecorderSnapshot;

/// Events delivered to the frontend loop by the recorder subscription
/// and the transcription pipeline.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// The recorder published a new snapshot
    StateChanged(RecorderSnapshot),
    /// A transcription finished
    TranscriptReady(String),
    /// A transcription failed after its retries
    TranscriptFailed(String),
}
