//! Capture adapter contract.
//!
//! The recorder state machine drives microphone hardware through this
//! contract instead of a concrete platform API, so the production cpal
//! backend and a deterministic test fake are interchangeable.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors reported by capture adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Microphone permission was refused
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No usable recording device
    #[error("no input device available")]
    NoInputDevice,

    /// Capture is not possible in this environment
    #[error("audio capture is not supported: {0}")]
    Unsupported(String),

    /// The device negotiated a sample format we cannot encode
    #[error("sample format not supported: {0}")]
    SampleFormatNotSupported(String),

    /// A backend stream failure, message passed through verbatim
    #[error("{0}")]
    Stream(String),
}

/// Callback invoked with each non-empty chunk of encoded audio.
pub type DataCallback = Arc<dyn Fn(Bytes) + Send + Sync + 'static>;

/// Callback invoked at most once when the handle fails. Terminal for the
/// handle; no further callbacks follow it.
pub type ErrorCallback = Arc<dyn Fn(CaptureError) + Send + Sync + 'static>;

/// Callback invoked at most once after a requested stop has flushed all
/// remaining data. Never invoked after the error callback.
pub type StopCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// The callbacks a recorder handle reports through.
///
/// Implementations may invoke these from a capture thread; the functions
/// must not assume the caller's thread.
#[derive(Clone)]
pub struct CaptureHandlers {
    pub on_data: DataCallback,
    pub on_error: ErrorCallback,
    pub on_stop: StopCallback,
}

/// A live recorder bound to one acquired stream.
pub trait CaptureHandle: Send + Sync + 'static {
    /// Begin delivering audio through the data callback.
    fn start(&self) -> Result<(), CaptureError>;

    /// Request a stop. Completion is reported through the stop callback
    /// (or the error callback), not by this call returning.
    fn stop(&self) -> Result<(), CaptureError>;

    /// Release the device and any buffered data. Idempotent, never fails.
    fn dispose(&self);

    /// Negotiated mime type of the delivered chunks, if known.
    fn mime_type(&self) -> Option<&str>;
}

/// Platform microphone binding: request a stream, then bind a recorder
/// to it.
#[async_trait]
pub trait CaptureAdapter: Send + Sync {
    /// An acquired but not yet recording stream.
    type Stream: Send;
    /// The recorder handle this adapter produces.
    type Handle: CaptureHandle;

    /// Acquire a live input stream. On failure nothing is left
    /// half-acquired.
    async fn request_stream(&self) -> Result<Self::Stream, CaptureError>;

    /// Bind a recorder to the stream, wiring the callbacks.
    fn create_recorder(
        &self,
        stream: Self::Stream,
        handlers: CaptureHandlers,
    ) -> Result<Self::Handle, CaptureError>;
}
