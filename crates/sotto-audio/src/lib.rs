//! Audio capture for sotto.
//!
//! [`AudioRecorder`] is the recorder state machine. It drives microphone
//! hardware through the [`CaptureAdapter`] contract, which keeps the
//! backend swappable; [`CpalAdapter`] is the production implementation.

mod adapter;
mod capture;
mod recorder;

pub use adapter::{
    CaptureAdapter, CaptureError, CaptureHandle, CaptureHandlers, DataCallback, ErrorCallback,
    StopCallback,
};
pub use capture::{CpalAdapter, CpalHandle, MicStream};
pub use recorder::{
    AudioRecorder, DEFAULT_MIME_TYPE, RecorderError, RecordingResult, Subscription,
};
