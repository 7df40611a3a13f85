//! Recorder state types.

/// Message published when a failure carries no description of its own.
pub const UNKNOWN_FAILURE_MESSAGE: &str = "recording failed for an unknown reason";

/// The current state of the recorder lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// Idle, no session in progress
    Idle,
    /// Waiting for the platform to grant microphone access
    RequestingPermission,
    /// Actively recording audio
    Recording,
    /// Stop requested, waiting for the final data and stop notification
    Stopping,
    /// The last session ended in a failure; see the snapshot message
    Error,
}

impl RecorderState {
    /// Stable lowercase name, used for logging and status display.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecorderState::Idle => "idle",
            RecorderState::RequestingPermission => "requesting-permission",
            RecorderState::Recording => "recording",
            RecorderState::Stopping => "stopping",
            RecorderState::Error => "error",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, RecorderState::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, RecorderState::Recording)
    }

    /// True while a transition is in flight and new commands should wait.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            RecorderState::RequestingPermission | RecorderState::Stopping
        )
    }
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable view of the recorder published to observers on every
/// transition.
///
/// A message is present exactly when the state is [`RecorderState::Error`];
/// the constructors are the only way to build a snapshot, so the pairing
/// cannot drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderSnapshot {
    state: RecorderState,
    error: Option<String>,
}

impl RecorderSnapshot {
    /// Snapshot for a non-error state.
    pub fn new(state: RecorderState) -> Self {
        debug_assert!(
            state != RecorderState::Error,
            "error snapshots must carry a message, use failed()"
        );
        Self { state, error: None }
    }

    /// Snapshot for the error state. Blank messages are replaced with
    /// [`UNKNOWN_FAILURE_MESSAGE`] so observers never render an empty
    /// failure.
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            UNKNOWN_FAILURE_MESSAGE.to_string()
        } else {
            message
        };
        Self {
            state: RecorderState::Error,
            error: Some(message),
        }
    }

    pub const fn idle() -> Self {
        Self {
            state: RecorderState::Idle,
            error: None,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl Default for RecorderSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}
