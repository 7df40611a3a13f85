//! The recorder state machine.
//!
//! [`AudioRecorder`] owns the recording lifecycle for one session at a
//! time: acquire the microphone through a [`CaptureAdapter`], buffer the
//! chunks its handle delivers, and hand the finished recording back from
//! `stop()`. Observers subscribe for state snapshots; every transition
//! publishes one after the state lock is released, so listeners may call
//! back into the recorder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use sotto_core::{RecorderSnapshot, RecorderState, UNKNOWN_FAILURE_MESSAGE};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use crate::adapter::{
    CaptureAdapter, CaptureError, CaptureHandle, CaptureHandlers, DataCallback, ErrorCallback,
    StopCallback,
};

/// Fallback mime type when a handle does not report one.
pub const DEFAULT_MIME_TYPE: &str = "audio/wav";

/// Errors surfaced by [`AudioRecorder`] operations.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// The operation is not allowed in the current state. Rejected at the
    /// call site and never published as a snapshot.
    #[error("{0}")]
    InvalidState(&'static str),

    /// Stream acquisition or handle setup failed.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// The capture handle reported an error mid-session.
    #[error("{0}")]
    RecordingFailed(String),

    /// A pending stop was preempted by `dispose`.
    #[error("recording was cancelled")]
    Cancelled,
}

type Result<T> = std::result::Result<T, RecorderError>;

/// A finished recording: the concatenated chunks in delivery order, their
/// mime type, and how long the session ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingResult {
    audio: Bytes,
    format: String,
    duration: Option<Duration>,
}

impl RecordingResult {
    pub fn new(audio: Bytes, format: impl Into<String>, duration: Option<Duration>) -> Self {
        Self {
            audio,
            format: format.into(),
            duration,
        }
    }

    pub fn audio(&self) -> &Bytes {
        &self.audio
    }

    pub fn into_audio(self) -> Bytes {
        self.audio
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    /// None only if the session never observed a start time.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn duration_ms(&self) -> Option<u128> {
        self.duration.map(|d| d.as_millis())
    }
}

type Listener = Arc<dyn Fn(&RecorderSnapshot) + Send + Sync + 'static>;

struct ListenerRegistry {
    entries: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn add(&self, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, listener));
        id
    }

    fn remove(&self, id: u64) {
        self.entries.lock().retain(|(entry_id, _)| *entry_id != id);
    }

    /// Notify over a snapshot of the registry, in subscription order, so
    /// listeners may unsubscribe (themselves included) mid-notification.
    fn notify(&self, snapshot: &RecorderSnapshot) {
        let listeners: Vec<Listener> = self.entries.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(snapshot);
        }
    }
}

/// Undo token returned by [`AudioRecorder::subscribe`]. Dropping it keeps
/// the listener registered; call [`Subscription::unsubscribe`] to remove
/// it.
pub struct Subscription {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    /// Remove the listener. Safe to call from inside a notification that
    /// includes this listener.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

struct Inner<H> {
    snapshot: RecorderSnapshot,
    chunks: Vec<Bytes>,
    handle: Option<Arc<H>>,
    started_at: Option<Instant>,
    pending_stop: Option<oneshot::Sender<Result<RecordingResult>>>,
    /// Bumped by every start and dispose. Callbacks carry the value they
    /// were wired with and are dropped when it no longer matches.
    session: u64,
}

impl<H> Inner<H> {
    fn new() -> Self {
        Self {
            snapshot: RecorderSnapshot::idle(),
            chunks: Vec::new(),
            handle: None,
            started_at: None,
            pending_stop: None,
            session: 0,
        }
    }

    fn state(&self) -> RecorderState {
        self.snapshot.state()
    }

    fn set_snapshot(&mut self, snapshot: RecorderSnapshot) -> RecorderSnapshot {
        self.snapshot = snapshot;
        self.snapshot.clone()
    }
}

/// Recorder state machine over a capture adapter.
pub struct AudioRecorder<A: CaptureAdapter> {
    adapter: A,
    inner: Arc<Mutex<Inner<A::Handle>>>,
    listeners: Arc<ListenerRegistry>,
}

impl<A: CaptureAdapter> AudioRecorder<A> {
    /// Create a recorder over the given adapter. The machine starts idle.
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            inner: Arc::new(Mutex::new(Inner::new())),
            listeners: Arc::new(ListenerRegistry::new()),
        }
    }

    pub fn state(&self) -> RecorderState {
        self.inner.lock().state()
    }

    pub fn snapshot(&self) -> RecorderSnapshot {
        self.inner.lock().snapshot.clone()
    }

    /// Register a listener for state snapshots. The current snapshot is
    /// delivered synchronously before this returns.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RecorderSnapshot) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let id = self.listeners.add(listener.clone());
        let snapshot = self.inner.lock().snapshot.clone();
        listener(&snapshot);
        Subscription {
            id,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    /// Acquire the microphone and begin recording.
    ///
    /// Only valid while idle. Publishes the requesting-permission
    /// snapshot before touching the adapter and the recording snapshot
    /// once the handle is live. On failure the machine lands in the
    /// error state and the cause is also returned to the caller.
    pub async fn start(&self) -> Result<()> {
        let (session, snapshot) = {
            let mut inner = self.inner.lock();
            if inner.state() != RecorderState::Idle {
                return Err(RecorderError::InvalidState("recorder must be idle to start"));
            }
            inner.session += 1;
            inner.chunks.clear();
            let snapshot =
                inner.set_snapshot(RecorderSnapshot::new(RecorderState::RequestingPermission));
            (inner.session, snapshot)
        };
        self.listeners.notify(&snapshot);

        let stream = match self.adapter.request_stream().await {
            Ok(stream) => stream,
            Err(err) => {
                fail_session(&self.inner, &self.listeners, session, err.to_string());
                return Err(RecorderError::Capture(err));
            }
        };

        // A dispose may have reset the machine while the request was in
        // flight; the fresh stream is released by dropping it.
        {
            let inner = self.inner.lock();
            if inner.session != session || inner.state() != RecorderState::RequestingPermission {
                return Err(RecorderError::InvalidState("recorder was reset while starting"));
            }
        }

        let handlers = self.session_handlers(session);
        let handle = match self.adapter.create_recorder(stream, handlers) {
            Ok(handle) => Arc::new(handle),
            Err(err) => {
                fail_session(&self.inner, &self.listeners, session, err.to_string());
                return Err(RecorderError::Capture(err));
            }
        };

        {
            let mut inner = self.inner.lock();
            if inner.session != session || inner.state() != RecorderState::RequestingPermission {
                drop(inner);
                handle.dispose();
                return Err(RecorderError::InvalidState("recorder was reset while starting"));
            }
            inner.handle = Some(handle.clone());
            inner.started_at = Some(Instant::now());
        }

        if let Err(err) = handle.start() {
            fail_session(&self.inner, &self.listeners, session, err.to_string());
            return Err(RecorderError::Capture(err));
        }

        let snapshot = {
            let mut inner = self.inner.lock();
            if inner.session != session {
                return Err(RecorderError::InvalidState("recorder was reset while starting"));
            }
            if inner.state() != RecorderState::RequestingPermission {
                // An asynchronous handle error beat us to the transition.
                let message = inner
                    .snapshot
                    .error()
                    .unwrap_or(UNKNOWN_FAILURE_MESSAGE)
                    .to_owned();
                return Err(RecorderError::RecordingFailed(message));
            }
            inner.set_snapshot(RecorderSnapshot::new(RecorderState::Recording))
        };
        self.listeners.notify(&snapshot);
        Ok(())
    }

    /// Stop the current recording and return the captured audio.
    ///
    /// Only valid while recording. At most one stop can be pending; a
    /// second call while stopping is rejected, not queued. The returned
    /// future settles when the handle reports its stop (with the result),
    /// fails (with that failure), or the machine is disposed (with
    /// [`RecorderError::Cancelled`]).
    pub async fn stop(&self) -> Result<RecordingResult> {
        let (session, handle, rx, snapshot) = {
            let mut inner = self.inner.lock();
            if inner.state() != RecorderState::Recording {
                return Err(RecorderError::InvalidState(
                    "recorder is not currently recording",
                ));
            }
            let Some(handle) = inner.handle.clone() else {
                return Err(RecorderError::InvalidState(
                    "recorder is not currently recording",
                ));
            };
            let (tx, rx) = oneshot::channel();
            inner.pending_stop = Some(tx);
            let snapshot = inner.set_snapshot(RecorderSnapshot::new(RecorderState::Stopping));
            (inner.session, handle, rx, snapshot)
        };
        self.listeners.notify(&snapshot);

        if let Err(err) = handle.stop() {
            fail_session(&self.inner, &self.listeners, session, err.to_string());
            return Err(RecorderError::Capture(err));
        }

        match rx.await {
            Ok(result) => result,
            // The sender is dropped without a reply only if the machine
            // is torn down mid-stop.
            Err(_) => Err(RecorderError::Cancelled),
        }
    }

    /// Tear down whatever session exists and return to idle.
    ///
    /// Never fails and is idempotent. A pending stop is rejected with
    /// [`RecorderError::Cancelled`]; buffered chunks and any error are
    /// discarded. Publishes the idle snapshot only if the state actually
    /// changed.
    pub fn dispose(&self) {
        let (handle, pending, snapshot) = {
            let mut inner = self.inner.lock();
            inner.session += 1;
            inner.chunks.clear();
            inner.started_at = None;
            let handle = inner.handle.take();
            let pending = inner.pending_stop.take();
            let snapshot = if inner.state() != RecorderState::Idle {
                Some(inner.set_snapshot(RecorderSnapshot::idle()))
            } else {
                None
            };
            (handle, pending, snapshot)
        };
        if let Some(handle) = handle {
            handle.dispose();
        }
        if let Some(snapshot) = snapshot {
            self.listeners.notify(&snapshot);
        }
        if let Some(tx) = pending {
            let _ = tx.send(Err(RecorderError::Cancelled));
        }
    }

    /// Build the callbacks for one session. Each carries the session
    /// counter so events from a superseded handle are dropped.
    fn session_handlers(&self, session: u64) -> CaptureHandlers {
        let data_inner = self.inner.clone();
        let on_data: DataCallback = Arc::new(move |chunk: Bytes| {
            if chunk.is_empty() {
                return;
            }
            let mut inner = data_inner.lock();
            if inner.session != session {
                return;
            }
            match inner.state() {
                RecorderState::Recording | RecorderState::Stopping => inner.chunks.push(chunk),
                _ => debug!(bytes = chunk.len(), "dropping chunk outside an active recording"),
            }
        });

        let error_inner = self.inner.clone();
        let error_listeners = self.listeners.clone();
        let on_error: ErrorCallback = Arc::new(move |err: CaptureError| {
            fail_session(&error_inner, &error_listeners, session, err.to_string());
        });

        let stop_inner = self.inner.clone();
        let stop_listeners = self.listeners.clone();
        let on_stop: StopCallback = Arc::new(move || {
            finish_session(&stop_inner, &stop_listeners, session);
        });

        CaptureHandlers {
            on_data,
            on_error,
            on_stop,
        }
    }
}

impl<A: CaptureAdapter> Drop for AudioRecorder<A> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Shared failure path: release the session, publish the error snapshot,
/// reject a pending stop with the same message. Events from a superseded
/// session are dropped.
fn fail_session<H: CaptureHandle>(
    inner_arc: &Mutex<Inner<H>>,
    listeners: &ListenerRegistry,
    session: u64,
    message: String,
) {
    let (handle, pending, snapshot) = {
        let mut inner = inner_arc.lock();
        if inner.session != session {
            debug!(message = %message, "dropping stale capture error");
            return;
        }
        match inner.state() {
            RecorderState::RequestingPermission
            | RecorderState::Recording
            | RecorderState::Stopping => {}
            state => {
                debug!(state = %state, message = %message, "dropping capture error outside an active session");
                return;
            }
        }
        inner.chunks.clear();
        inner.started_at = None;
        let handle = inner.handle.take();
        let pending = inner.pending_stop.take();
        let snapshot = inner.set_snapshot(RecorderSnapshot::failed(message));
        (handle, pending, snapshot)
    };
    if let Some(handle) = handle {
        handle.dispose();
    }
    let message = snapshot
        .error()
        .unwrap_or(UNKNOWN_FAILURE_MESSAGE)
        .to_owned();
    debug!(error = %message, "recording session failed");
    listeners.notify(&snapshot);
    if let Some(tx) = pending {
        let _ = tx.send(Err(RecorderError::RecordingFailed(message)));
    }
}

/// Completion path for a requested stop: concatenate the chunks, release
/// the handle, publish idle, resolve the pending stop.
fn finish_session<H: CaptureHandle>(
    inner_arc: &Mutex<Inner<H>>,
    listeners: &ListenerRegistry,
    session: u64,
) {
    let (handle, pending, result, snapshot) = {
        let mut inner = inner_arc.lock();
        if inner.session != session || inner.state() != RecorderState::Stopping {
            debug!("dropping stop notification outside a pending stop");
            return;
        }
        let duration = inner.started_at.take().map(|started| started.elapsed());
        let handle = inner.handle.take();
        let format = handle
            .as_ref()
            .and_then(|h| h.mime_type())
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_owned();
        let mut audio = BytesMut::with_capacity(inner.chunks.iter().map(Bytes::len).sum());
        for chunk in inner.chunks.drain(..) {
            audio.extend_from_slice(&chunk);
        }
        let result = RecordingResult {
            audio: audio.freeze(),
            format,
            duration,
        };
        let pending = inner.pending_stop.take();
        let snapshot = inner.set_snapshot(RecorderSnapshot::idle());
        (handle, pending, result, snapshot)
    };
    if let Some(handle) = handle {
        handle.dispose();
    }
    debug!(bytes = result.audio.len(), duration = ?result.duration, "recording finished");
    listeners.notify(&snapshot);
    if let Some(tx) = pending {
        let _ = tx.send(Ok(result));
    } else {
        debug!("no pending stop, dropping recording result");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Deterministic adapter for driving the machine without hardware.
    /// Clones share state, so tests keep one to emit callbacks with.
    #[derive(Clone)]
    struct FakeAdapter {
        shared: Arc<FakeShared>,
    }

    #[derive(Default)]
    struct FakeShared {
        handlers: Mutex<Option<CaptureHandlers>>,
        fail_request: Mutex<Option<CaptureError>>,
        fail_create: Mutex<Option<CaptureError>>,
        fail_start: Mutex<Option<CaptureError>>,
        fail_stop: Mutex<Option<CaptureError>>,
        /// Chunk the handle flushes during its stop sequence, before the
        /// stop callback.
        final_chunk: Mutex<Option<Bytes>>,
        /// When set, `stop` fires the stop callback synchronously.
        auto_stop: AtomicBool,
        /// Gate released by the test before `request_stream` returns.
        request_gate: Mutex<Option<oneshot::Receiver<()>>>,
        mime: Mutex<Option<&'static str>>,
        dispose_calls: AtomicUsize,
    }

    impl FakeAdapter {
        /// Stops complete synchronously inside `handle.stop()`.
        fn new() -> Self {
            let adapter = Self::manual();
            adapter.shared.auto_stop.store(true, Ordering::SeqCst);
            adapter
        }

        /// Stops stay pending until the test calls `emit_stop`.
        fn manual() -> Self {
            let shared = FakeShared::default();
            *shared.mime.lock() = Some("audio/fake");
            Self {
                shared: Arc::new(shared),
            }
        }

        fn fail_next_request(&self, err: CaptureError) {
            *self.shared.fail_request.lock() = Some(err);
        }

        fn fail_next_create(&self, err: CaptureError) {
            *self.shared.fail_create.lock() = Some(err);
        }

        fn fail_next_start(&self, err: CaptureError) {
            *self.shared.fail_start.lock() = Some(err);
        }

        fn fail_next_stop(&self, err: CaptureError) {
            *self.shared.fail_stop.lock() = Some(err);
        }

        fn stage_final_chunk(&self, data: &[u8]) {
            *self.shared.final_chunk.lock() = Some(Bytes::copy_from_slice(data));
        }

        fn clear_mime(&self) {
            *self.shared.mime.lock() = None;
        }

        /// Holds the next `request_stream` until the returned sender
        /// fires.
        fn hold_next_request(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.shared.request_gate.lock() = Some(rx);
            tx
        }

        fn handlers(&self) -> CaptureHandlers {
            self.shared
                .handlers
                .lock()
                .clone()
                .expect("recorder not created")
        }

        fn emit_data(&self, data: &[u8]) {
            (self.handlers().on_data)(Bytes::copy_from_slice(data));
        }

        fn emit_error(&self, message: &str) {
            (self.handlers().on_error)(CaptureError::Stream(message.to_string()));
        }

        fn emit_stop(&self) {
            (self.handlers().on_stop)();
        }

        fn dispose_count(&self) -> usize {
            self.shared.dispose_calls.load(Ordering::SeqCst)
        }
    }

    struct FakeHandle {
        shared: Arc<FakeShared>,
    }

    impl CaptureHandle for FakeHandle {
        fn start(&self) -> std::result::Result<(), CaptureError> {
            if let Some(err) = self.shared.fail_start.lock().take() {
                return Err(err);
            }
            Ok(())
        }

        fn stop(&self) -> std::result::Result<(), CaptureError> {
            if let Some(err) = self.shared.fail_stop.lock().take() {
                return Err(err);
            }
            let Some(handlers) = self.shared.handlers.lock().clone() else {
                return Ok(());
            };
            if let Some(chunk) = self.shared.final_chunk.lock().take() {
                (handlers.on_data)(chunk);
            }
            if self.shared.auto_stop.load(Ordering::SeqCst) {
                (handlers.on_stop)();
            }
            Ok(())
        }

        fn dispose(&self) {
            self.shared.dispose_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn mime_type(&self) -> Option<&str> {
            *self.shared.mime.lock()
        }
    }

    #[async_trait]
    impl CaptureAdapter for FakeAdapter {
        type Stream = ();
        type Handle = FakeHandle;

        async fn request_stream(&self) -> std::result::Result<Self::Stream, CaptureError> {
            let gate = self.shared.request_gate.lock().take();
            if let Some(gate) = gate {
                gate.await.ok();
            }
            if let Some(err) = self.shared.fail_request.lock().take() {
                return Err(err);
            }
            Ok(())
        }

        fn create_recorder(
            &self,
            _stream: Self::Stream,
            handlers: CaptureHandlers,
        ) -> std::result::Result<Self::Handle, CaptureError> {
            if let Some(err) = self.shared.fail_create.lock().take() {
                return Err(err);
            }
            *self.shared.handlers.lock() = Some(handlers);
            Ok(FakeHandle {
                shared: self.shared.clone(),
            })
        }
    }

    fn record_snapshots(
        recorder: &AudioRecorder<FakeAdapter>,
    ) -> (Subscription, Arc<Mutex<Vec<RecorderSnapshot>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let subscription = recorder.subscribe(move |snapshot| sink.lock().push(snapshot.clone()));
        (subscription, log)
    }

    #[tokio::test]
    async fn test_new_subscriber_receives_current_snapshot() {
        let recorder = AudioRecorder::new(FakeAdapter::new());
        let (_sub, log) = record_snapshots(&recorder);

        assert_eq!(log.lock().len(), 1);
        assert_eq!(log.lock()[0].state(), RecorderState::Idle);
        assert!(log.lock()[0].error().is_none());
    }

    #[tokio::test]
    async fn test_start_walks_permission_then_recording() {
        let adapter = FakeAdapter::new();
        let recorder = AudioRecorder::new(adapter.clone());
        let (_sub, log) = record_snapshots(&recorder);

        recorder.start().await.unwrap();

        let states: Vec<RecorderState> = log.lock().iter().map(|s| s.state()).collect();
        assert_eq!(
            states,
            vec![
                RecorderState::Idle,
                RecorderState::RequestingPermission,
                RecorderState::Recording,
            ]
        );
        assert_eq!(recorder.state(), RecorderState::Recording);
    }

    #[tokio::test]
    async fn test_start_rejected_unless_idle() {
        let recorder = AudioRecorder::new(FakeAdapter::new());
        let (_sub, log) = record_snapshots(&recorder);
        recorder.start().await.unwrap();

        let seen = log.lock().len();
        let err = recorder.start().await.unwrap_err();
        assert!(matches!(err, RecorderError::InvalidState(_)));
        // a rejected call publishes nothing
        assert_eq!(log.lock().len(), seen);
    }

    #[tokio::test]
    async fn test_stop_rejected_unless_recording() {
        let recorder = AudioRecorder::new(FakeAdapter::new());
        let err = recorder.stop().await.unwrap_err();
        assert!(matches!(err, RecorderError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_stop_returns_chunks_in_delivery_order() {
        let adapter = FakeAdapter::new();
        let recorder = AudioRecorder::new(adapter.clone());
        recorder.start().await.unwrap();
        adapter.emit_data(b"a");
        adapter.emit_data(b"b");

        let result = recorder.stop().await.unwrap();
        assert_eq!(result.audio().as_ref(), b"ab");
        assert_eq!(result.format(), "audio/fake");
        assert!(result.duration_ms().is_some());
        assert_eq!(recorder.state(), RecorderState::Idle);
        assert_eq!(adapter.dispose_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_chunks_are_ignored() {
        let adapter = FakeAdapter::new();
        let recorder = AudioRecorder::new(adapter.clone());
        recorder.start().await.unwrap();
        adapter.emit_data(b"a");
        adapter.emit_data(b"");
        adapter.emit_data(b"b");

        let result = recorder.stop().await.unwrap();
        assert_eq!(result.audio().as_ref(), b"ab");
    }

    #[tokio::test]
    async fn test_chunk_flushed_during_stop_is_kept() {
        let adapter = FakeAdapter::new();
        adapter.stage_final_chunk(b"tail");
        let recorder = AudioRecorder::new(adapter.clone());
        recorder.start().await.unwrap();
        adapter.emit_data(b"head-");

        let result = recorder.stop().await.unwrap();
        assert_eq!(result.audio().as_ref(), b"head-tail");
    }

    #[tokio::test]
    async fn test_mime_falls_back_when_handle_reports_none() {
        let adapter = FakeAdapter::new();
        adapter.clear_mime();
        let recorder = AudioRecorder::new(adapter.clone());
        recorder.start().await.unwrap();

        let result = recorder.stop().await.unwrap();
        assert_eq!(result.format(), DEFAULT_MIME_TYPE);
    }

    #[tokio::test]
    async fn test_denied_stream_rejects_start_and_publishes_error() {
        let adapter = FakeAdapter::new();
        adapter.fail_next_request(CaptureError::Stream("mic denied".to_string()));
        let recorder = AudioRecorder::new(adapter.clone());
        let (_sub, log) = record_snapshots(&recorder);

        let err = recorder.start().await.unwrap_err();
        assert_eq!(err.to_string(), "mic denied");

        let last = log.lock().last().cloned().unwrap();
        assert_eq!(last.state(), RecorderState::Error);
        assert_eq!(last.error(), Some("mic denied"));
    }

    #[tokio::test]
    async fn test_create_recorder_failure_fails_the_start() {
        let adapter = FakeAdapter::new();
        adapter.fail_next_create(CaptureError::Unsupported("no encoder".to_string()));
        let recorder = AudioRecorder::new(adapter.clone());

        let err = recorder.start().await.unwrap_err();
        assert!(matches!(
            err,
            RecorderError::Capture(CaptureError::Unsupported(_))
        ));
        assert_eq!(recorder.state(), RecorderState::Error);
        // no handle was ever created, so nothing to release
        assert_eq!(adapter.dispose_count(), 0);
    }

    #[tokio::test]
    async fn test_handle_start_failure_fails_the_start() {
        let adapter = FakeAdapter::new();
        adapter.fail_next_start(CaptureError::Stream("device busy".to_string()));
        let recorder = AudioRecorder::new(adapter.clone());

        let err = recorder.start().await.unwrap_err();
        assert_eq!(err.to_string(), "device busy");
        assert_eq!(recorder.state(), RecorderState::Error);
        assert_eq!(adapter.dispose_count(), 1);
    }

    #[tokio::test]
    async fn test_device_error_mid_recording_publishes_and_releases() {
        let adapter = FakeAdapter::new();
        let recorder = AudioRecorder::new(adapter.clone());
        let (_sub, log) = record_snapshots(&recorder);
        recorder.start().await.unwrap();
        adapter.emit_data(b"a");

        adapter.emit_error("device lost");

        let last = log.lock().last().cloned().unwrap();
        assert_eq!(last.state(), RecorderState::Error);
        assert_eq!(last.error(), Some("device lost"));
        assert_eq!(adapter.dispose_count(), 1);

        // dispose clears the error and the next session starts clean
        recorder.dispose();
        assert_eq!(recorder.state(), RecorderState::Idle);
        recorder.start().await.unwrap();
        let result = recorder.stop().await.unwrap();
        assert!(result.audio().is_empty());
    }

    #[tokio::test]
    async fn test_chunks_after_error_are_dropped() {
        let adapter = FakeAdapter::new();
        let recorder = AudioRecorder::new(adapter.clone());
        recorder.start().await.unwrap();
        adapter.emit_error("device lost");
        adapter.emit_data(b"late");

        recorder.dispose();
        recorder.start().await.unwrap();
        let result = recorder.stop().await.unwrap();
        assert!(result.audio().is_empty());
    }

    #[tokio::test]
    async fn test_blank_failure_message_gets_the_fallback() {
        let adapter = FakeAdapter::new();
        let recorder = AudioRecorder::new(adapter.clone());
        recorder.start().await.unwrap();

        adapter.emit_error("  ");

        assert_eq!(recorder.snapshot().error(), Some(UNKNOWN_FAILURE_MESSAGE));
    }

    #[tokio::test]
    async fn test_error_while_stopping_rejects_pending_stop() {
        let adapter = FakeAdapter::manual();
        let recorder = Arc::new(AudioRecorder::new(adapter.clone()));
        recorder.start().await.unwrap();
        adapter.emit_data(b"a");

        let stopper = {
            let recorder = recorder.clone();
            tokio::spawn(async move { recorder.stop().await })
        };
        tokio::task::yield_now().await;
        assert_eq!(recorder.state(), RecorderState::Stopping);

        adapter.emit_error("device lost");

        let err = stopper.await.unwrap().unwrap_err();
        assert!(matches!(err, RecorderError::RecordingFailed(ref m) if m == "device lost"));
        assert_eq!(recorder.state(), RecorderState::Error);
    }

    #[tokio::test]
    async fn test_second_stop_is_rejected_not_queued() {
        let adapter = FakeAdapter::manual();
        let recorder = Arc::new(AudioRecorder::new(adapter.clone()));
        recorder.start().await.unwrap();

        let stopper = {
            let recorder = recorder.clone();
            tokio::spawn(async move { recorder.stop().await })
        };
        tokio::task::yield_now().await;

        let err = recorder.stop().await.unwrap_err();
        assert!(matches!(err, RecorderError::InvalidState(_)));

        // the first stop still completes normally
        adapter.emit_stop();
        let result = stopper.await.unwrap().unwrap();
        assert_eq!(result.format(), "audio/fake");
    }

    #[tokio::test]
    async fn test_handle_stop_failure_rejects_immediately() {
        let adapter = FakeAdapter::new();
        adapter.fail_next_stop(CaptureError::Stream("encoder fault".to_string()));
        let recorder = AudioRecorder::new(adapter.clone());
        recorder.start().await.unwrap();

        let err = recorder.stop().await.unwrap_err();
        assert_eq!(err.to_string(), "encoder fault");
        assert_eq!(recorder.state(), RecorderState::Error);
        assert_eq!(adapter.dispose_count(), 1);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let adapter = FakeAdapter::new();
        let recorder = AudioRecorder::new(adapter.clone());
        recorder.start().await.unwrap();

        recorder.dispose();
        recorder.dispose();

        assert_eq!(recorder.state(), RecorderState::Idle);
        assert_eq!(adapter.dispose_count(), 1);
    }

    #[tokio::test]
    async fn test_dispose_from_idle_publishes_nothing() {
        let recorder = AudioRecorder::new(FakeAdapter::new());
        let (_sub, log) = record_snapshots(&recorder);

        recorder.dispose();

        // just the subscription snapshot
        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_dispose_cancels_pending_stop() {
        let adapter = FakeAdapter::manual();
        let recorder = Arc::new(AudioRecorder::new(adapter.clone()));
        recorder.start().await.unwrap();

        let stopper = {
            let recorder = recorder.clone();
            tokio::spawn(async move { recorder.stop().await })
        };
        tokio::task::yield_now().await;

        recorder.dispose();

        let err = stopper.await.unwrap().unwrap_err();
        assert!(matches!(err, RecorderError::Cancelled));
        assert_eq!(recorder.state(), RecorderState::Idle);
    }

    #[tokio::test]
    async fn test_dispose_during_permission_request_aborts_start() {
        let adapter = FakeAdapter::new();
        let release = adapter.hold_next_request();
        let recorder = Arc::new(AudioRecorder::new(adapter.clone()));

        let starter = {
            let recorder = recorder.clone();
            tokio::spawn(async move { recorder.start().await })
        };
        tokio::task::yield_now().await;
        assert_eq!(recorder.state(), RecorderState::RequestingPermission);

        recorder.dispose();
        release.send(()).ok();

        let err = starter.await.unwrap().unwrap_err();
        assert!(matches!(err, RecorderError::InvalidState(_)));
        assert_eq!(recorder.state(), RecorderState::Idle);
        // the handle was never created
        assert_eq!(adapter.dispose_count(), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_current_state() {
        let adapter = FakeAdapter::new();
        let recorder = AudioRecorder::new(adapter.clone());
        recorder.start().await.unwrap();

        let (_sub, log) = record_snapshots(&recorder);
        assert_eq!(log.lock()[0].state(), RecorderState::Recording);
    }

    #[tokio::test]
    async fn test_unsubscribed_listener_receives_nothing_further() {
        let recorder = AudioRecorder::new(FakeAdapter::new());
        let (subscription, log) = record_snapshots(&recorder);
        subscription.unsubscribe();

        recorder.start().await.unwrap();

        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_listener_may_unsubscribe_itself_mid_notification() {
        let recorder = AudioRecorder::new(FakeAdapter::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let slot_in = slot.clone();
        let calls_in = calls.clone();
        let subscription = recorder.subscribe(move |_| {
            calls_in.fetch_add(1, Ordering::SeqCst);
            if let Some(subscription) = slot_in.lock().take() {
                subscription.unsubscribe();
            }
        });
        *slot.lock() = Some(subscription);

        // publishes two transitions; the listener removes itself during
        // the first one
        recorder.start().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_listeners_notified_in_subscription_order() {
        let recorder = AudioRecorder::new(FakeAdapter::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = order.clone();
        let _a = recorder.subscribe(move |_| first.lock().push("first"));
        let second = order.clone();
        let _b = recorder.subscribe(move |_| second.lock().push("second"));

        order.lock().clear();
        recorder.start().await.unwrap();

        assert_eq!(
            order.lock().clone(),
            vec!["first", "second", "first", "second"]
        );
    }
}
