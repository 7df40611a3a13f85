//! cpal-backed capture adapter.
//!
//! `cpal::Stream` is not `Send`, so each recorder handle owns a dedicated
//! capture thread that builds and holds the stream. The handle forwards
//! start, stop, and dispose as commands and waits for an acknowledgement
//! where the contract needs a synchronous result. Samples are encoded as
//! WAV in memory and delivered as a single chunk when the stop flushes.

use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, SyncSender};
use std::thread;

use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample};
use hound::WavWriter;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::adapter::{CaptureAdapter, CaptureError, CaptureHandle, CaptureHandlers};

/// Mime type of the chunks this adapter produces.
const WAV_MIME_TYPE: &str = "audio/wav";

type CaptureResult<T> = Result<T, CaptureError>;
type WavWriterHandle = Arc<Mutex<Option<WavWriter<MemoryWriter>>>>;

/// A cheaply cloneable handle to the in-memory WAV data. The wav writer's
/// finalize method does not return the inner writer, so the bytes are
/// shared behind a mutex and extracted after finalization.
#[derive(Clone)]
struct MemoryWriter {
    inner: Arc<Mutex<Cursor<Vec<u8>>>>,
}

impl MemoryWriter {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Cursor::new(Vec::with_capacity(8 * 1024)))),
        }
    }

    /// Returns the recorded bytes. Fails while any clone of this writer
    /// is still alive.
    fn try_into_inner(self) -> CaptureResult<Vec<u8>> {
        let owned = Arc::try_unwrap(self.inner)
            .map_err(|_| CaptureError::Stream("recording buffer still shared".to_string()))?;
        Ok(owned.into_inner().into_inner())
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl Seek for MemoryWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.lock().seek(pos)
    }
}

/// An acquired input device and its negotiated configuration. Holding
/// this does not start the hardware; the capture thread opens the stream.
pub struct MicStream {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
}

/// Production adapter over the host's default input device.
pub struct CpalAdapter {
    host: cpal::Host,
}

impl CpalAdapter {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }
}

impl Default for CpalAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureAdapter for CpalAdapter {
    type Stream = MicStream;
    type Handle = CpalHandle;

    async fn request_stream(&self) -> CaptureResult<MicStream> {
        let device = self
            .host
            .default_input_device()
            .ok_or(CaptureError::NoInputDevice)?;
        let config = device
            .default_input_config()
            .map_err(|e| CaptureError::Unsupported(e.to_string()))?;
        info!(
            device_name = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate = config.sample_rate().0,
            channels = config.channels(),
            "acquired input device"
        );
        Ok(MicStream { device, config })
    }

    fn create_recorder(
        &self,
        stream: MicStream,
        handlers: CaptureHandlers,
    ) -> CaptureResult<CpalHandle> {
        CpalHandle::spawn(stream, handlers)
    }
}

enum StreamCmd {
    Start(SyncSender<CaptureResult<()>>),
    Stop(SyncSender<CaptureResult<()>>),
    Dispose,
}

/// Handle to a live capture thread. Dropping it without a dispose tears
/// the thread down as well, through the closed command channel.
pub struct CpalHandle {
    commands: Sender<StreamCmd>,
}

impl CpalHandle {
    fn spawn(stream: MicStream, handlers: CaptureHandlers) -> CaptureResult<Self> {
        let (commands, command_rx) = std::sync::mpsc::channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);

        thread::Builder::new()
            .name("sotto-capture".to_string())
            .spawn(move || capture_thread(stream, handlers, command_rx, ready_tx))
            .map_err(|e| CaptureError::Stream(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { commands }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(CaptureError::Stream(
                "capture thread exited before reporting readiness".to_string(),
            )),
        }
    }

    fn roundtrip(
        &self,
        make: impl FnOnce(SyncSender<CaptureResult<()>>) -> StreamCmd,
    ) -> CaptureResult<()> {
        let (ack_tx, ack_rx) = std::sync::mpsc::sync_channel(1);
        self.commands
            .send(make(ack_tx))
            .map_err(|_| CaptureError::Stream("capture thread is gone".to_string()))?;
        ack_rx
            .recv()
            .map_err(|_| CaptureError::Stream("capture thread is gone".to_string()))?
    }
}

impl CaptureHandle for CpalHandle {
    fn start(&self) -> CaptureResult<()> {
        self.roundtrip(StreamCmd::Start)
    }

    fn stop(&self) -> CaptureResult<()> {
        self.roundtrip(StreamCmd::Stop)
    }

    fn dispose(&self) {
        // Send fails once the thread has already exited, which is the
        // idempotent case.
        self.commands.send(StreamCmd::Dispose).ok();
    }

    fn mime_type(&self) -> Option<&str> {
        Some(WAV_MIME_TYPE)
    }
}

impl Drop for CpalHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn capture_thread(
    stream: MicStream,
    handlers: CaptureHandlers,
    commands: Receiver<StreamCmd>,
    ready: SyncSender<CaptureResult<()>>,
) {
    let worker = match CaptureWorker::build(stream, handlers) {
        Ok(worker) => {
            ready.send(Ok(())).ok();
            worker
        }
        Err(err) => {
            ready.send(Err(err)).ok();
            return;
        }
    };
    worker.run(commands);
}

struct CaptureWorker {
    stream: cpal::Stream,
    writer: WavWriterHandle,
    buffer: Option<MemoryWriter>,
    handlers: CaptureHandlers,
}

impl CaptureWorker {
    fn build(stream: MicStream, handlers: CaptureHandlers) -> CaptureResult<Self> {
        let MicStream { device, config } = stream;
        let spec = wav_spec_from_config(&config);
        debug!(?spec, "writing recording with wav spec");

        let buffer = MemoryWriter::new();
        let writer = WavWriter::new(buffer.clone(), spec)
            .map_err(|e| CaptureError::Stream(format!("failed to create wav writer: {e}")))?;
        let writer = Arc::new(Mutex::new(Some(writer)));

        let writer_2 = writer.clone();
        let on_error = handlers.on_error.clone();
        let err_fn = move |err: cpal::StreamError| {
            debug!("input stream error: {}", err);
            (on_error)(CaptureError::Stream(err.to_string()));
        };

        let built = match config.sample_format() {
            cpal::SampleFormat::I8 => device.build_input_stream(
                &config.into(),
                move |data, _: &_| write_input_data::<i8, i8>(data, &writer_2),
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config.into(),
                move |data, _: &_| write_input_data::<i16, i16>(data, &writer_2),
                err_fn,
                None,
            ),
            cpal::SampleFormat::I32 => device.build_input_stream(
                &config.into(),
                move |data, _: &_| write_input_data::<i32, i32>(data, &writer_2),
                err_fn,
                None,
            ),
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config.into(),
                move |data, _: &_| write_input_data::<f32, f32>(data, &writer_2),
                err_fn,
                None,
            ),
            sample_format => {
                return Err(CaptureError::SampleFormatNotSupported(format!(
                    "{sample_format:?}"
                )));
            }
        };
        let stream = built.map_err(|e| CaptureError::Stream(e.to_string()))?;

        Ok(Self {
            stream,
            writer,
            buffer: Some(buffer),
            handlers,
        })
    }

    fn run(mut self, commands: Receiver<StreamCmd>) {
        while let Ok(command) = commands.recv() {
            match command {
                StreamCmd::Start(ack) => {
                    let result = self
                        .stream
                        .play()
                        .map_err(|e| CaptureError::Stream(e.to_string()));
                    ack.send(result).ok();
                }
                StreamCmd::Stop(ack) => match self.finish() {
                    Ok(data) => {
                        ack.send(Ok(())).ok();
                        if !data.is_empty() {
                            (self.handlers.on_data)(Bytes::from(data));
                        }
                        (self.handlers.on_stop)();
                    }
                    Err(err) => {
                        ack.send(Err(err)).ok();
                    }
                },
                StreamCmd::Dispose => break,
            }
        }
        debug!("capture thread exiting");
    }

    /// Pause the stream, finalize the wav writer, and take the encoded
    /// bytes out of the shared buffer.
    fn finish(&mut self) -> CaptureResult<Vec<u8>> {
        let Some(buffer) = self.buffer.take() else {
            return Err(CaptureError::Stream("recording already stopped".to_string()));
        };
        info!("ending recording");
        self.stream.pause().ok();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            writer
                .finalize()
                .map_err(|e| CaptureError::Stream(format!("failed to finalize wav writer: {e}")))?;
        }
        buffer.try_into_inner()
    }
}

fn wav_spec_from_config(config: &cpal::SupportedStreamConfig) -> hound::WavSpec {
    hound::WavSpec {
        channels: config.channels() as _,
        sample_rate: config.sample_rate().0 as _,
        bits_per_sample: (config.sample_format().sample_size() * 8) as _,
        sample_format: sample_format(config.sample_format()),
    }
}

fn sample_format(format: cpal::SampleFormat) -> hound::SampleFormat {
    if format.is_float() {
        hound::SampleFormat::Float
    } else {
        hound::SampleFormat::Int
    }
}

/// Writes samples from the audio callback. Uses try_lock so the realtime
/// thread never blocks on the finalizing stop.
fn write_input_data<T, U>(input: &[T], writer: &WavWriterHandle)
where
    T: Sample,
    U: Sample + hound::Sample + FromSample<T>,
{
    if let Some(mut guard) = writer.try_lock() {
        if let Some(writer) = guard.as_mut() {
            for &sample in input.iter() {
                let sample: U = U::from_sample(sample);
                writer.write_sample(sample).ok();
            }
        }
    }
}
