use std::sync::Arc;

use anyhow::Result;
use arboard::Clipboard;
use parking_lot::RwLock;
use sotto::event::AppEvent;
use sotto::notify::NotificationLayer;
use sotto::pipeline::{SubmitResult, TranscribePipeline};
use sotto::{
    AudioRecorder, ConfigManager, CpalAdapter, DEFAULT_LOG_LEVEL, DEFAULT_MODEL, RecorderError,
    RecorderState, VERSION,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SOTTO_LOG")
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
        )
        .finish()
        .with(NotificationLayer::new())
        .init();

    // Load config
    let config_manager = ConfigManager::new()?;
    let config = Arc::new(RwLock::new(config_manager.load()?));
    // save back the config to create the file if it doesn't exist
    config_manager.save(&config.read())?;

    info!(
        version = VERSION,
        config_path = ?config_manager.config_path(),
        model = config.read().model().unwrap_or(DEFAULT_MODEL),
        preset = config.read().preset().id,
        "sotto starting"
    );

    // Clipboard for finished transcripts
    let mut clipboard = match Clipboard::new() {
        Ok(clipboard) => Some(clipboard),
        Err(e) => {
            warn!("Clipboard unavailable, transcripts will only be printed: {}", e);
            None
        }
    };

    // App events: recorder snapshots and pipeline results
    let (event_sender, mut events) = mpsc::unbounded_channel();

    // Recorder over the production capture backend
    let recorder = AudioRecorder::new(CpalAdapter::new());
    let snapshot_sender = event_sender.clone();
    let subscription = recorder.subscribe(move |snapshot| {
        snapshot_sender
            .send(AppEvent::StateChanged(snapshot.clone()))
            .ok();
    });

    // Pipeline for handling finished recordings
    let pipeline = TranscribePipeline::new(config.clone(), event_sender.clone());

    info!("Press Enter to start and stop recording, Ctrl-C to quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(_)) => toggle(&recorder, &pipeline).await,
                    // stdin closed
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    AppEvent::StateChanged(snapshot) => {
                        if let Some(message) = snapshot.error() {
                            error!("Recording failed: {}", message);
                            info!("Press Enter to try again");
                        } else {
                            match snapshot.state() {
                                RecorderState::Recording => info!("Recording, press Enter to stop"),
                                state => debug!(state = %state, "recorder state changed"),
                            }
                        }
                    }
                    AppEvent::TranscriptReady(text) => {
                        println!("{}", text);
                        if config.read().copy_to_clipboard {
                            if let Some(clipboard) = clipboard.as_mut() {
                                match clipboard.set_text(&text) {
                                    Ok(()) => debug!("transcript copied to clipboard"),
                                    Err(e) => warn!("Failed to copy transcript to clipboard: {}", e),
                                }
                            }
                        }
                        sotto::notify::transcript_ready(&text);
                    }
                    AppEvent::TranscriptFailed(message) => {
                        // already logged by the pipeline collector
                        debug!("transcription failed: {}", message);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    subscription.unsubscribe();
    recorder.dispose();
    Ok(())
}

/// Enter toggles the recorder through its lifecycle: idle starts,
/// recording stops and submits, an error resets and starts over.
async fn toggle(recorder: &AudioRecorder<CpalAdapter>, pipeline: &TranscribePipeline) {
    match recorder.state() {
        RecorderState::Idle => start(recorder).await,
        RecorderState::Recording => match recorder.stop().await {
            Ok(recording) => match pipeline.submit(recording) {
                Ok(SubmitResult::Sent) => info!("Transcribing..."),
                Ok(SubmitResult::Discarded) => info!("Recording too short, discarded"),
                Ok(SubmitResult::NotConfigured) => {}
                Err(e) => error!("Failed to submit recording: {:?}", e),
            },
            Err(err @ RecorderError::InvalidState(_)) => error!("Cannot stop: {}", err),
            // other stop failures are published as snapshots and
            // reported by the event loop
            Err(err) => debug!("stop failed: {}", err),
        },
        RecorderState::Error => {
            // reset the failed session, then start fresh
            recorder.dispose();
            start(recorder).await;
        }
        state => debug!(state = %state, "recorder busy, ignoring toggle"),
    }
}

async fn start(recorder: &AudioRecorder<CpalAdapter>) {
    match recorder.start().await {
        Ok(()) => {}
        Err(err @ RecorderError::InvalidState(_)) => error!("Cannot start: {}", err),
        // capture failures are published as snapshots and reported by
        // the event loop
        Err(err) => debug!("start failed: {}", err),
    }
}
