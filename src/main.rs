//! Application entry point: a microphone-driven speech pipeline that logs
//! every event it produces.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`SpeechConfig`] from disk (returns default on first run).  An
//!    optional first argument names the config directory to use instead of
//!    the platform one.
//! 3. Create the [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Start the event hub and register a logging listener.
//! 5. Start the pipeline from config.
//! 6. Open the microphone and feed its frames to the pipeline.
//! 7. Block until Ctrl-C, then stop everything.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use speech_pipeline::{
    audio::{AudioFrameSource, MicrophoneSource},
    config::{AppPaths, SpeechConfig},
    events::{EventFilter, EventHub, PipelineEvent},
    pipeline::{SpeechPipeline, StageRegistry},
};

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::Recognize {
            source,
            transcript,
            confidence,
        } => log::info!("recognize [{source:?}] {transcript:?} ({confidence:.2})"),
        PipelineEvent::Classify { result, .. } => {
            log::info!("classify → {} ({:.2})", result.intent, result.confidence)
        }
        PipelineEvent::Error { kind, message, .. } => log::warn!("error [{kind}] {message}"),
        PipelineEvent::Trace { level, message } => log::debug!("trace [{level:?}] {message}"),
        other => log::info!("{:?}", other.kind()),
    }
}

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("speech-pipeline starting up");

    // 2. Configuration
    let paths = match std::env::args_os().nth(1) {
        Some(dir) => AppPaths::rooted_at(Path::new(&dir)),
        None => AppPaths::new(),
    };
    log::info!("settings: {}", paths.settings_file.display());
    let config = SpeechConfig::load_from(&paths.settings_file).unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        SpeechConfig::default()
    });

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    // 4. Events
    let hub = EventHub::new().context("failed to start event dispatch thread")?;
    hub.register(EventFilter::All, Arc::new(log_event));

    // 5. Pipeline
    let pipeline = Arc::new(SpeechPipeline::new(
        StageRegistry::new(),
        &hub,
        rt.handle().clone(),
    ));
    pipeline
        .start(config.clone())
        .context("failed to start speech pipeline")?;
    log::info!("pipeline state: {}", pipeline.state().label());

    // 6. Microphone
    let mut mic = MicrophoneSource::new(&config.audio).context("audio capture unavailable")?;
    let feed = Arc::clone(&pipeline);
    mic.on_frame(Box::new(move |frame| {
        feed.process_frame(&frame);
    }));
    mic.start().context("failed to start audio capture")?;
    log::info!(
        "capturing at {} Hz ({} ch), press Ctrl-C to quit",
        mic.device_rate(),
        mic.channels()
    );

    // 7. Run until interrupted
    rt.block_on(tokio::signal::ctrl_c())
        .context("failed to listen for Ctrl-C")?;

    log::info!("shutting down");
    mic.stop();
    pipeline.stop();
    hub.flush(std::time::Duration::from_secs(1));
    Ok(())
}
