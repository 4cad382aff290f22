//! Automatic speech recognition stage.
//!
//! The capture thread only runs the VAD and pushes frames into a bounded
//! queue.  A tokio task per utterance drains the queue into a
//! [`RecognizerSession`] and reports partial and final hypotheses.
//!
//! ```text
//! feed() ── try_send ──▶ [queue: audio.buffer_width] ──▶ worker task
//!   │                                                     ├─ session.push  → Partial
//!   └─ VAD falling edge (after active_min) ─ finish ─────▶ └─ session.finish → Recognize
//! ```
//!
//! A full queue drops the newest frame; the capture thread never waits.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::audio::{AudioFrame, EnergyVad};
use crate::config::SpeechConfig;
use crate::pipeline::SpeechContext;

use super::{FeedOutcome, ProcessorError, ProcessorEvent, ProcessorSink, SpeechProcessor, StageKind};

// ---------------------------------------------------------------------------
// Recognizer back end
// ---------------------------------------------------------------------------

/// A recognition result.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub transcript: String,
    pub confidence: f32,
    pub is_final: bool,
}

impl Hypothesis {
    pub fn partial(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            confidence: 0.0,
            is_final: false,
        }
    }

    pub fn final_result(transcript: impl Into<String>, confidence: f32) -> Self {
        Self {
            transcript: transcript.into(),
            confidence,
            is_final: true,
        }
    }
}

/// Starts one recognition session per utterance.
pub trait RecognizerBackend: Send + Sync {
    fn start_utterance(&self) -> Result<Box<dyn RecognizerSession>, ProcessorError>;
}

/// A single utterance in progress.
#[async_trait]
pub trait RecognizerSession: Send {
    /// Consume one frame.  May return a partial hypothesis, or a final one
    /// when the back end endpoints on its own.
    async fn push(&mut self, frame: &AudioFrame) -> Result<Option<Hypothesis>, ProcessorError>;

    /// No more audio is coming; return the final hypothesis.
    async fn finish(&mut self) -> Result<Hypothesis, ProcessorError>;
}

// ---------------------------------------------------------------------------
// AsrProcessor
// ---------------------------------------------------------------------------

struct Utterance {
    frames: mpsc::Sender<AudioFrame>,
    finish: Option<oneshot::Sender<()>>,
    worker: JoinHandle<()>,
    frames_seen: usize,
    heard_speech: bool,
}

/// ASR [`SpeechProcessor`] driving a [`RecognizerBackend`].
pub struct AsrProcessor {
    backend: Arc<dyn RecognizerBackend>,
    runtime: Handle,
    vad: EnergyVad,
    queue_capacity: usize,
    /// End-of-speech is ignored until this many frames have been seen.
    min_frames: usize,
    utterance: Option<Utterance>,
}

impl AsrProcessor {
    pub fn new(backend: Arc<dyn RecognizerBackend>, config: &SpeechConfig, runtime: Handle) -> Self {
        Self {
            backend,
            runtime,
            vad: EnergyVad::from_config(&config.vad, &config.audio),
            queue_capacity: config.audio.buffer_width,
            min_frames: config.audio.frames_for(config.wakeword.active_min_ms),
            utterance: None,
        }
    }

    fn request_finish(&mut self) {
        if let Some(finish) = self.utterance.as_mut().and_then(|u| u.finish.take()) {
            let _ = finish.send(());
        }
    }
}

impl SpeechProcessor for AsrProcessor {
    fn kind(&self) -> StageKind {
        StageKind::Asr
    }

    fn open(&mut self, sink: ProcessorSink) -> Result<(), ProcessorError> {
        self.close();
        let session = self.backend.start_utterance()?;

        let (frames_tx, frames_rx) = mpsc::channel(self.queue_capacity);
        let (finish_tx, finish_rx) = oneshot::channel();
        log::debug!("asr: open (epoch {})", sink.epoch());
        let worker = self
            .runtime
            .spawn(run_utterance(session, frames_rx, finish_rx, sink));

        self.utterance = Some(Utterance {
            frames: frames_tx,
            finish: Some(finish_tx),
            worker,
            frames_seen: 0,
            heard_speech: false,
        });
        Ok(())
    }

    fn feed(&mut self, frame: &AudioFrame, context: &mut SpeechContext) -> FeedOutcome {
        let Some(utterance) = self.utterance.as_mut() else {
            return FeedOutcome::Ignored;
        };
        if utterance.finish.is_none() {
            return FeedOutcome::Ignored;
        }

        self.vad.process(&frame.samples);
        context.is_speech = self.vad.is_speech();
        utterance.frames_seen += 1;

        let outcome = match utterance.frames.try_send(frame.clone()) {
            Ok(()) => FeedOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => FeedOutcome::QueueFull,
            Err(mpsc::error::TrySendError::Closed(_)) => FeedOutcome::Ignored,
        };

        if context.is_speech {
            utterance.heard_speech = true;
        } else if utterance.heard_speech && utterance.frames_seen >= self.min_frames {
            log::debug!("asr: end of speech at frame {}", frame.seq);
            self.request_finish();
        }
        outcome
    }

    fn finalize(&mut self) {
        self.request_finish();
    }

    fn close(&mut self) {
        if let Some(utterance) = self.utterance.take() {
            utterance.worker.abort();
        }
        self.vad.reset();
    }

    fn is_open(&self) -> bool {
        self.utterance.is_some()
    }
}

impl Drop for AsrProcessor {
    fn drop(&mut self) {
        self.close();
    }
}

/// Worker for one utterance.  Queued frames are always drained before the
/// finish request is honored.
async fn run_utterance(
    mut session: Box<dyn RecognizerSession>,
    mut frames: mpsc::Receiver<AudioFrame>,
    mut finish: oneshot::Receiver<()>,
    sink: ProcessorSink,
) {
    loop {
        tokio::select! {
            biased;
            frame = frames.recv() => {
                let Some(frame) = frame else { return };
                match session.push(&frame).await {
                    Ok(Some(h)) if h.is_final => {
                        report_final(&sink, h);
                        return;
                    }
                    Ok(Some(h)) => {
                        sink.emit(ProcessorEvent::Partial { transcript: h.transcript });
                    }
                    Ok(None) => {}
                    Err(e) => {
                        log::warn!("asr: recognizer failed mid-utterance: {e}");
                        sink.emit(ProcessorEvent::Error(e));
                        return;
                    }
                }
            }
            _ = &mut finish => break,
        }
    }

    match session.finish().await {
        Ok(h) => report_final(&sink, h),
        Err(e) => {
            log::warn!("asr: recognizer failed to finish: {e}");
            sink.emit(ProcessorEvent::Error(e));
        }
    }
}

fn report_final(sink: &ProcessorSink, hypothesis: Hypothesis) {
    let transcript = hypothesis.transcript.trim();
    if transcript.is_empty() {
        sink.emit(ProcessorEvent::Timeout);
    } else {
        sink.emit(ProcessorEvent::Recognize {
            transcript: transcript.to_string(),
            confidence: hypothesis.confidence.clamp(0.0, 1.0),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::testing::{test_config, ScriptedRecognizer};
    use crate::processor::StageMessage;
    use std::time::Duration;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn open(backend: ScriptedRecognizer, config: &SpeechConfig) -> (AsrProcessor, UnboundedReceiver<StageMessage>) {
        let mut asr = AsrProcessor::new(Arc::new(backend), config, Handle::current());
        let (tx, rx) = unbounded_channel();
        asr.open(ProcessorSink::new(StageKind::Asr, 3, tx)).unwrap();
        (asr, rx)
    }

    fn feed(asr: &mut AsrProcessor, ctx: &mut SpeechContext, amplitude: f32, count: u64) {
        for seq in 0..count {
            asr.feed(&AudioFrame::constant(seq, 320, amplitude), ctx);
        }
    }

    async fn next(rx: &mut UnboundedReceiver<StageMessage>) -> ProcessorEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for stage message")
            .expect("channel closed")
            .event
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn endpoint_after_speech_produces_final() {
        let config = test_config();
        let (mut asr, mut rx) = open(ScriptedRecognizer::final_text("turn on the lights"), &config);
        let mut ctx = SpeechContext::default();

        feed(&mut asr, &mut ctx, 0.5, 30);
        assert!(ctx.is_speech);
        feed(&mut asr, &mut ctx, 0.0, 30);
        assert!(!ctx.is_speech);

        assert_eq!(
            next(&mut rx).await,
            ProcessorEvent::Recognize {
                transcript: "turn on the lights".into(),
                confidence: 0.9
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn partials_precede_final() {
        let config = test_config();
        let backend = ScriptedRecognizer::final_text("lights on").with_partials(&["lights"]);
        let (mut asr, mut rx) = open(backend, &config);
        let mut ctx = SpeechContext::default();

        feed(&mut asr, &mut ctx, 0.5, 2);
        asr.finalize();

        assert_eq!(
            next(&mut rx).await,
            ProcessorEvent::Partial {
                transcript: "lights".into()
            }
        );
        assert!(matches!(next(&mut rx).await, ProcessorEvent::Recognize { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_final_reports_timeout() {
        let config = test_config();
        let (mut asr, mut rx) = open(ScriptedRecognizer::final_text("  "), &config);
        asr.finalize();
        assert_eq!(next(&mut rx).await, ProcessorEvent::Timeout);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn push_error_is_reported() {
        let config = test_config();
        let backend = ScriptedRecognizer::failing_on_push(ProcessorError::Network("reset".into()));
        let (mut asr, mut rx) = open(backend, &config);
        let mut ctx = SpeechContext::default();
        feed(&mut asr, &mut ctx, 0.5, 1);

        assert_eq!(
            next(&mut rx).await,
            ProcessorEvent::Error(ProcessorError::Network("reset".into()))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_queue_drops_newest() {
        let mut config = test_config();
        config.audio.buffer_width = 2;
        let (mut asr, _rx) = open(ScriptedRecognizer::stalled(), &config);
        let mut ctx = SpeechContext::default();

        let outcomes: Vec<FeedOutcome> = (0..10)
            .map(|seq| asr.feed(&AudioFrame::constant(seq, 320, 0.0), &mut ctx))
            .collect();
        assert!(outcomes.contains(&FeedOutcome::QueueFull));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn silence_before_min_duration_does_not_endpoint() {
        let mut config = test_config();
        config.wakeword.active_min_ms = 2_000;
        let (mut asr, mut rx) = open(ScriptedRecognizer::final_text("hi"), &config);
        let mut ctx = SpeechContext::default();

        feed(&mut asr, &mut ctx, 0.5, 5);
        feed(&mut asr, &mut ctx, 0.0, 30);

        let waited = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(waited.is_err(), "no result before active_min");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_abandons_utterance() {
        let config = test_config();
        let (mut asr, mut rx) = open(ScriptedRecognizer::final_text("late"), &config);
        asr.close();
        assert!(!asr.is_open());

        let mut ctx = SpeechContext::default();
        assert_eq!(
            asr.feed(&AudioFrame::constant(0, 320, 0.5), &mut ctx),
            FeedOutcome::Ignored
        );
        let waited = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(matches!(waited, Ok(None) | Err(_)));
    }
}
