//! Wakeword stage.
//!
//! A [`WakewordDetector`] scores each frame; the [`WakewordProcessor`] fires
//! a single `Recognize` when the score reaches the configured threshold and
//! then stays quiet until it is re-opened or finalized.  Detection is skipped
//! while the pipeline is active.

use crate::audio::{AudioFrame, EnergyVad, VadEdge};
use crate::config::SpeechConfig;
use crate::pipeline::SpeechContext;

use super::{FeedOutcome, ProcessorError, ProcessorEvent, ProcessorSink, SpeechProcessor, StageKind};

/// Scores frames for the presence of a wakeword.
///
/// Model-backed detectors are supplied by the host through
/// [`crate::pipeline::StageRegistry::with_detector`].
pub trait WakewordDetector: Send {
    /// Posterior in `0.0..=1.0` that the wakeword ended at this frame.
    fn process(&mut self, samples: &[f32]) -> f32;

    fn reset(&mut self);

    /// Voice activity after the last `process`, for detectors that track it.
    fn is_speech(&self) -> Option<bool> {
        None
    }
}

/// Treats the rising edge of voice activity as the wake signal.
pub struct EnergyTrigger {
    vad: EnergyVad,
}

impl EnergyTrigger {
    pub fn new(vad: EnergyVad) -> Self {
        Self { vad }
    }

    pub fn from_config(config: &SpeechConfig) -> Self {
        Self::new(EnergyVad::from_config(&config.vad, &config.audio))
    }
}

impl WakewordDetector for EnergyTrigger {
    fn process(&mut self, samples: &[f32]) -> f32 {
        match self.vad.process(samples) {
            Some(VadEdge::Rising) => 1.0,
            _ => 0.0,
        }
    }

    fn reset(&mut self) {
        self.vad.reset();
    }

    fn is_speech(&self) -> Option<bool> {
        Some(self.vad.is_speech())
    }
}

/// Wakeword [`SpeechProcessor`].
pub struct WakewordProcessor {
    detector: Box<dyn WakewordDetector>,
    threshold: f32,
    label: String,
    sink: Option<ProcessorSink>,
    /// Set after a detection; cleared when a new detection window opens.
    fired: bool,
}

impl WakewordProcessor {
    pub fn new(detector: Box<dyn WakewordDetector>, config: &SpeechConfig) -> Self {
        Self {
            detector,
            threshold: config.wakeword.threshold,
            label: config.wakeword.label().to_string(),
            sink: None,
            fired: false,
        }
    }

    fn rearm(&mut self) {
        self.detector.reset();
        self.fired = false;
    }
}

impl SpeechProcessor for WakewordProcessor {
    fn kind(&self) -> StageKind {
        StageKind::Wakeword
    }

    fn open(&mut self, sink: ProcessorSink) -> Result<(), ProcessorError> {
        self.rearm();
        log::debug!("wakeword: open (epoch {})", sink.epoch());
        self.sink = Some(sink);
        Ok(())
    }

    fn feed(&mut self, frame: &AudioFrame, context: &mut SpeechContext) -> FeedOutcome {
        let Some(sink) = &self.sink else {
            return FeedOutcome::Ignored;
        };
        if context.is_active || self.fired {
            return FeedOutcome::Ignored;
        }

        let score = self.detector.process(&frame.samples);
        if let Some(speaking) = self.detector.is_speech() {
            context.is_speech = speaking;
        }
        if score >= self.threshold {
            self.fired = true;
            log::info!("wakeword: detected `{}` (score {score:.2}, frame {})", self.label, frame.seq);
            sink.emit(ProcessorEvent::Recognize {
                transcript: self.label.clone(),
                confidence: score.clamp(0.0, 1.0),
            });
            self.detector.reset();
        }
        FeedOutcome::Accepted
    }

    fn finalize(&mut self) {
        self.rearm();
    }

    fn close(&mut self) {
        self.sink = None;
        self.rearm();
    }

    fn is_open(&self) -> bool {
        self.sink.is_some()
    }
}
