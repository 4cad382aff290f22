//! Speech stages: the processor contract and its two capabilities.
//!
//! A pipeline runs at most one [`WakewordProcessor`] and one
//! [`AsrProcessor`].  Both implement [`SpeechProcessor`]; the closed set of
//! capabilities is [`StageKind`].
//!
//! Processors never call listeners directly.  They report through a
//! [`ProcessorSink`], which stamps every message with the stage and the
//! epoch it was opened under.  The pipeline drops messages whose epoch is no
//! longer current, which is how results for an abandoned utterance vanish.

pub mod asr;
pub mod batch;
pub mod remote;
pub mod wakeword;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::audio::AudioFrame;
use crate::events::{ErrorKind, ProcessorFault, TraceLevel};
use crate::pipeline::SpeechContext;

pub use asr::{AsrProcessor, Hypothesis, RecognizerBackend, RecognizerSession};
pub use batch::{BatchRecognizer, Transcriber};
pub use remote::HttpTranscriber;
pub use wakeword::{EnergyTrigger, WakewordDetector, WakewordProcessor};

// ---------------------------------------------------------------------------
// StageKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Wakeword,
    Asr,
}

// ---------------------------------------------------------------------------
// ProcessorError
// ---------------------------------------------------------------------------

/// Failure of a running stage.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProcessorError {
    #[error("network error: {0}")]
    Network(String),

    #[error("could not decode recognizer response: {0}")]
    Decode(String),

    #[error("request rejected by service (status {status}): {message}")]
    VendorRejected { status: u16, message: String },

    #[error("recognizer request timed out")]
    TimedOut,

    #[error("internal processor error: {0}")]
    Internal(String),
}

impl ProcessorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessorError::Network(_) => ErrorKind::Processor(ProcessorFault::Network),
            ProcessorError::Decode(_) => ErrorKind::Processor(ProcessorFault::Decode),
            ProcessorError::VendorRejected { .. } => {
                ErrorKind::Processor(ProcessorFault::VendorRejected)
            }
            ProcessorError::TimedOut => ErrorKind::Timeout,
            ProcessorError::Internal(_) => ErrorKind::Processor(ProcessorFault::Internal),
        }
    }

    /// Internal errors fault the pipeline immediately; everything else counts
    /// towards the fault threshold.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ProcessorError::Internal(_))
    }
}

impl From<reqwest::Error> for ProcessorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProcessorError::TimedOut
        } else if e.is_decode() {
            ProcessorError::Decode(e.to_string())
        } else {
            ProcessorError::Network(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Events and sink
// ---------------------------------------------------------------------------

/// What a stage reports to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorEvent {
    Recognize { transcript: String, confidence: f32 },
    Partial { transcript: String },
    /// The utterance ended without speech.
    Timeout,
    Trace { level: TraceLevel, message: String },
    Error(ProcessorError),
}

/// A [`ProcessorEvent`] stamped with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct StageMessage {
    pub stage: StageKind,
    pub epoch: u64,
    pub event: ProcessorEvent,
}

/// Reporting handle given to a stage on `open`.
#[derive(Debug, Clone)]
pub struct ProcessorSink {
    stage: StageKind,
    epoch: u64,
    tx: UnboundedSender<StageMessage>,
}

impl ProcessorSink {
    pub fn new(stage: StageKind, epoch: u64, tx: UnboundedSender<StageMessage>) -> Self {
        Self { stage, epoch, tx }
    }

    pub fn stage(&self) -> StageKind {
        self.stage
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns `false` once the pipeline has stopped listening.
    pub fn emit(&self, event: ProcessorEvent) -> bool {
        self.tx
            .send(StageMessage {
                stage: self.stage,
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

// ---------------------------------------------------------------------------
// SpeechProcessor
// ---------------------------------------------------------------------------

/// Result of handing one frame to a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    Accepted,
    /// The stage's queue was full and the frame was dropped.
    QueueFull,
    /// The stage is not open or has already finished its utterance.
    Ignored,
}

/// Contract shared by every speech stage.
///
/// `feed` runs on the capture thread with the pipeline lock held, so it must
/// return within a frame period: network work belongs on a background task.
pub trait SpeechProcessor: Send {
    fn kind(&self) -> StageKind;

    /// Acquire resources and start reporting to `sink`.  Re-opening an open
    /// stage closes it first.
    fn open(&mut self, sink: ProcessorSink) -> Result<(), ProcessorError>;

    fn feed(&mut self, frame: &AudioFrame, context: &mut SpeechContext) -> FeedOutcome;

    /// Force the current utterance to end.
    fn finalize(&mut self);

    /// Release resources.  Nothing is reported after `close` returns.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(
            ProcessorError::Network("reset".into()).kind(),
            ErrorKind::Processor(ProcessorFault::Network)
        );
        assert_eq!(ProcessorError::TimedOut.kind(), ErrorKind::Timeout);
        assert!(ProcessorError::Decode("x".into()).is_recoverable());
        assert!(!ProcessorError::Internal("x".into()).is_recoverable());
    }

    #[test]
    fn sink_stamps_stage_and_epoch() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ProcessorSink::new(StageKind::Asr, 4, tx);
        assert!(sink.emit(ProcessorEvent::Timeout));

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.stage, StageKind::Asr);
        assert_eq!(msg.epoch, 4);
        assert_eq!(msg.event, ProcessorEvent::Timeout);

        drop(rx);
        assert!(!sink.emit(ProcessorEvent::Timeout));
    }
}
