//! Pipeline activation states and the per-run speech context.
//!
//! [`PipelineState`] is what [`crate::pipeline::SpeechPipeline::state`]
//! reports.  [`SpeechContext`] is "what is happening right now": the stages
//! write it while they run, the pipeline writes it when an utterance ends,
//! and hosts read copies of it through `snapshot()`.

use serde::Serialize;

use crate::events::ErrorKind;

// ---------------------------------------------------------------------------
// PipelineState
// ---------------------------------------------------------------------------

/// States of the speech pipeline.
///
/// ```text
/// Idle ──start (wakeword profile)──▶ WakewordListening ──wakeword──▶ Activated
///      ──start (push-to-talk)─────────────────────────────────────▶ Activated
/// Activated ──final / error / timeout / deactivate──▶ WakewordListening (or Idle)
/// any ──stop──▶ Idle
/// any ──repeated error──▶ Faulted ──start──▶ …
/// any ──suspend──▶ Suspended ──resume──▶ previous state
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Not running, or push-to-talk waiting for `activate()`.  Frames are
    /// dropped.
    #[default]
    Idle,

    /// Frames go to the wakeword stage.
    WakewordListening,

    /// Frames go to the ASR stage; an utterance is in progress.
    Activated,

    /// Frame delivery paused; resumes to the state it was entered from.
    Suspended,

    /// Too many stage failures.  Rejects work until `start()` is called.
    Faulted,
}

impl PipelineState {
    /// Short lowercase name for logs and host UIs.
    ///
    /// ```
    /// use speech_pipeline::pipeline::PipelineState;
    ///
    /// assert_eq!(PipelineState::Faulted.label(), "faulted");
    /// ```
    pub fn label(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::WakewordListening => "listening",
            PipelineState::Activated => "activated",
            PipelineState::Suspended => "suspended",
            PipelineState::Faulted => "faulted",
        }
    }
}

// ---------------------------------------------------------------------------
// SpeechContext
// ---------------------------------------------------------------------------

/// Live state of the current utterance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpeechContext {
    /// ASR is running.
    pub is_active: bool,
    /// The VAD currently hears speech.
    pub is_speech: bool,
    /// Latest partial or final transcript; cleared when an utterance ends.
    pub transcript: String,
    /// Confidence of `transcript`, `0.0..=1.0`.
    pub confidence: f32,
    /// Error that ended the most recent utterance, if any.
    pub error: Option<ErrorKind>,
}

impl SpeechContext {
    /// Start of an utterance: active, with no transcript and no error.
    pub fn begin_utterance(&mut self) {
        *self = SpeechContext {
            is_active: true,
            ..SpeechContext::default()
        };
    }

    /// End of an utterance.  `error` survives until the next utterance so
    /// hosts can still read it.
    pub fn end_utterance(&mut self) {
        self.is_active = false;
        self.is_speech = false;
        self.transcript.clear();
        self.confidence = 0.0;
    }

    pub fn reset(&mut self) {
        *self = SpeechContext::default();
    }
}
