//! Energy-based voice activity detection.
//!
//! Two pieces live here:
//!
//! * [`EnergyVad`]: a streaming detector with rise/fall hysteresis.  It
//!   drives `SpeechContext::is_speech`, the ASR end-of-utterance endpoint and
//!   the built-in wake trigger.
//! * [`SilenceTrimmer`]: strips leading and trailing silence from a whole
//!   utterance before batch transcription.
//!
//! A frame counts as voiced when its RMS amplitude exceeds the threshold.

use crate::config::{AudioConfig, VadConfig};

/// Root-mean-square amplitude of `samples` (0.0 for an empty slice).
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_sq = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    mean_sq.sqrt()
}

// ---------------------------------------------------------------------------
// EnergyVad
// ---------------------------------------------------------------------------

/// Edge reported by [`EnergyVad::process`] when the speech state flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEdge {
    Rising,
    Falling,
}

/// Streaming energy VAD with hysteresis.
///
/// The detector flips to speech after `rise_frames` consecutive voiced
/// frames and back to silence after `fall_frames` consecutive unvoiced ones.
///
/// ```rust
/// use speech_pipeline::audio::{EnergyVad, VadEdge};
///
/// let mut vad = EnergyVad::new(0.01, 2, 3);
/// assert_eq!(vad.process(&[0.5; 160]), None);
/// assert_eq!(vad.process(&[0.5; 160]), Some(VadEdge::Rising));
/// assert!(vad.is_speech());
/// ```
#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
    rise_frames: usize,
    fall_frames: usize,
    /// Length of the current run of frames that disagree with `is_speech`.
    run: usize,
    is_speech: bool,
}

impl EnergyVad {
    pub fn new(threshold: f32, rise_frames: usize, fall_frames: usize) -> Self {
        Self {
            threshold,
            rise_frames: rise_frames.max(1),
            fall_frames: fall_frames.max(1),
            run: 0,
            is_speech: false,
        }
    }

    /// Build from config, converting the rise/fall delays to frame counts.
    pub fn from_config(vad: &VadConfig, audio: &AudioConfig) -> Self {
        Self::new(
            vad.threshold,
            audio.frames_for(vad.rise_delay_ms),
            audio.frames_for(vad.fall_delay_ms),
        )
    }

    /// Classify one frame and return the edge, if the state flipped.
    pub fn process(&mut self, frame: &[f32]) -> Option<VadEdge> {
        let voiced = rms(frame) > self.threshold;

        if voiced == self.is_speech {
            self.run = 0;
            return None;
        }

        self.run += 1;
        let needed = if self.is_speech {
            self.fall_frames
        } else {
            self.rise_frames
        };
        if self.run < needed {
            return None;
        }

        self.run = 0;
        self.is_speech = voiced;
        Some(if voiced {
            VadEdge::Rising
        } else {
            VadEdge::Falling
        })
    }

    pub fn is_speech(&self) -> bool {
        self.is_speech
    }

    pub fn reset(&mut self) {
        self.run = 0;
        self.is_speech = false;
    }
}

// ---------------------------------------------------------------------------
// SilenceTrimmer
// ---------------------------------------------------------------------------

/// Trims leading and trailing silence from a complete utterance.
pub struct SilenceTrimmer {
    threshold: f32,
    frame_size: usize,
}

impl SilenceTrimmer {
    /// # Panics
    ///
    /// Panics if `frame_size == 0`.
    pub fn new(threshold: f32, frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame_size must be > 0");
        Self {
            threshold,
            frame_size,
        }
    }

    /// Sub-slice spanning the first to the last voiced frame.
    ///
    /// An all-silent input yields an empty slice.
    pub fn trim<'a>(&self, audio: &'a [f32]) -> &'a [f32] {
        let voiced = |chunk: &[f32]| rms(chunk) > self.threshold;

        let Some(first) = audio.chunks(self.frame_size).position(voiced) else {
            return &audio[0..0];
        };
        let last = audio
            .chunks(self.frame_size)
            .rposition(voiced)
            .unwrap_or(first);

        let start = first * self.frame_size;
        let end = ((last + 1) * self.frame_size).min(audio.len());
        &audio[start..end]
    }
}
