//! Bounded utterance buffer for whole-utterance recognition.
//!
//! Frames are appended as they arrive.  Once the configured length is
//! exceeded the oldest samples are discarded, so an over-long utterance
//! keeps its most recent audio.

use std::collections::VecDeque;

use super::AudioFrame;

/// Accumulates the samples of one utterance up to a fixed capacity.
///
/// ```rust
/// use speech_pipeline::audio::{AudioFrame, UtteranceBuffer};
///
/// let mut buf = UtteranceBuffer::new(4);
/// buf.push_frame(&AudioFrame::new(0, vec![1.0, 2.0, 3.0]));
/// buf.push_frame(&AudioFrame::new(1, vec![4.0, 5.0]));
/// assert_eq!(buf.take(), vec![2.0, 3.0, 4.0, 5.0]);
/// ```
#[derive(Debug)]
pub struct UtteranceBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
    dropped: usize,
}

impl UtteranceBuffer {
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "UtteranceBuffer capacity must be > 0");
        Self {
            samples: VecDeque::with_capacity(capacity.min(1 << 20)),
            capacity,
            dropped: 0,
        }
    }

    /// Buffer sized for `max_secs` of audio at `sample_rate`.
    pub fn for_duration(max_secs: f32, sample_rate: u32) -> Self {
        let capacity = (max_secs.max(0.0) * sample_rate as f32) as usize;
        Self::new(capacity.max(1))
    }

    pub fn push_frame(&mut self, frame: &AudioFrame) {
        self.push_slice(&frame.samples);
    }

    pub fn push_slice(&mut self, data: &[f32]) {
        self.samples.extend(data.iter().copied());
        let overflow = self.samples.len().saturating_sub(self.capacity);
        if overflow > 0 {
            self.samples.drain(..overflow);
            self.dropped += overflow;
        }
    }

    /// Remove and return the buffered samples in arrival order.
    pub fn take(&mut self) -> Vec<f32> {
        self.dropped = 0;
        self.samples.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples discarded from the head since the last `take`.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn duration_secs(&self, sample_rate: u32) -> f32 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / sample_rate as f32
    }
}
