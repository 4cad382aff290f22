//! Fixed-size PCM frames and the assembler that cuts a sample stream into them.
//!
//! A frame's length is `sample_rate * frame_width_ms / 1000` samples.  Frames
//! carry a monotonic sequence number so stages can preserve arrival order
//! when they buffer internally.

use std::sync::Arc;

// ---------------------------------------------------------------------------
// AudioFrame
// ---------------------------------------------------------------------------

/// One immutable frame of mono `f32` samples in `[-1.0, 1.0]`.
///
/// Cloning is cheap: the samples live behind an `Arc`, so a frame can be
/// handed to several stages without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub seq: u64,
    pub samples: Arc<[f32]>,
}

impl AudioFrame {
    pub fn new(seq: u64, samples: impl Into<Arc<[f32]>>) -> Self {
        Self {
            seq,
            samples: samples.into(),
        }
    }

    /// Frame of `len` samples all set to `amplitude`.
    pub fn constant(seq: u64, len: usize, amplitude: f32) -> Self {
        Self::new(seq, vec![amplitude; len])
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ---------------------------------------------------------------------------
// FrameAssembler
// ---------------------------------------------------------------------------

/// Re-chunks arbitrarily sized sample blocks into [`AudioFrame`]s.
///
/// ```rust
/// use speech_pipeline::audio::FrameAssembler;
///
/// let mut assembler = FrameAssembler::new(4);
/// let mut frames = Vec::new();
/// assembler.push(&[0.1; 10], |f| frames.push(f));
/// assert_eq!(frames.len(), 2);
/// assert_eq!(assembler.pending(), 2);
/// ```
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<f32>,
    next_seq: u64,
}

impl FrameAssembler {
    /// # Panics
    ///
    /// Panics if `frame_size == 0`.
    pub fn new(frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame_size must be > 0");
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
            next_seq: 0,
        }
    }

    /// Append samples and call `emit` for every complete frame, in order.
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(AudioFrame)) {
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_size {
                let samples: Arc<[f32]> = Arc::from(std::mem::take(&mut self.pending));
                self.pending.reserve(self.frame_size);
                emit(AudioFrame {
                    seq: self.next_seq,
                    samples,
                });
                self.next_seq += 1;
            }
        }
    }

    /// Samples waiting for the next frame to fill.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Drop partial data and restart sequence numbering.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.next_seq = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(assembler: &mut FrameAssembler, samples: &[f32]) -> Vec<AudioFrame> {
        let mut out = Vec::new();
        assembler.push(samples, |f| out.push(f));
        out
    }

    #[test]
    fn exact_multiple_produces_whole_frames() {
        let mut asm = FrameAssembler::new(160);
        let frames = collect(&mut asm, &vec![0.2; 480]);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == 160));
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn remainder_carries_into_next_push() {
        let mut asm = FrameAssembler::new(4);
        assert!(collect(&mut asm, &[1.0, 2.0, 3.0]).is_empty());

        let frames = collect(&mut asm, &[4.0, 5.0]);
        assert_eq!(frames.len(), 1);
        assert_eq!(&*frames[0].samples, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(asm.pending(), 1);
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let mut asm = FrameAssembler::new(2);
        let mut frames = collect(&mut asm, &[0.0; 5]);
        frames.extend(collect(&mut asm, &[0.0; 3]));
        let seqs: Vec<u64> = frames.iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn reset_restarts_numbering() {
        let mut asm = FrameAssembler::new(2);
        collect(&mut asm, &[0.0; 5]);
        asm.reset();
        assert_eq!(asm.pending(), 0);
        let frames = collect(&mut asm, &[0.0; 2]);
        assert_eq!(frames[0].seq, 0);
    }

    #[test]
    #[should_panic(expected = "frame_size must be > 0")]
    fn zero_frame_size_panics() {
        FrameAssembler::new(0);
    }
}
