//! Channel mixing and sample-rate conversion for captured audio.
//!
//! Devices deliver interleaved audio at their native rate; the pipeline
//! wants mono at `audio.sample_rate`.  Conversion is two steps:
//!
//! 1. [`stereo_to_mono`]: average interleaved channels.
//! 2. [`Resampler`]: linear interpolation from the device rate to the
//!    pipeline rate, continuous across capture chunks.

/// Mix interleaved multi-channel audio down to mono by averaging channels.
///
/// ```rust
/// use speech_pipeline::audio::stereo_to_mono;
///
/// let mono = stereo_to_mono(&[0.5, -0.5, 0.2, 0.4], 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn stereo_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Streaming linear-interpolation resampler.
///
/// The read position is kept as an exact fraction of the output rate and
/// carried across calls, along with the last input sample, so a stream cut
/// into arbitrary chunks resamples exactly as if it arrived in one piece.
///
/// ```rust
/// use speech_pipeline::audio::Resampler;
///
/// let mut resampler = Resampler::new(48_000, 16_000);
/// let out: usize = (0..10).map(|_| resampler.process(&[0.5; 480]).len()).sum();
/// assert_eq!(out, 1_600);
/// ```
#[derive(Debug, Clone)]
pub struct Resampler {
    from_rate: i64,
    to_rate: i64,
    /// Input position of the next output sample, in units of `1 / to_rate`
    /// input samples, relative to the start of the next chunk.  Negative
    /// values point into the previous chunk.
    position: i64,
    previous: Option<f32>,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate: i64::from(from_rate),
            to_rate: i64::from(to_rate),
            position: 0,
            previous: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate || self.from_rate == 0 || self.to_rate == 0
    }

    /// Resample the next chunk of mono input.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return samples.to_vec();
        }
        let Some(&last) = samples.last() else {
            return Vec::new();
        };

        let len = samples.len() as i64;
        let sample_at = |idx: i64| -> f32 {
            if idx < 0 {
                self.previous.unwrap_or(samples[0])
            } else {
                samples[idx as usize]
            }
        };

        let mut out =
            Vec::with_capacity((samples.len() as i64 * self.to_rate / self.from_rate + 1) as usize);
        let limit = (len - 1) * self.to_rate;
        let mut position = self.position;
        while position <= limit {
            let idx = position.div_euclid(self.to_rate);
            let rem = position.rem_euclid(self.to_rate);
            let a = sample_at(idx);
            if rem == 0 {
                out.push(a);
            } else {
                let frac = rem as f32 / self.to_rate as f32;
                out.push(a + (sample_at(idx + 1) - a) * frac);
            }
            position += self.from_rate;
        }

        self.position = position - len * self.to_rate;
        self.previous = Some(last);
        out
    }

    /// Forget stream state before an unrelated stream.
    pub fn reset(&mut self) {
        self.position = 0;
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_passthrough() {
        let input = vec![0.1_f32, 0.2, 0.3];
        assert_eq!(stereo_to_mono(&input, 1), input);
    }

    #[test]
    fn averages_two_channels() {
        let out = stereo_to_mono(&[1.0, -1.0, 0.5, 0.5], 2);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn zero_channels_is_empty() {
        assert!(stereo_to_mono(&[1.0, 2.0], 0).is_empty());
    }

    #[test]
    fn same_rate_is_noop() {
        let input: Vec<f32> = (0..160).map(|i| i as f32 / 160.0).collect();
        assert_eq!(Resampler::new(16_000, 16_000).process(&input), input);
    }

    #[test]
    fn downsample_44100_to_16k_length() {
        let out = Resampler::new(44_100, 16_000).process(&vec![0.0; 44_100]);
        assert!(out.len().abs_diff(16_000) <= 1, "got {}", out.len());
    }

    #[test]
    fn upsample_16k_to_48k_stream_length() {
        let mut resampler = Resampler::new(16_000, 48_000);
        let total: usize = (0..4).map(|_| resampler.process(&[0.0; 160]).len()).sum();
        // The final two outputs wait for the next chunk.
        assert_eq!(total, 4 * 480 - 2);
    }

    #[test]
    fn dc_signal_keeps_amplitude() {
        for &s in &Resampler::new(48_000, 8_000).process(&[0.5; 480]) {
            assert!((s - 0.5).abs() < 1e-5, "amplitude drift: {s}");
        }
    }

    #[test]
    fn chunking_does_not_change_output() {
        let input: Vec<f32> = (0..44_100).map(|i| (i as f32 * 0.01).sin()).collect();
        let whole = Resampler::new(44_100, 16_000).process(&input);

        let mut resampler = Resampler::new(44_100, 16_000);
        let chunked: Vec<f32> = input
            .chunks(512)
            .flat_map(|chunk| resampler.process(chunk))
            .collect();

        assert_eq!(chunked.len(), whole.len());
        for (a, b) in chunked.iter().zip(&whole) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn no_drift_over_many_uneven_chunks() {
        let mut resampler = Resampler::new(44_100, 16_000);
        let total: usize = (0..1_000).map(|_| resampler.process(&[0.0; 441]).len()).sum();
        // 441_000 input samples → 160_000 output samples, give or take the
        // one waiting on the next chunk.
        assert!(total.abs_diff(160_000) <= 1, "got {total}");
    }

    #[test]
    fn empty_input() {
        let mut resampler = Resampler::new(48_000, 16_000);
        assert!(resampler.process(&[]).is_empty());
        assert_eq!(resampler.process(&[0.5; 3]), vec![0.5]);
    }
}
