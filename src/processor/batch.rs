//! Whole-utterance recognition.
//!
//! [`BatchRecognizer`] turns any [`Transcriber`] (something that transcribes
//! a complete clip) into a [`RecognizerBackend`].  Frames are buffered for
//! the duration of the utterance; on `finish` the clip is trimmed of silence
//! and transcribed in one request.

use std::sync::Arc;

use async_trait::async_trait;

use crate::audio::{AudioFrame, SilenceTrimmer, UtteranceBuffer};
use crate::config::SpeechConfig;

use super::{Hypothesis, ProcessorError, RecognizerBackend, RecognizerSession};

/// Transcribes a complete mono clip.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, ProcessorError>;
}

// Compile-time assertion: Arc<dyn Transcriber> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Arc<dyn Transcriber>) {}
};

/// Whole-utterance endpoints return no score, so finals carry this.
const BATCH_CONFIDENCE: f32 = 1.0;

/// [`RecognizerBackend`] adapter for a [`Transcriber`].
pub struct BatchRecognizer {
    transcriber: Arc<dyn Transcriber>,
    sample_rate: u32,
    frame_size: usize,
    vad_threshold: f32,
    max_utterance_secs: f32,
}

impl BatchRecognizer {
    pub fn new(transcriber: Arc<dyn Transcriber>, config: &SpeechConfig) -> Self {
        Self {
            transcriber,
            sample_rate: config.audio.sample_rate,
            frame_size: config.audio.frame_size().max(1),
            vad_threshold: config.vad.threshold,
            max_utterance_secs: config.asr.max_utterance_secs,
        }
    }
}

impl RecognizerBackend for BatchRecognizer {
    fn start_utterance(&self) -> Result<Box<dyn RecognizerSession>, ProcessorError> {
        Ok(Box::new(BatchSession {
            transcriber: Arc::clone(&self.transcriber),
            buffer: UtteranceBuffer::for_duration(self.max_utterance_secs, self.sample_rate),
            trimmer: SilenceTrimmer::new(self.vad_threshold, self.frame_size),
            sample_rate: self.sample_rate,
        }))
    }
}

struct BatchSession {
    transcriber: Arc<dyn Transcriber>,
    buffer: UtteranceBuffer,
    trimmer: SilenceTrimmer,
    sample_rate: u32,
}

#[async_trait]
impl RecognizerSession for BatchSession {
    async fn push(&mut self, frame: &AudioFrame) -> Result<Option<Hypothesis>, ProcessorError> {
        self.buffer.push_frame(frame);
        Ok(None)
    }

    async fn finish(&mut self) -> Result<Hypothesis, ProcessorError> {
        log::debug!(
            "asr: finishing utterance, {:.2}s buffered",
            self.buffer.duration_secs(self.sample_rate)
        );
        if self.buffer.dropped() > 0 {
            log::warn!(
                "asr: utterance exceeded buffer, {} samples dropped",
                self.buffer.dropped()
            );
        }
        let samples = self.buffer.take();
        let voiced = self.trimmer.trim(&samples);
        if voiced.is_empty() {
            log::debug!("asr: no speech in utterance");
            return Ok(Hypothesis::final_result("", 0.0));
        }

        let start = std::time::Instant::now();
        let text = self.transcriber.transcribe(voiced, self.sample_rate).await?;
        log::info!(
            "asr: transcribed {:.2}s of audio in {}ms",
            voiced.len() as f32 / self.sample_rate as f32,
            start.elapsed().as_millis()
        );
        Ok(Hypothesis::final_result(text, BATCH_CONFIDENCE))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records what it was asked to transcribe and answers with a fixed
    /// response.
    pub(crate) struct MockTranscriber {
        response: Result<String, ProcessorError>,
        pub(crate) calls: Mutex<Vec<usize>>,
    }

    impl MockTranscriber {
        pub(crate) fn returning(text: &str) -> Self {
            Self {
                response: Ok(text.to_string()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(error: ProcessorError) -> Self {
            Self {
                response: Err(error),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transcriber for MockTranscriber {
        async fn transcribe(&self, samples: &[f32], _rate: u32) -> Result<String, ProcessorError> {
            self.calls.lock().unwrap().push(samples.len());
            self.response.clone()
        }
    }

    fn frames(amplitude: f32, count: u64) -> Vec<AudioFrame> {
        (0..count).map(|s| AudioFrame::constant(s, 320, amplitude)).collect()
    }

    async fn run(
        mock: Arc<MockTranscriber>,
        input: Vec<AudioFrame>,
    ) -> Result<Hypothesis, ProcessorError> {
        let recognizer = BatchRecognizer::new(mock, &SpeechConfig::default());
        let mut session = recognizer.start_utterance()?;
        for frame in &input {
            assert_eq!(session.push(frame).await?, None);
        }
        session.finish().await
    }

    #[tokio::test]
    async fn transcribes_trimmed_speech() {
        let mock = Arc::new(MockTranscriber::returning("turn on the lights"));
        let mut input = frames(0.0, 5);
        input.extend(frames(0.5, 10));
        input.extend(frames(0.0, 5));

        let hypothesis = run(Arc::clone(&mock), input).await.unwrap();
        assert_eq!(hypothesis, Hypothesis::final_result("turn on the lights", 1.0));
        assert_eq!(*mock.calls.lock().unwrap(), vec![3_200]);
    }

    #[tokio::test]
    async fn silent_utterance_skips_transcription() {
        let mock = Arc::new(MockTranscriber::returning("unused"));
        let hypothesis = run(Arc::clone(&mock), frames(0.0, 20)).await.unwrap();
        assert!(hypothesis.transcript.is_empty());
        assert!(hypothesis.is_final);
        assert!(mock.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transcriber_errors_propagate() {
        let mock = Arc::new(MockTranscriber::failing(ProcessorError::Decode("bad".into())));
        let err = run(mock, frames(0.5, 5)).await.unwrap_err();
        assert_eq!(err, ProcessorError::Decode("bad".into()));
    }

    #[tokio::test]
    async fn long_utterance_keeps_most_recent_audio() {
        let mock = Arc::new(MockTranscriber::returning("ok"));
        let mut config = SpeechConfig::default();
        config.asr.max_utterance_secs = 0.1; // 1 600 samples
        let recognizer = BatchRecognizer::new(Arc::clone(&mock) as Arc<dyn Transcriber>, &config);
        let mut session = recognizer.start_utterance().unwrap();
        for frame in frames(0.5, 20) {
            session.push(&frame).await.unwrap();
        }
        session.finish().await.unwrap();
        assert_eq!(*mock.calls.lock().unwrap(), vec![1_600]);
    }
}
