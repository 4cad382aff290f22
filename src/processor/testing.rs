//! Test doubles shared by the stage and pipeline tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::audio::AudioFrame;
use crate::config::SpeechConfig;
use crate::events::TraceLevel;

use super::{Hypothesis, ProcessorError, RecognizerBackend, RecognizerSession};

/// Defaults tuned for fast, quiet tests.
pub(crate) fn test_config() -> SpeechConfig {
    let mut config = SpeechConfig::default();
    config.audio.buffer_width = 256;
    config.pipeline.trace_level = TraceLevel::None;
    config
}

#[derive(Clone)]
enum Script {
    Final(String),
    FailOnPush(ProcessorError),
    FailOnFinish(ProcessorError),
    Stall,
}

/// Recognizer whose behaviour is fixed up front.  Every utterance follows
/// the same script; per-utterance scripts can be queued with `then`.
#[derive(Clone)]
pub(crate) struct ScriptedRecognizer {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    fallback: Script,
    partials: Vec<String>,
    pub(crate) sessions: Arc<AtomicUsize>,
}

impl ScriptedRecognizer {
    fn with(script: Script) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(VecDeque::new())),
            fallback: script,
            partials: Vec::new(),
            sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn final_text(text: &str) -> Self {
        Self::with(Script::Final(text.to_string()))
    }

    pub(crate) fn failing_on_push(error: ProcessorError) -> Self {
        Self::with(Script::FailOnPush(error))
    }

    pub(crate) fn failing_on_finish(error: ProcessorError) -> Self {
        Self::with(Script::FailOnFinish(error))
    }

    pub(crate) fn stalled() -> Self {
        Self::with(Script::Stall)
    }

    pub(crate) fn with_partials(mut self, partials: &[&str]) -> Self {
        self.partials = partials.iter().map(|p| p.to_string()).collect();
        self
    }

    /// The next utterance fails on its first frame; later ones use the
    /// default script.
    pub(crate) fn then_fail_once(self, error: ProcessorError) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::FailOnPush(error));
        self
    }
}

impl RecognizerBackend for ScriptedRecognizer {
    fn start_utterance(&self) -> Result<Box<dyn RecognizerSession>, ProcessorError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Box::new(ScriptedSession {
            script,
            partials: self.partials.iter().cloned().collect(),
        }))
    }
}

struct ScriptedSession {
    script: Script,
    partials: VecDeque<String>,
}

#[async_trait]
impl RecognizerSession for ScriptedSession {
    async fn push(&mut self, _frame: &AudioFrame) -> Result<Option<Hypothesis>, ProcessorError> {
        match &self.script {
            Script::FailOnPush(e) => Err(e.clone()),
            Script::Stall => std::future::pending().await,
            _ => Ok(self.partials.pop_front().map(Hypothesis::partial)),
        }
    }

    async fn finish(&mut self) -> Result<Hypothesis, ProcessorError> {
        match &self.script {
            Script::Final(text) => Ok(Hypothesis::final_result(text.clone(), 0.9)),
            Script::FailOnPush(e) | Script::FailOnFinish(e) => Err(e.clone()),
            Script::Stall => std::future::pending().await,
        }
    }
}
