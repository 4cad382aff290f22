//! Builds the stages a profile needs from config plus host-registered parts.

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::config::{ConfigError, NluProvider, PipelineProfile, SpeechConfig};
use crate::nlu::{ApiClassifier, KeywordClassifier, NluService};
use crate::processor::{
    AsrProcessor, BatchRecognizer, EnergyTrigger, HttpTranscriber, RecognizerBackend,
    WakewordDetector, WakewordProcessor,
};

/// Creates a fresh detector for each pipeline run.
pub type DetectorFactory = Arc<dyn Fn(&SpeechConfig) -> Box<dyn WakewordDetector> + Send + Sync>;

/// Host-supplied stage parts.  Anything not registered is built from config.
///
/// ```rust
/// use std::sync::Arc;
/// use speech_pipeline::config::IntentRule;
/// use speech_pipeline::nlu::KeywordClassifier;
/// use speech_pipeline::pipeline::StageRegistry;
///
/// let stages = StageRegistry::new()
///     .with_nlu(Arc::new(KeywordClassifier::new(Vec::<IntentRule>::new())));
/// ```
#[derive(Clone, Default)]
pub struct StageRegistry {
    recognizer: Option<Arc<dyn RecognizerBackend>>,
    detector: Option<DetectorFactory>,
    nlu: Option<Arc<dyn NluService>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn RecognizerBackend>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Detector for the `wakeword_asr` profile.
    pub fn with_detector<F>(mut self, factory: F) -> Self
    where
        F: Fn(&SpeechConfig) -> Box<dyn WakewordDetector> + Send + Sync + 'static,
    {
        self.detector = Some(Arc::new(factory));
        self
    }

    pub fn with_nlu(mut self, nlu: Arc<dyn NluService>) -> Self {
        self.nlu = Some(nlu);
        self
    }

    pub(crate) fn build_wakeword(
        &self,
        config: &SpeechConfig,
    ) -> Result<Option<WakewordProcessor>, ConfigError> {
        let detector: Box<dyn WakewordDetector> = match config.pipeline.profile {
            PipelineProfile::PushToTalkAsr => return Ok(None),
            PipelineProfile::VadAsr => Box::new(EnergyTrigger::from_config(config)),
            PipelineProfile::WakewordAsr => {
                let factory = self
                    .detector
                    .as_ref()
                    .ok_or(ConfigError::MissingStage("wakeword detector"))?;
                factory(config)
            }
        };
        Ok(Some(WakewordProcessor::new(detector, config)))
    }

    pub(crate) fn build_asr(
        &self,
        config: &SpeechConfig,
        runtime: Handle,
    ) -> Result<AsrProcessor, ConfigError> {
        let backend = match &self.recognizer {
            Some(recognizer) => Arc::clone(recognizer),
            None => remote_recognizer(config)?,
        };
        Ok(AsrProcessor::new(backend, config, runtime))
    }

    pub(crate) fn build_nlu(
        &self,
        config: &SpeechConfig,
    ) -> Result<Option<Arc<dyn NluService>>, ConfigError> {
        if !config.nlu.enabled {
            return Ok(None);
        }
        if let Some(nlu) = &self.nlu {
            return Ok(Some(Arc::clone(nlu)));
        }
        let service: Arc<dyn NluService> = match config.nlu.provider {
            NluProvider::Keyword => {
                if config.nlu.intents.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "nlu.intents",
                        reason: "keyword NLU needs at least one intent".into(),
                    });
                }
                Arc::new(KeywordClassifier::from_config(&config.nlu))
            }
            NluProvider::Api => Arc::new(ApiClassifier::from_config(&config.nlu).map_err(|e| {
                ConfigError::InvalidValue {
                    field: "nlu.base_url",
                    reason: e.to_string(),
                }
            })?),
        };
        Ok(Some(service))
    }
}

fn is_local(base_url: &str) -> bool {
    let authority = base_url.split("://").nth(1).unwrap_or(base_url);
    ["localhost", "127.0.0.1", "[::1]", "0.0.0.0"].iter().any(|host| {
        authority
            .strip_prefix(host)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with([':', '/']))
    })
}

fn remote_recognizer(config: &SpeechConfig) -> Result<Arc<dyn RecognizerBackend>, ConfigError> {
    let asr = &config.asr;
    if asr.base_url.trim().is_empty() {
        return Err(ConfigError::MissingStage("speech recognizer"));
    }
    let has_key = asr.api_key.as_deref().is_some_and(|k| !k.is_empty());
    if !has_key && !is_local(&asr.base_url) {
        return Err(ConfigError::MissingCredential("asr.api_key"));
    }
    let transcriber = HttpTranscriber::from_config(asr).map_err(|e| ConfigError::InvalidValue {
        field: "asr.base_url",
        reason: e.to_string(),
    })?;
    Ok(Arc::new(BatchRecognizer::new(Arc::new(transcriber), config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::testing::ScriptedRecognizer;
    use crate::processor::SpeechProcessor;

    #[test]
    fn push_to_talk_has_no_wakeword() {
        let mut config = SpeechConfig::default();
        config.pipeline.profile = PipelineProfile::PushToTalkAsr;
        assert!(StageRegistry::new().build_wakeword(&config).unwrap().is_none());
    }

    #[test]
    fn wakeword_profile_needs_detector() {
        let mut config = SpeechConfig::default();
        config.pipeline.profile = PipelineProfile::WakewordAsr;
        assert_eq!(
            StageRegistry::new().build_wakeword(&config).err(),
            Some(ConfigError::MissingStage("wakeword detector"))
        );

        let stages = StageRegistry::new()
            .with_detector(|c: &SpeechConfig| {
                Box::new(EnergyTrigger::from_config(c)) as Box<dyn WakewordDetector>
            });
        assert!(stages.build_wakeword(&config).unwrap().is_some());
    }

    #[test]
    fn remote_asr_requires_endpoint_and_key() {
        let mut config = SpeechConfig::default();
        assert_eq!(
            remote_recognizer(&config).err(),
            Some(ConfigError::MissingStage("speech recognizer"))
        );

        config.asr.base_url = "https://api.openai.com".into();
        assert_eq!(
            remote_recognizer(&config).err(),
            Some(ConfigError::MissingCredential("asr.api_key"))
        );

        config.asr.api_key = Some("sk-test".into());
        assert!(remote_recognizer(&config).is_ok());

        config.asr.api_key = None;
        config.asr.base_url = "http://localhost:8080".into();
        assert!(remote_recognizer(&config).is_ok());
    }

    #[tokio::test]
    async fn registered_recognizer_wins() {
        let config = SpeechConfig::default();
        let stages =
            StageRegistry::new().with_recognizer(Arc::new(ScriptedRecognizer::final_text("x")));
        let asr = stages.build_asr(&config, Handle::current()).unwrap();
        assert!(!asr.is_open());
    }

    #[test]
    fn keyword_nlu_needs_intents() {
        let mut config = SpeechConfig::default();
        assert!(StageRegistry::new().build_nlu(&config).unwrap().is_none());

        config.nlu.enabled = true;
        assert!(StageRegistry::new().build_nlu(&config).is_err());
    }
}
