//! Pipeline settings structs, defaults, validation and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.
//! Once handed to [`crate::pipeline::SpeechPipeline::start`] a
//! [`SpeechConfig`] is frozen behind an `Arc` and only ever read.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::AppPaths;
use crate::events::TraceLevel;

/// Sample rates the frame pipeline and VAD accept.
pub const SUPPORTED_SAMPLE_RATES: &[u32] = &[8_000, 16_000, 32_000, 48_000];

/// Frame widths (ms) the frame pipeline and VAD accept.
pub const SUPPORTED_FRAME_WIDTHS: &[u32] = &[10, 20, 30];

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Reasons a configuration cannot be used to start the pipeline.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("unsupported sample rate {0} Hz (expected one of 8000, 16000, 32000, 48000)")]
    UnsupportedSampleRate(u32),

    #[error("unsupported frame width {0} ms (expected 10, 20 or 30)")]
    UnsupportedFrameWidth(u32),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("no {0} is available for the selected profile")]
    MissingStage(&'static str),
}

// ---------------------------------------------------------------------------
// PipelineProfile
// ---------------------------------------------------------------------------

/// Which stages the pipeline builds on `start()`.
///
/// | Variant          | Wake stage                     | Starts in          |
/// |------------------|--------------------------------|--------------------|
/// | `WakewordAsr`    | host-supplied wakeword detector | WakewordListening |
/// | `VadAsr`         | built-in energy trigger        | WakewordListening  |
/// | `PushToTalkAsr`  | none                           | Activated          |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineProfile {
    WakewordAsr,
    #[default]
    VadAsr,
    PushToTalkAsr,
}

impl PipelineProfile {
    /// Returns `true` when the profile includes a wakeword stage.
    pub fn has_wakeword(self) -> bool {
        !matches!(self, PipelineProfile::PushToTalkAsr)
    }
}

// ---------------------------------------------------------------------------
// RacePolicy
// ---------------------------------------------------------------------------

/// What happens to a wakeword detection that was emitted before a manual
/// `deactivate()` but processed after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RacePolicy {
    /// The late detection is dropped.
    #[default]
    DeactivateWins,
    /// The late detection still activates the pipeline if it is listening.
    HonorLateWakeword,
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// State machine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub profile: PipelineProfile,
    /// Activated with no speech for this long yields a `Timeout`.
    pub inactivity_timeout_ms: u64,
    /// Consecutive processor errors before the pipeline is `Faulted`.
    pub fault_threshold: u32,
    /// Minimum level of `Trace` events delivered to listeners.
    pub trace_level: TraceLevel,
    pub race_policy: RacePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            profile: PipelineProfile::default(),
            inactivity_timeout_ms: 5_000,
            fault_threshold: 3,
            trace_level: TraceLevel::Info,
            race_policy: RacePolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Frame geometry shared by every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Pipeline sample rate in Hz; capture is resampled to this rate.
    pub sample_rate: u32,
    /// Width of one [`crate::audio::AudioFrame`] in milliseconds.
    pub frame_width_ms: u32,
    /// Number of frames the ASR stage may queue before dropping new ones.
    pub buffer_width: usize,
    /// Input device name; `None` means the system default.
    pub input_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_width_ms: 20,
            buffer_width: 50,
            input_device: None,
        }
    }
}

impl AudioConfig {
    /// Samples per frame at the configured rate and width.
    pub fn frame_size(&self) -> usize {
        (self.sample_rate as usize * self.frame_width_ms as usize) / 1_000
    }

    /// Wall-clock duration of one frame.
    pub fn frame_period(&self) -> Duration {
        Duration::from_millis(u64::from(self.frame_width_ms))
    }

    /// Number of whole frames covering `ms` milliseconds (at least one).
    pub fn frames_for(&self, ms: u64) -> usize {
        let width = u64::from(self.frame_width_ms.max(1));
        (ms.div_ceil(width) as usize).max(1)
    }
}

// ---------------------------------------------------------------------------
// VadConfig
// ---------------------------------------------------------------------------

/// Energy voice-activity detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS amplitude above which a frame counts as voiced.
    pub threshold: f32,
    /// Voiced run length (ms) needed to flip the detector to speech.
    pub rise_delay_ms: u64,
    /// Unvoiced run length (ms) needed to flip the detector to silence.
    pub fall_delay_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            rise_delay_ms: 60,
            fall_delay_ms: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// WakewordConfig
// ---------------------------------------------------------------------------

/// Wakeword stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakewordConfig {
    /// Trigger phrases; the first one labels detections.
    pub keywords: Vec<String>,
    /// Detector posterior (0.0 – 1.0) at or above which a detection fires.
    pub threshold: f32,
    /// End-of-speech is ignored until an activation has lasted this long.
    pub active_min_ms: u64,
    /// Activations longer than this time out; `0` disables the limit.
    pub active_max_ms: u64,
}

impl Default for WakewordConfig {
    fn default() -> Self {
        Self {
            keywords: vec!["spokestack".into()],
            threshold: 0.5,
            active_min_ms: 500,
            active_max_ms: 10_000,
        }
    }
}

impl WakewordConfig {
    /// Label attached to wakeword `Recognize` events.
    pub fn label(&self) -> &str {
        self.keywords.first().map(String::as_str).unwrap_or("wakeword")
    }
}

// ---------------------------------------------------------------------------
// AsrConfig
// ---------------------------------------------------------------------------

/// Speech recognition back-end selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    /// BCP-47 language tag (e.g. `"en-US"`).
    pub language: String,
    /// Base URL of an OpenAI-compatible transcription endpoint.  Empty means
    /// a recognizer must be registered in code.
    pub base_url: String,
    /// API key: `None` for local endpoints.
    pub api_key: Option<String>,
    pub model: String,
    /// Longest utterance kept for batch transcription; older audio is dropped.
    pub max_utterance_secs: f32,
    pub timeout_secs: u64,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            language: "en-US".into(),
            base_url: String::new(),
            api_key: None,
            model: "whisper-1".into(),
            max_utterance_secs: 30.0,
            timeout_secs: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// NluConfig
// ---------------------------------------------------------------------------

/// Which NLU implementation classifies final transcripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NluProvider {
    /// Local keyword rules from [`NluConfig::intents`].
    #[default]
    Keyword,
    /// OpenAI-compatible chat-completions endpoint.
    Api,
}

/// A slot the keyword classifier fills when one of `values` occurs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRule {
    pub name: String,
    pub slot_type: String,
    pub values: Vec<String>,
}

/// A keyword rule for one intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRule {
    pub name: String,
    pub keywords: Vec<String>,
    /// Minimum number of keyword hits before the intent matches.
    #[serde(default = "default_min_matches")]
    pub min_matches: usize,
    #[serde(default)]
    pub slots: Vec<SlotRule>,
}

fn default_min_matches() -> usize {
    1
}

/// NLU settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NluConfig {
    pub enabled: bool,
    pub provider: NluProvider,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub intents: Vec<IntentRule>,
}

impl Default for NluConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: NluProvider::default(),
            base_url: "http://localhost:11434".into(),
            api_key: None,
            model: "qwen2.5:3b".into(),
            timeout_secs: 10,
            intents: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// TtsConfig
// ---------------------------------------------------------------------------

/// Settings for the HTTP speech synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub speed: f32,
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".into(),
            api_key: None,
            model: "tts-1".into(),
            voice: "alloy".into(),
            speed: 1.0,
            timeout_secs: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// SpeechConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use speech_pipeline::config::SpeechConfig;
///
/// // Load (returns Default when file is missing)
/// let config = SpeechConfig::load().unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub pipeline: PipelineConfig,
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub wakeword: WakewordConfig,
    pub asr: AsrConfig,
    pub nlu: NluConfig,
    pub tts: TtsConfig,
}

impl SpeechConfig {
    /// Check every tunable the pipeline depends on.
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.audio.sample_rate) {
            return Err(ConfigError::UnsupportedSampleRate(self.audio.sample_rate));
        }
        if !SUPPORTED_FRAME_WIDTHS.contains(&self.audio.frame_width_ms) {
            return Err(ConfigError::UnsupportedFrameWidth(self.audio.frame_width_ms));
        }
        if self.audio.buffer_width == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.buffer_width",
                reason: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.wakeword.threshold) {
            return Err(ConfigError::InvalidValue {
                field: "wakeword.threshold",
                reason: format!("{} is outside 0.0..=1.0", self.wakeword.threshold),
            });
        }
        if self.wakeword.active_max_ms != 0
            && self.wakeword.active_max_ms < self.wakeword.active_min_ms
        {
            return Err(ConfigError::InvalidValue {
                field: "wakeword.active_max_ms",
                reason: "must not be shorter than wakeword.active_min_ms".into(),
            });
        }
        if self.pipeline.fault_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.fault_threshold",
                reason: "must be at least 1".into(),
            });
        }
        if self.pipeline.inactivity_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.inactivity_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.vad.threshold < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.threshold",
                reason: "must not be negative".into(),
            });
        }
        Ok(())
    }

    /// Inactivity limit while Activated.
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline.inactivity_timeout_ms)
    }

    /// Hard limit on one activation, if any.
    pub fn active_max(&self) -> Option<Duration> {
        match self.wakeword.active_max_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(SpeechConfig::default())` when the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(SpeechConfig::default().validate(), Ok(()));
    }

    #[test]
    fn default_values() {
        let cfg = SpeechConfig::default();

        assert_eq!(cfg.pipeline.profile, PipelineProfile::VadAsr);
        assert_eq!(cfg.pipeline.fault_threshold, 3);
        assert_eq!(cfg.pipeline.race_policy, RacePolicy::DeactivateWins);
        assert_eq!(cfg.audio.sample_rate, 16_000);
        assert_eq!(cfg.audio.frame_width_ms, 20);
        assert_eq!(cfg.audio.frame_size(), 320);
        assert_eq!(cfg.asr.language, "en-US");
        assert!(!cfg.nlu.enabled);
        assert_eq!(cfg.wakeword.label(), "spokestack");
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let mut cfg = SpeechConfig::default();
        cfg.pipeline.profile = PipelineProfile::PushToTalkAsr;
        cfg.pipeline.trace_level = TraceLevel::Debug;
        cfg.pipeline.race_policy = RacePolicy::HonorLateWakeword;
        cfg.audio.sample_rate = 48_000;
        cfg.asr.api_key = Some("sk-test".into());
        cfg.nlu.intents.push(IntentRule {
            name: "lights_on".into(),
            keywords: vec!["lights".into(), "on".into()],
            min_matches: 2,
            slots: vec![SlotRule {
                name: "room".into(),
                slot_type: "location".into(),
                values: vec!["kitchen".into()],
            }],
        });

        cfg.save_to(&path).expect("save");
        let loaded = SpeechConfig::load_from(&path).expect("load");

        assert_eq!(loaded.pipeline.profile, PipelineProfile::PushToTalkAsr);
        assert_eq!(loaded.pipeline.trace_level, TraceLevel::Debug);
        assert_eq!(loaded.pipeline.race_policy, RacePolicy::HonorLateWakeword);
        assert_eq!(loaded.audio.sample_rate, 48_000);
        assert_eq!(loaded.asr.api_key.as_deref(), Some("sk-test"));
        assert_eq!(loaded.nlu.intents, cfg.nlu.intents);
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let config = SpeechConfig::load_from(&dir.path().join("nope.toml")).expect("load");
        assert_eq!(config.audio.sample_rate, 16_000);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[pipeline]\nprofile = \"push_to_talk_asr\"\n").unwrap();

        let config = SpeechConfig::load_from(&path).expect("load");
        assert_eq!(config.pipeline.profile, PipelineProfile::PushToTalkAsr);
        assert_eq!(config.pipeline.fault_threshold, 3);
        assert_eq!(config.audio.frame_width_ms, 20);
    }

    #[test]
    fn rejects_unsupported_sample_rate() {
        let mut cfg = SpeechConfig::default();
        cfg.audio.sample_rate = 44_100;
        assert_eq!(cfg.validate(), Err(ConfigError::UnsupportedSampleRate(44_100)));
    }

    #[test]
    fn rejects_unsupported_frame_width() {
        let mut cfg = SpeechConfig::default();
        cfg.audio.frame_width_ms = 25;
        assert_eq!(cfg.validate(), Err(ConfigError::UnsupportedFrameWidth(25)));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut cfg = SpeechConfig::default();
        cfg.wakeword.threshold = 1.5;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue { field: "wakeword.threshold", .. })
        ));
    }

    #[test]
    fn rejects_active_max_below_min() {
        let mut cfg = SpeechConfig::default();
        cfg.wakeword.active_min_ms = 2_000;
        cfg.wakeword.active_max_ms = 1_000;
        assert!(cfg.validate().is_err());

        cfg.wakeword.active_max_ms = 0;
        assert_eq!(cfg.validate(), Ok(()));
        assert!(cfg.active_max().is_none());
    }

    #[test]
    fn rejects_zero_fault_threshold() {
        let mut cfg = SpeechConfig::default();
        cfg.pipeline.fault_threshold = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn frames_for_rounds_up() {
        let audio = AudioConfig::default();
        assert_eq!(audio.frames_for(0), 1);
        assert_eq!(audio.frames_for(20), 1);
        assert_eq!(audio.frames_for(21), 2);
        assert_eq!(audio.frames_for(500), 25);
    }
}
