//! Configuration module for the speech pipeline.
//!
//! Provides `SpeechConfig` (top-level settings), sub-configs for each stage,
//! `AppPaths` for cross-platform config directories, validation via
//! `SpeechConfig::validate`, and TOML persistence via `SpeechConfig::load` /
//! `SpeechConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AsrConfig, AudioConfig, ConfigError, IntentRule, NluConfig, NluProvider, PipelineConfig,
    PipelineProfile, RacePolicy, SlotRule, SpeechConfig, TtsConfig, VadConfig, WakewordConfig,
    SUPPORTED_FRAME_WIDTHS, SUPPORTED_SAMPLE_RATES,
};
