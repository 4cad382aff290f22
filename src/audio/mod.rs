//! Audio front end: microphone capture → mono → resample → fixed-size frames,
//! plus the energy VAD and utterance buffer the recognizer stages use.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → Vec<f32> (mpsc) → "audio-capture" thread
//!           → stereo_to_mono → resample → FrameAssembler → on_frame callback
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use speech_pipeline::audio::{AudioFrameSource, MicrophoneSource};
//! use speech_pipeline::config::AudioConfig;
//!
//! let mut mic = MicrophoneSource::new(&AudioConfig::default()).unwrap();
//! mic.on_frame(Box::new(|frame| println!("frame {}", frame.seq)));
//! mic.start().unwrap();
//! // ...
//! mic.stop();
//! ```

pub mod buffer;
pub mod capture;
pub mod frame;
pub mod resample;
pub mod vad;

pub use buffer::UtteranceBuffer;
pub use capture::{AudioFrameSource, CaptureError, FrameCallback, MicrophoneSource};
pub use frame::{AudioFrame, FrameAssembler};
pub use resample::{stereo_to_mono, Resampler};
pub use vad::{rms, EnergyVad, SilenceTrimmer, VadEdge};
