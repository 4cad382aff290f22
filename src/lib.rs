//! Streaming speech pipeline.
//!
//! Audio frames flow through an optional wakeword stage into a speech
//! recognizer; results, timeouts and failures are delivered to listeners as
//! [`events::PipelineEvent`]s.  Transcripts can be classified by an
//! [`nlu::NluService`] and text synthesized through [`tts::TextToSpeechService`].

pub mod audio;
pub mod config;
pub mod events;
pub mod nlu;
pub mod pipeline;
pub mod processor;
pub mod tts;
