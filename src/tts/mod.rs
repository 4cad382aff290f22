//! Text-to-speech: requests in, `AudioReady` / `Error` events out.
//!
//! [`TextToSpeechService::synthesize`] returns a [`RequestId`] immediately
//! and runs the request on the tokio runtime.  Requests are independent and
//! run concurrently; results carry the id of the request that produced them
//! and may arrive in any order.

pub mod http;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;

use crate::events::{AudioHandle, ErrorKind, EventPublisher, PipelineEvent, RequestId};

pub use http::HttpSynthesizer;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> RequestId {
    RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Markup of [`SynthesisRequest::input`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsFormat {
    #[default]
    Text,
    Ssml,
    SpeechMarkdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub input: String,
    #[serde(default)]
    pub format: TtsFormat,
    /// Voice override; `None` uses the configured voice.
    #[serde(default)]
    pub voice: Option<String>,
}

impl SynthesisRequest {
    pub fn text(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            format: TtsFormat::Text,
            voice: None,
        }
    }

    pub fn ssml(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            format: TtsFormat::Ssml,
            voice: None,
        }
    }

    pub fn validate(&self) -> Result<(), SynthesisError> {
        let input = self.input.trim();
        if input.is_empty() {
            return Err(SynthesisError::InvalidRequest("input is empty".into()));
        }
        if self.format == TtsFormat::Ssml
            && !(input.starts_with("<speak") && input.ends_with("</speak>"))
        {
            return Err(SynthesisError::InvalidRequest(
                "SSML input must be wrapped in <speak>".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SynthesisError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SynthesisError {
    #[error("invalid synthesis request: {0}")]
    InvalidRequest(String),

    #[error("format {0:?} is not supported by this synthesizer")]
    UnsupportedFormat(TtsFormat),

    #[error("synthesis request failed: {0}")]
    Request(String),

    #[error("synthesis rejected by service (status {status}): {message}")]
    VendorRejected { status: u16, message: String },

    #[error("synthesis request timed out")]
    Timeout,

    #[error("synthesizer returned no audio")]
    EmptyAudio,
}

impl SynthesisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SynthesisError::Timeout => ErrorKind::Timeout,
            _ => ErrorKind::Synthesis,
        }
    }
}

impl From<reqwest::Error> for SynthesisError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SynthesisError::Timeout
        } else {
            SynthesisError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Backend + service
// ---------------------------------------------------------------------------

/// Turns one validated request into audio.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioHandle, SynthesisError>;
}

/// Asynchronous synthesis front end publishing to the event hub.
pub struct TextToSpeechService {
    backend: Arc<dyn SynthesisBackend>,
    events: EventPublisher,
    runtime: Handle,
}

impl TextToSpeechService {
    pub fn new(backend: Arc<dyn SynthesisBackend>, events: EventPublisher, runtime: Handle) -> Self {
        Self {
            backend,
            events,
            runtime,
        }
    }

    /// Queue `request` and return its id.  The outcome arrives later as
    /// `AudioReady` or `Error` carrying the same id.
    pub fn synthesize(&self, request: SynthesisRequest) -> RequestId {
        let id = next_request_id();
        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();

        self.runtime.spawn(async move {
            let outcome = match request.validate() {
                Ok(()) => backend.synthesize(&request).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(audio) => {
                    log::debug!("tts: {id} ready");
                    events.publish(PipelineEvent::AudioReady {
                        request_id: id,
                        audio,
                    });
                }
                Err(e) => {
                    log::warn!("tts: {id} failed: {e}");
                    events.publish(PipelineEvent::Error {
                        kind: e.kind(),
                        message: e.to_string(),
                        request_id: Some(id),
                    });
                }
            }
        });
        id
    }
}
