//! `HttpSynthesizer`: OpenAI-compatible `/v1/audio/speech`.
//!
//! Sends `{model, input, voice, speed}` and returns the MP3 body inline.
//! Only plain text input is supported by this wire format.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::TtsConfig;
use crate::events::AudioHandle;

use super::{SynthesisBackend, SynthesisError, SynthesisRequest, TtsFormat};

pub struct HttpSynthesizer {
    client: reqwest::Client,
    config: TtsConfig,
}

impl HttpSynthesizer {
    pub fn from_config(config: &TtsConfig) -> Result<Self, SynthesisError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn body(&self, request: &SynthesisRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model,
            "input": request.input,
            "voice": request.voice.as_deref().unwrap_or(&self.config.voice),
            "speed": self.config.speed,
            "response_format": "mp3"
        })
    }
}

#[async_trait]
impl SynthesisBackend for HttpSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioHandle, SynthesisError> {
        if request.format != TtsFormat::Text {
            return Err(SynthesisError::UnsupportedFormat(request.format));
        }

        let url = format!("{}/v1/audio/speech", self.config.base_url.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(&self.body(request));
        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("tts: speech API error {status}: {body}");
            return Err(if status.is_client_error() {
                SynthesisError::VendorRejected {
                    status: status.as_u16(),
                    message: body,
                }
            } else {
                SynthesisError::Request(format!("{status}: {body}"))
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }
        log::debug!("tts: received {} bytes of audio", bytes.len());
        Ok(AudioHandle::encoded("audio/mpeg", bytes.to_vec()))
    }
}
