//! [`Transcriber`] for OpenAI-compatible `/v1/audio/transcriptions` endpoints.
//!
//! The clip is encoded as 16-bit PCM WAV with `hound` and uploaded as a
//! multipart form.  Works with OpenAI, Groq, a local whisper server, or any
//! service speaking the same wire format.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::AsrConfig;

use super::{ProcessorError, Transcriber};

#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// HTTP transcription client.
pub struct HttpTranscriber {
    client: reqwest::Client,
    config: AsrConfig,
}

impl HttpTranscriber {
    pub fn from_config(config: &AsrConfig) -> Result<Self, ProcessorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProcessorError::Internal(e.to_string()))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/audio/transcriptions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

/// Encode mono `f32` samples as a 16-bit PCM WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, ProcessorError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| ProcessorError::Internal(format!("wav header: {e}")))?;
        for &s in samples {
            let pcm = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer
                .write_sample(pcm)
                .map_err(|e| ProcessorError::Internal(format!("wav sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| ProcessorError::Internal(format!("wav finalize: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Language subtag (`"en"` from `"en-US"`), as transcription APIs expect.
fn language_code(tag: &str) -> &str {
    tag.split(['-', '_']).next().unwrap_or(tag)
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, ProcessorError> {
        let wav = encode_wav(samples, sample_rate)?;
        log::debug!("asr: uploading {} bytes to {}", wav.len(), self.endpoint());

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| ProcessorError::Internal(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone())
            .text("language", language_code(&self.config.language).to_string());

        let mut req = self.client.post(self.endpoint()).multipart(form);
        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("asr: transcription API error {status}: {body}");
            return Err(if status.is_client_error() {
                ProcessorError::VendorRejected {
                    status: status.as_u16(),
                    message: body,
                }
            } else {
                ProcessorError::Network(format!("server error {status}: {body}"))
            });
        }

        let result: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| ProcessorError::Decode(e.to_string()))?;
        Ok(result.text)
    }
}
