//! `ApiClassifier`: NLU over any OpenAI-compatible `/v1/chat/completions`
//! endpoint (Ollama, OpenAI, Groq, LM Studio, vLLM …).
//!
//! The model is asked to reply with a single JSON object:
//!
//! ```json
//! {"intent": "lights_on", "confidence": 0.92,
//!  "slots": {"room": {"type": "location", "value": "kitchen"}}}
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::NluConfig;

use super::{ClassificationError, NluResult, NluService, Slot};

#[derive(Deserialize)]
struct RawSlot {
    #[serde(rename = "type", default)]
    slot_type: String,
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Deserialize)]
struct RawResult {
    intent: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    slots: BTreeMap<String, RawSlot>,
}

/// Remote classifier.  All connection details come from [`NluConfig`].
pub struct ApiClassifier {
    client: reqwest::Client,
    config: NluConfig,
}

impl ApiClassifier {
    pub fn from_config(config: &NluConfig) -> Result<Self, ClassificationError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You classify voice-assistant utterances. Reply with only a JSON object \
             {\"intent\": string, \"confidence\": number between 0 and 1, \
             \"slots\": {name: {\"type\": string, \"value\": any}}}.",
        );
        if !self.config.intents.is_empty() {
            let names: Vec<&str> = self.config.intents.iter().map(|r| r.name.as_str()).collect();
            prompt.push_str(" Known intents: ");
            prompt.push_str(&names.join(", "));
            prompt.push('.');
        }
        prompt
    }
}

/// Parse the model's reply, tolerating a surrounding code fence.
fn parse_reply(content: &str) -> Result<NluResult, ClassificationError> {
    let body = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if body.is_empty() {
        return Err(ClassificationError::EmptyResponse);
    }

    let raw: RawResult =
        serde_json::from_str(body).map_err(|e| ClassificationError::Parse(e.to_string()))?;
    if raw.intent.trim().is_empty() {
        return Err(ClassificationError::NoMatch);
    }

    let slots = raw
        .slots
        .into_iter()
        .map(|(name, slot)| {
            let raw_value = match &slot.value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (
                name,
                Slot {
                    slot_type: slot.slot_type,
                    raw_value,
                    value: slot.value,
                },
            )
        })
        .collect();

    Ok(NluResult {
        intent: raw.intent,
        confidence: raw.confidence.unwrap_or(1.0).clamp(0.0, 1.0),
        slots,
    })
}

#[async_trait]
impl NluService for ApiClassifier {
    async fn classify(&self, transcript: &str) -> Result<NluResult, ClassificationError> {
        let url = format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'));

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": self.system_prompt() },
                { "role": "user",   "content": transcript }
            ],
            "stream": false,
            "temperature": 0.0,
            "max_tokens": 256
        });

        let mut req = self.client.post(&url).json(&body);
        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassificationError::Request(format!("{status}: {body}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ClassificationError::Parse(e.to_string()))?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(ClassificationError::EmptyResponse)?;
        parse_reply(content)
    }
}
