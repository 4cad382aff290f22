//! Natural-language understanding: final transcript → intent + slots.
//!
//! This module provides:
//! * [`NluService`]: async trait implemented by every classifier.
//! * [`KeywordClassifier`]: local rule-based classifier built from
//!   `nlu.intents`.
//! * [`ApiClassifier`]: OpenAI-compatible chat-completions classifier.
//!
//! The pipeline runs classification after a final transcript has already
//! been forwarded, so a failing classifier never hides the transcript.

pub mod api;
pub mod keyword;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::ErrorKind;

pub use api::ApiClassifier;
pub use keyword::KeywordClassifier;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// One extracted parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    #[serde(rename = "type")]
    pub slot_type: String,
    /// Text as it appeared in the transcript.
    pub raw_value: String,
    /// Parsed value.
    pub value: serde_json::Value,
}

/// Classification of one transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NluResult {
    pub intent: String,
    pub confidence: f32,
    #[serde(default)]
    pub slots: BTreeMap<String, Slot>,
}

// ---------------------------------------------------------------------------
// ClassificationError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassificationError {
    #[error("classification request failed: {0}")]
    Request(String),

    #[error("classification request timed out")]
    Timeout,

    #[error("failed to parse classifier response: {0}")]
    Parse(String),

    #[error("classifier returned an empty response")]
    EmptyResponse,

    #[error("no intent matched")]
    NoMatch,
}

impl ClassificationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClassificationError::Timeout => ErrorKind::Timeout,
            _ => ErrorKind::Classification,
        }
    }
}

impl From<reqwest::Error> for ClassificationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClassificationError::Timeout
        } else {
            ClassificationError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// NluService
// ---------------------------------------------------------------------------

/// Classifies a final transcript.
///
/// Implementors must be `Send + Sync` so they can be shared as
/// `Arc<dyn NluService>` between the pipeline and its background tasks.
#[async_trait]
pub trait NluService: Send + Sync {
    async fn classify(&self, transcript: &str) -> Result<NluResult, ClassificationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_serializes_slot_type_as_type() {
        let mut slots = BTreeMap::new();
        slots.insert(
            "room".to_string(),
            Slot {
                slot_type: "location".into(),
                raw_value: "kitchen".into(),
                value: serde_json::json!("kitchen"),
            },
        );
        let result = NluResult {
            intent: "lights_on".into(),
            confidence: 1.0,
            slots,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["slots"]["room"]["type"], "location");
        assert_eq!(json["slots"]["room"]["raw_value"], "kitchen");
    }

    #[test]
    fn timeout_maps_to_timeout_kind() {
        assert_eq!(ClassificationError::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(ClassificationError::NoMatch.kind(), ErrorKind::Classification);
    }
}
