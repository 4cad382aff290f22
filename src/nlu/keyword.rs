//! Rule-based intent classification.
//!
//! Each [`IntentRule`] lists keywords and a minimum hit count.  The rule
//! with the most hits at or above its minimum wins; confidence is the share
//! of its keywords that matched.  Keywords match whole words, so `"on"`
//! does not match `"only"`.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::{IntentRule, NluConfig};

use super::{ClassificationError, NluResult, NluService, Slot};

/// Local classifier over configured [`IntentRule`]s.
///
/// ```rust
/// use speech_pipeline::config::IntentRule;
/// use speech_pipeline::nlu::KeywordClassifier;
///
/// let classifier = KeywordClassifier::new(vec![IntentRule {
///     name: "lights_on".into(),
///     keywords: vec!["lights".into(), "on".into()],
///     min_matches: 2,
///     slots: vec![],
/// }]);
/// let result = classifier.classify_text("turn on the lights").unwrap();
/// assert_eq!(result.intent, "lights_on");
/// ```
pub struct KeywordClassifier {
    rules: Vec<IntentRule>,
}

impl KeywordClassifier {
    pub fn new(rules: Vec<IntentRule>) -> Self {
        Self { rules }
    }

    pub fn from_config(config: &NluConfig) -> Self {
        Self::new(config.intents.clone())
    }

    /// Classify without going through the async trait.
    pub fn classify_text(&self, transcript: &str) -> Result<NluResult, ClassificationError> {
        let text = normalize(transcript);

        let (rule, hits) = self
            .rules
            .iter()
            .filter_map(|rule| {
                let hits = rule
                    .keywords
                    .iter()
                    .filter(|kw| contains_phrase(&text, kw))
                    .count();
                (hits > 0 && hits >= rule.min_matches).then_some((rule, hits))
            })
            // Ties go to the earliest rule.
            .fold(None, |best: Option<(&IntentRule, usize)>, (rule, hits)| match best {
                Some((_, best_hits)) if best_hits >= hits => best,
                _ => Some((rule, hits)),
            })
            .ok_or(ClassificationError::NoMatch)?;

        let slots = rule
            .slots
            .iter()
            .filter_map(|slot| {
                slot.values
                    .iter()
                    .find(|v| contains_phrase(&text, v))
                    .map(|v| {
                        (
                            slot.name.clone(),
                            Slot {
                                slot_type: slot.slot_type.clone(),
                                raw_value: v.clone(),
                                value: serde_json::Value::String(v.to_lowercase()),
                            },
                        )
                    })
            })
            .collect::<BTreeMap<_, _>>();

        Ok(NluResult {
            intent: rule.name.clone(),
            confidence: hits as f32 / rule.keywords.len().max(1) as f32,
            slots,
        })
    }
}

#[async_trait]
impl NluService for KeywordClassifier {
    async fn classify(&self, transcript: &str) -> Result<NluResult, ClassificationError> {
        self.classify_text(transcript)
    }
}

/// Lowercase, strip punctuation and pad with spaces for whole-word search.
fn normalize(text: &str) -> String {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '\'')
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect();
    format!(" {} ", words.join(" "))
}

fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    let needle = normalize(phrase);
    !needle.trim().is_empty() && normalized.contains(&needle)
}
