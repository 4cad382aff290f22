//! Pipeline events and their delivery to listeners.
//!
//! Every result, lifecycle change and failure leaves the pipeline as a
//! [`PipelineEvent`].  Events are published to an [`EventHub`], which hands
//! them to registered [`EventBridge`] listeners on the `speech-events`
//! thread, in registration order.
//!
//! ```text
//! capture thread ─┐
//! control task  ──┼─▶ EventPublisher ─▶ (mpsc) ─▶ "speech-events" thread
//! NLU / TTS tasks ┘                                   └─▶ listeners, in order
//! ```

pub mod hub;
pub mod registry;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::nlu::NluResult;
use crate::processor::StageKind;

pub use hub::{EventHub, EventPublisher};
pub use registry::{ChannelBridge, EventBridge, EventFilter, ListenerId, ListenerRegistry};

// ---------------------------------------------------------------------------
// TraceLevel
// ---------------------------------------------------------------------------

/// Severity of a `Trace` event.  Ordered `Debug < Perf < Info < None`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    Debug = 10,
    Perf = 20,
    #[default]
    Info = 30,
    /// Disables `Trace` events entirely.
    None = 100,
}

impl TraceLevel {
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Whether a trace at `level` passes when `self` is the configured level.
    pub fn allows(self, level: TraceLevel) -> bool {
        self != TraceLevel::None && level >= self
    }
}

// ---------------------------------------------------------------------------
// Error kinds
// ---------------------------------------------------------------------------

/// Subtype of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorFault {
    Network,
    Decode,
    VendorRejected,
    Internal,
}

/// Classification of an `Error` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Processor(ProcessorFault),
    Classification,
    Synthesis,
    Timeout,
    /// The pipeline is faulted and rejects work until restarted.
    Faulted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::Processor(ProcessorFault::Network) => write!(f, "network"),
            ErrorKind::Processor(ProcessorFault::Decode) => write!(f, "decode"),
            ErrorKind::Processor(ProcessorFault::VendorRejected) => write!(f, "vendor-rejected"),
            ErrorKind::Processor(ProcessorFault::Internal) => write!(f, "internal"),
            ErrorKind::Classification => write!(f, "classification"),
            ErrorKind::Synthesis => write!(f, "synthesis"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Faulted => write!(f, "faulted"),
        }
    }
}

// ---------------------------------------------------------------------------
// RequestId / AudioHandle
// ---------------------------------------------------------------------------

/// Correlates a synthesis request with its asynchronous result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Where synthesized audio can be found.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AudioHandle {
    /// Audio hosted by the back end.
    Url { url: String },
    /// Audio returned inline.  The bytes are not serialized.
    Encoded {
        mime: String,
        #[serde(skip)]
        data: Arc<[u8]>,
    },
}

impl AudioHandle {
    pub fn encoded(mime: impl Into<String>, data: Vec<u8>) -> Self {
        AudioHandle::Encoded {
            mime: mime.into(),
            data: data.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

/// Discriminant of [`PipelineEvent`], used for listener filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Activate,
    Deactivate,
    Recognize,
    Partial,
    Timeout,
    Trace,
    Error,
    Classify,
    AudioReady,
}

/// One immutable event delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Activate,
    Deactivate,
    /// A wakeword detection or a final transcript.
    Recognize {
        source: StageKind,
        transcript: String,
        confidence: f32,
    },
    Partial {
        transcript: String,
    },
    Timeout,
    Trace {
        level: TraceLevel,
        message: String,
    },
    Error {
        kind: ErrorKind,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
    },
    Classify {
        transcript: String,
        result: NluResult,
    },
    AudioReady {
        request_id: RequestId,
        audio: AudioHandle,
    },
}

impl PipelineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PipelineEvent::Activate => EventKind::Activate,
            PipelineEvent::Deactivate => EventKind::Deactivate,
            PipelineEvent::Recognize { .. } => EventKind::Recognize,
            PipelineEvent::Partial { .. } => EventKind::Partial,
            PipelineEvent::Timeout => EventKind::Timeout,
            PipelineEvent::Trace { .. } => EventKind::Trace,
            PipelineEvent::Error { .. } => EventKind::Error,
            PipelineEvent::Classify { .. } => EventKind::Classify,
            PipelineEvent::AudioReady { .. } => EventKind::AudioReady,
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        PipelineEvent::Error {
            kind,
            message: message.into(),
            request_id: None,
        }
    }

    pub fn trace(level: TraceLevel, message: impl Into<String>) -> Self {
        PipelineEvent::Trace {
            level,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_levels_filter() {
        assert!(TraceLevel::Debug.allows(TraceLevel::Info));
        assert!(TraceLevel::Info.allows(TraceLevel::Info));
        assert!(!TraceLevel::Info.allows(TraceLevel::Debug));
        assert!(!TraceLevel::None.allows(TraceLevel::Info));
        assert_eq!(TraceLevel::Perf.value(), 20);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = PipelineEvent::Recognize {
            source: StageKind::Asr,
            transcript: "hello".into(),
            confidence: 0.5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "recognize");
        assert_eq!(json["source"], "asr");
        assert_eq!(json["transcript"], "hello");

        let json = serde_json::to_value(PipelineEvent::error(
            ErrorKind::Processor(ProcessorFault::Network),
            "reset",
        ))
        .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"]["processor"], "network");
        assert!(json.get("request_id").is_none());
    }

    #[test]
    fn encoded_audio_bytes_are_not_serialized() {
        let event = PipelineEvent::AudioReady {
            request_id: RequestId(7),
            audio: AudioHandle::encoded("audio/mpeg", vec![1, 2, 3]),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["request_id"], 7);
        assert_eq!(json["audio"]["kind"], "encoded");
        assert_eq!(json["audio"]["mime"], "audio/mpeg");
        assert!(json["audio"].get("data").is_none());
    }

    #[test]
    fn error_kind_display() {
        assert_eq!(
            ErrorKind::Processor(ProcessorFault::VendorRejected).to_string(),
            "vendor-rejected"
        );
        assert_eq!(ErrorKind::Faulted.to_string(), "faulted");
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(PipelineEvent::Timeout.kind(), EventKind::Timeout);
        assert_eq!(
            PipelineEvent::trace(TraceLevel::Debug, "x").kind(),
            EventKind::Trace
        );
    }
}
