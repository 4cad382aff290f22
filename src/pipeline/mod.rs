//! Pipeline orchestrator.
//!
//! # Architecture
//!
//! ```text
//! AudioFrameSource ── process_frame ──▶ SpeechPipeline
//!                                          │
//!                  ┌───────────────────────┴────────────────────────┐
//!                  ▼                                                ▼
//!        WakewordProcessor (listening)                 AsrProcessor (activated)
//!                  │                                                │
//!                  └──────────── ProcessorSink (epoch) ─────────────┘
//!                                          │
//!                                          ▼
//!                      control task: transitions, timeouts, NLU
//!                                          │
//!                                          ▼
//!                                 EventHub ─▶ listeners
//! ```
//!
//! # States
//!
//! ```text
//!   Idle ──start──▶ WakewordListening ──wakeword / activate()──▶ Activated
//!    ▲                     ▲                                         │
//!    │                     └──── final / timeout / error / deactivate┘
//!    └─────────stop()───────── any ──── N errors ──▶ Faulted ──start()──▶ …
//! ```
//!
//! `Suspended` is reported while suspended, whatever the underlying state.

pub mod runner;
pub mod stages;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use runner::{FrameDisposition, PipelineError, SpeechPipeline};
pub use stages::{DetectorFactory, StageRegistry};
pub use state::{PipelineState, SpeechContext};
