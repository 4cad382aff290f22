//! Speech pipeline: the activation state machine.
//!
//! [`SpeechPipeline`] owns the stages of one run, routes frames to them and
//! turns what they report into [`PipelineEvent`]s.
//!
//! # Threads and locks
//!
//! ```text
//! capture thread ── process_frame ──▶ core lock ─▶ wakeword.feed ─▶ asr.feed (try_send)
//!                                                      │                │
//!                                        ProcessorSink (unbounded) ◀────┘ (ASR worker task)
//!                                                      ▼
//! control task ── select! { stage message, timeout tick } ──▶ core lock ─▶ transitions
//!                                                      ▼
//!                                              EventPublisher ─▶ "speech-events"
//! ```
//!
//! Every transition happens with the core lock held.  The context lock is
//! only ever taken inside it (core, then context), except by `snapshot()`.
//!
//! # Stale results
//!
//! Each wakeword listening window and each utterance has an epoch.  Stage
//! sinks are stamped with the epoch they were opened under; leaving the
//! window or utterance bumps the epoch, so anything still in flight is
//! recognised as stale and dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audio::AudioFrame;
use crate::config::{ConfigError, RacePolicy, SpeechConfig};
use crate::events::{ErrorKind, EventHub, EventPublisher, PipelineEvent, TraceLevel};
use crate::nlu::NluService;
use crate::processor::{
    AsrProcessor, FeedOutcome, ProcessorError, ProcessorEvent, ProcessorSink, SpeechProcessor,
    StageKind, StageMessage, WakewordProcessor,
};

use super::stages::StageRegistry;
use super::state::{PipelineState, SpeechContext};

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// Errors returned by the control surface.  Every one of them is also
/// published as an `Error` event.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("pipeline is not running")]
    NotRunning,

    #[error("pipeline is faulted; call start() to recover")]
    Faulted,
}

/// What happened to a frame passed to [`SpeechPipeline::process_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    Delivered,
    DroppedIdle,
    DroppedSuspended,
    /// The pipeline is faulted.
    Rejected,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Listening,
    Activated,
    Faulted,
}

/// Everything built by one `start()`.
struct Run {
    config: Arc<SpeechConfig>,
    wakeword: Option<WakewordProcessor>,
    asr: AsrProcessor,
    nlu: Option<Arc<dyn NluService>>,
    stage_tx: UnboundedSender<StageMessage>,
    control: JoinHandle<()>,
    classifications: Vec<JoinHandle<()>>,
}

impl Run {
    fn shutdown(mut self) {
        if let Some(wakeword) = self.wakeword.as_mut() {
            wakeword.close();
        }
        self.asr.close();
        self.control.abort();
        for task in self.classifications {
            task.abort();
        }
    }
}

struct Core {
    phase: Phase,
    run: Option<Run>,
    /// Bumped whenever a run ends; background results from older runs are
    /// discarded.
    generation: u64,
    suspended_at: Option<Instant>,
    listen_epoch: u64,
    utterance_epoch: u64,
    consecutive_errors: u32,
    activated_at: Instant,
    last_activity: Instant,
    /// A rejected frame has already been reported since the fault.
    fault_reported: bool,
}

struct Shared {
    this: Weak<Shared>,
    core: Mutex<Core>,
    context: Mutex<SpeechContext>,
    events: EventPublisher,
    stages: StageRegistry,
    runtime: Handle,
}

// ---------------------------------------------------------------------------
// SpeechPipeline
// ---------------------------------------------------------------------------

/// The speech pipeline control surface.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use speech_pipeline::audio::AudioFrame;
/// use speech_pipeline::config::SpeechConfig;
/// use speech_pipeline::events::{EventFilter, EventHub, PipelineEvent};
/// use speech_pipeline::pipeline::{SpeechPipeline, StageRegistry};
///
/// # fn run(runtime: &tokio::runtime::Runtime) -> anyhow::Result<()> {
/// let hub = EventHub::new()?;
/// hub.register(EventFilter::All, Arc::new(|e: &PipelineEvent| println!("{e:?}")));
///
/// let pipeline = SpeechPipeline::new(StageRegistry::new(), &hub, runtime.handle().clone());
/// pipeline.start(SpeechConfig::load()?)?;
/// pipeline.process_frame(&AudioFrame::constant(0, 320, 0.0));
/// pipeline.stop();
/// # Ok(())
/// # }
/// ```
pub struct SpeechPipeline {
    shared: Arc<Shared>,
}

impl SpeechPipeline {
    /// Create a stopped pipeline publishing to `hub`.  Background work is
    /// spawned on `runtime`.
    pub fn new(stages: StageRegistry, hub: &EventHub, runtime: Handle) -> Self {
        let now = Instant::now();
        Self {
            shared: Arc::new_cyclic(|this| Shared {
                this: this.clone(),
                core: Mutex::new(Core {
                    phase: Phase::Idle,
                    run: None,
                    generation: 0,
                    suspended_at: None,
                    listen_epoch: 0,
                    utterance_epoch: 0,
                    consecutive_errors: 0,
                    activated_at: now,
                    last_activity: now,
                    fault_reported: false,
                }),
                context: Mutex::new(SpeechContext::default()),
                events: hub.publisher(),
                stages,
                runtime,
            }),
        }
    }

    /// Validate `config`, build its stages and begin listening (or go
    /// straight to Activated when the profile has no wakeword stage).
    ///
    /// A running pipeline is stopped first.  On error the pipeline is left
    /// Idle.
    pub fn start(&self, config: SpeechConfig) -> Result<(), PipelineError> {
        self.shared.start(config)
    }

    /// Return to Idle and release every stage.  Idempotent.
    pub fn stop(&self) {
        let mut core = self.shared.lock_core();
        self.shared.teardown(&mut core);
    }

    /// Force the Activated state.  A no-op when already activated.
    pub fn activate(&self) -> Result<(), PipelineError> {
        self.shared.activate()
    }

    /// Abandon the current utterance, or restart the wakeword listening
    /// window when listening.  A no-op when Idle.
    pub fn deactivate(&self) {
        self.shared.deactivate()
    }

    /// Pause frame delivery and freeze the inactivity timer.
    pub fn suspend(&self) {
        let mut core = self.shared.lock_core();
        if core.suspended_at.is_none() {
            core.suspended_at = Some(Instant::now());
            log::info!("pipeline: suspended");
            self.shared.trace(&core, TraceLevel::Debug, "suspended");
        }
    }

    pub fn resume(&self) {
        let mut core = self.shared.lock_core();
        if let Some(at) = core.suspended_at.take() {
            let paused = at.elapsed();
            core.activated_at += paused;
            core.last_activity += paused;
            log::info!("pipeline: resumed after {}ms", paused.as_millis());
            self.shared.trace(&core, TraceLevel::Debug, "resumed");
        }
    }

    /// Route one frame to the active stages.  Never blocks on I/O.
    pub fn process_frame(&self, frame: &AudioFrame) -> FrameDisposition {
        self.shared.process_frame(frame)
    }

    pub fn state(&self) -> PipelineState {
        let core = self.shared.lock_core();
        if core.suspended_at.is_some() {
            return PipelineState::Suspended;
        }
        match core.phase {
            Phase::Idle => PipelineState::Idle,
            Phase::Listening => PipelineState::WakewordListening,
            Phase::Activated => PipelineState::Activated,
            Phase::Faulted => PipelineState::Faulted,
        }
    }

    /// Copy of the current speech context.
    pub fn snapshot(&self) -> SpeechContext {
        self.shared.lock_context().clone()
    }

    /// Configuration of the current run.
    pub fn config(&self) -> Option<Arc<SpeechConfig>> {
        self.shared
            .lock_core()
            .run
            .as_ref()
            .map(|run| Arc::clone(&run.config))
    }

    #[cfg(test)]
    fn inject(&self, message: StageMessage) {
        self.shared.on_stage_message(message);
    }

    #[cfg(test)]
    fn listen_epoch(&self) -> u64 {
        self.shared.lock_core().listen_epoch
    }
}

impl Drop for SpeechPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

impl Shared {
    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_context(&self) -> MutexGuard<'_, SpeechContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn trace(&self, core: &Core, level: TraceLevel, message: impl Into<String>) {
        let enabled = core
            .run
            .as_ref()
            .is_some_and(|run| run.config.pipeline.trace_level.allows(level));
        if enabled {
            self.events.publish(PipelineEvent::trace(level, message));
        }
    }

    fn start(&self, config: SpeechConfig) -> Result<(), PipelineError> {
        let mut core = self.lock_core();
        self.teardown(&mut core);

        if let Err(e) = config.validate() {
            log::error!("pipeline: rejected configuration: {e}");
            self.events
                .publish(PipelineEvent::error(ErrorKind::Configuration, e.to_string()));
            return Err(e.into());
        }
        let config = Arc::new(config);

        let built = self.stages.build_wakeword(&config).and_then(|wakeword| {
            let asr = self.stages.build_asr(&config, self.runtime.clone())?;
            let nlu = self.stages.build_nlu(&config)?;
            Ok((wakeword, asr, nlu))
        });
        let (wakeword, asr, nlu) = match built {
            Ok(stages) => stages,
            Err(e) => {
                log::error!("pipeline: failed to build stages: {e}");
                self.events
                    .publish(PipelineEvent::error(ErrorKind::Configuration, e.to_string()));
                return Err(e.into());
            }
        };

        let (stage_tx, stage_rx) = mpsc::unbounded_channel();
        let tick = config.audio.frame_period();
        let control = self
            .runtime
            .spawn(control_loop(self.this.clone(), stage_rx, tick));

        let listens = config.pipeline.profile.has_wakeword();
        core.run = Some(Run {
            config,
            wakeword,
            asr,
            nlu,
            stage_tx,
            control,
            classifications: Vec::new(),
        });
        core.consecutive_errors = 0;
        core.fault_reported = false;
        self.lock_context().reset();

        if listens {
            self.resume_listening(&mut core);
        } else {
            self.enter_activated(&mut core);
        }
        log::info!("pipeline: started ({:?})", core.phase);
        Ok(())
    }

    /// Drop the current run and go Idle.  Emits `Deactivate` if anything
    /// was running.
    fn teardown(&self, core: &mut Core) {
        let was_running = core.run.is_some() || core.phase != Phase::Idle;
        if let Some(run) = core.run.take() {
            run.shutdown();
        }
        core.generation += 1;
        core.listen_epoch += 1;
        core.utterance_epoch += 1;
        core.phase = Phase::Idle;
        core.suspended_at = None;
        self.lock_context().reset();

        if was_running {
            log::info!("pipeline: stopped");
            self.events.publish(PipelineEvent::Deactivate);
        }
    }

    fn activate(&self) -> Result<(), PipelineError> {
        let mut core = self.lock_core();
        match core.phase {
            Phase::Faulted => {
                self.events.publish(PipelineEvent::error(
                    ErrorKind::Faulted,
                    "activate() rejected: pipeline is faulted",
                ));
                Err(PipelineError::Faulted)
            }
            _ if core.run.is_none() => Err(PipelineError::NotRunning),
            Phase::Activated => Ok(()),
            Phase::Idle | Phase::Listening => {
                log::info!("pipeline: manual activation");
                self.enter_activated(&mut core);
                Ok(())
            }
        }
    }

    fn deactivate(&self) {
        let mut core = self.lock_core();
        match core.phase {
            Phase::Activated => {
                log::info!("pipeline: manual deactivation");
                if let Some(run) = core.run.as_mut() {
                    run.asr.finalize();
                }
                self.exit_activated(&mut core);
            }
            // Restarting the window invalidates detections still in flight.
            Phase::Listening => self.resume_listening(&mut core),
            Phase::Idle | Phase::Faulted => {}
        }
    }

    /// Open a new wakeword window, or go Idle when there is no wakeword stage.
    fn resume_listening(&self, core: &mut Core) {
        core.listen_epoch += 1;
        let epoch = core.listen_epoch;
        let Some(run) = core.run.as_mut() else {
            core.phase = Phase::Idle;
            return;
        };
        let Some(wakeword) = run.wakeword.as_mut() else {
            core.phase = Phase::Idle;
            return;
        };

        let sink = ProcessorSink::new(StageKind::Wakeword, epoch, run.stage_tx.clone());
        match wakeword.open(sink) {
            Ok(()) => core.phase = Phase::Listening,
            Err(e) => self.fault(core, format!("wakeword stage failed to open: {e}")),
        }
    }

    fn enter_activated(&self, core: &mut Core) {
        core.utterance_epoch += 1;
        let epoch = core.utterance_epoch;
        let Some(run) = core.run.as_mut() else {
            return;
        };

        let sink = ProcessorSink::new(StageKind::Asr, epoch, run.stage_tx.clone());
        match run.asr.open(sink) {
            Ok(()) => {
                let now = Instant::now();
                core.phase = Phase::Activated;
                core.activated_at = now;
                core.last_activity = now;
                self.lock_context().begin_utterance();
                self.events.publish(PipelineEvent::Activate);
                self.trace(core, TraceLevel::Debug, "asr stage opened");
            }
            Err(e) => self.stage_failed(core, StageKind::Asr, e),
        }
    }

    /// Normal end of an utterance.
    fn exit_activated(&self, core: &mut Core) {
        core.utterance_epoch += 1;
        if let Some(run) = core.run.as_mut() {
            run.asr.close();
        }
        self.lock_context().end_utterance();
        self.events.publish(PipelineEvent::Deactivate);
        self.resume_listening(core);
    }

    fn stage_failed(&self, core: &mut Core, stage: StageKind, error: ProcessorError) {
        let kind = error.kind();
        log::warn!("pipeline: {stage:?} stage failed: {error}");
        self.lock_context().error = Some(kind);
        self.events.publish(PipelineEvent::error(kind, error.to_string()));

        core.consecutive_errors += 1;
        let threshold = core
            .run
            .as_ref()
            .map_or(1, |run| run.config.pipeline.fault_threshold);

        if core.phase == Phase::Activated {
            core.utterance_epoch += 1;
            if let Some(run) = core.run.as_mut() {
                run.asr.close();
            }
            self.lock_context().end_utterance();
            self.events.publish(PipelineEvent::Deactivate);
        }

        if !error.is_recoverable() || core.consecutive_errors >= threshold {
            let reason = format!(
                "{} consecutive stage failures, last: {error}",
                core.consecutive_errors
            );
            self.fault(core, reason);
        } else {
            self.resume_listening(core);
        }
    }

    fn fault(&self, core: &mut Core, reason: String) {
        log::error!("pipeline: faulted: {reason}");
        if let Some(run) = core.run.take() {
            run.shutdown();
        }
        core.generation += 1;
        core.listen_epoch += 1;
        core.utterance_epoch += 1;
        core.phase = Phase::Faulted;
        core.fault_reported = false;
        self.lock_context().end_utterance();
        self.events
            .publish(PipelineEvent::error(ErrorKind::Faulted, reason));
    }

    fn process_frame(&self, frame: &AudioFrame) -> FrameDisposition {
        let mut core = self.lock_core();
        if core.suspended_at.is_some() {
            return FrameDisposition::DroppedSuspended;
        }

        let activated = match core.phase {
            Phase::Idle => return FrameDisposition::DroppedIdle,
            Phase::Faulted => {
                if !core.fault_reported {
                    core.fault_reported = true;
                    self.events.publish(PipelineEvent::error(
                        ErrorKind::Faulted,
                        "frame rejected: pipeline is faulted",
                    ));
                }
                return FrameDisposition::Rejected;
            }
            Phase::Listening => false,
            Phase::Activated => true,
        };
        let Some(run) = core.run.as_mut() else {
            return FrameDisposition::DroppedIdle;
        };

        let mut context = self.lock_context();
        if let Some(wakeword) = run.wakeword.as_mut() {
            wakeword.feed(frame, &mut context);
        }
        let dropped = activated && run.asr.feed(frame, &mut context) == FeedOutcome::QueueFull;
        let speaking = context.is_speech;
        drop(context);

        if speaking {
            core.last_activity = Instant::now();
        }
        if dropped {
            self.trace(
                &core,
                TraceLevel::Info,
                format!("asr queue full, dropped frame {}", frame.seq),
            );
        }
        FrameDisposition::Delivered
    }

    fn on_stage_message(&self, message: StageMessage) {
        let mut core = self.lock_core();
        match message.stage {
            StageKind::Wakeword => self.on_wakeword(&mut core, message),
            StageKind::Asr => self.on_asr(&mut core, message),
        }
    }

    fn on_wakeword(&self, core: &mut Core, message: StageMessage) {
        let Some(policy) = core.run.as_ref().map(|r| r.config.pipeline.race_policy) else {
            return;
        };
        let current = message.epoch == core.listen_epoch;
        let honored = current || policy == RacePolicy::HonorLateWakeword;
        if core.phase != Phase::Listening || !honored {
            log::debug!(
                "pipeline: dropped wakeword message from epoch {} ({:?})",
                message.epoch,
                core.phase
            );
            return;
        }

        match message.event {
            ProcessorEvent::Recognize {
                transcript,
                confidence,
            } => {
                self.events.publish(PipelineEvent::Recognize {
                    source: StageKind::Wakeword,
                    transcript,
                    confidence,
                });
                self.enter_activated(core);
            }
            ProcessorEvent::Trace { level, message } => self.trace(core, level, message),
            ProcessorEvent::Error(e) if current => self.stage_failed(core, StageKind::Wakeword, e),
            _ => {}
        }
    }

    fn on_asr(&self, core: &mut Core, message: StageMessage) {
        if core.phase != Phase::Activated || message.epoch != core.utterance_epoch {
            log::debug!("pipeline: dropped stale asr message from epoch {}", message.epoch);
            return;
        }

        match message.event {
            ProcessorEvent::Partial { transcript } => {
                core.last_activity = Instant::now();
                self.lock_context().transcript = transcript.clone();
                self.events.publish(PipelineEvent::Partial { transcript });
            }
            ProcessorEvent::Recognize {
                transcript,
                confidence,
            } => {
                {
                    let mut context = self.lock_context();
                    context.transcript = transcript.clone();
                    context.confidence = confidence;
                }
                log::info!("pipeline: recognized {transcript:?} ({confidence:.2})");
                self.events.publish(PipelineEvent::Recognize {
                    source: StageKind::Asr,
                    transcript: transcript.clone(),
                    confidence,
                });
                core.consecutive_errors = 0;
                self.classify(core, transcript);
                self.exit_activated(core);
            }
            ProcessorEvent::Timeout => {
                log::info!("pipeline: utterance ended without speech");
                self.events.publish(PipelineEvent::Timeout);
                self.exit_activated(core);
            }
            ProcessorEvent::Trace { level, message } => self.trace(core, level, message),
            ProcessorEvent::Error(e) => self.stage_failed(core, StageKind::Asr, e),
        }
    }

    /// Classify off the control path; failure never affects the pipeline.
    /// Results are dropped once the run that produced the transcript ends.
    fn classify(&self, core: &mut Core, transcript: String) {
        let generation = core.generation;
        let Some(run) = core.run.as_mut() else {
            return;
        };
        let Some(nlu) = run.nlu.clone() else {
            return;
        };

        let shared = self.this.clone();
        let task = self.runtime.spawn(async move {
            let event = match nlu.classify(&transcript).await {
                Ok(result) => {
                    log::debug!("nlu: {transcript:?} → {}", result.intent);
                    PipelineEvent::Classify { transcript, result }
                }
                Err(e) => {
                    log::warn!("nlu: classification failed: {e}");
                    PipelineEvent::error(e.kind(), e.to_string())
                }
            };
            if let Some(shared) = shared.upgrade() {
                shared.publish_for_run(generation, event);
            }
        });
        run.classifications.retain(|task| !task.is_finished());
        run.classifications.push(task);
    }

    /// Publish `event` only if the run `generation` is still current.
    fn publish_for_run(&self, generation: u64, event: PipelineEvent) {
        let core = self.lock_core();
        if core.generation == generation && core.run.is_some() {
            self.events.publish(event);
        } else {
            log::debug!("pipeline: dropped {:?} from an earlier run", event.kind());
        }
    }

    fn check_timeouts(&self) {
        let mut core = self.lock_core();
        if core.phase != Phase::Activated || core.suspended_at.is_some() {
            return;
        }
        let Some(config) = core.run.as_ref().map(|run| Arc::clone(&run.config)) else {
            return;
        };

        let now = Instant::now();
        let idle = now.duration_since(core.last_activity) >= config.inactivity_timeout();
        let too_long = config
            .active_max()
            .is_some_and(|max| now.duration_since(core.activated_at) >= max);
        if !(idle || too_long) {
            return;
        }

        log::info!(
            "pipeline: activation timed out ({})",
            if idle { "inactivity" } else { "max duration" }
        );
        if let Some(run) = core.run.as_mut() {
            run.asr.finalize();
        }
        self.events.publish(PipelineEvent::Timeout);
        self.exit_activated(&mut core);
    }
}

/// Serialises stage messages and timeout checks for one run.
async fn control_loop(
    shared: Weak<Shared>,
    mut stage_rx: UnboundedReceiver<StageMessage>,
    tick: Duration,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            message = stage_rx.recv() => {
                let (Some(message), Some(shared)) = (message, shared.upgrade()) else { break };
                shared.on_stage_message(message);
            }
            _ = ticker.tick() => {
                let Some(shared) = shared.upgrade() else { break };
                shared.check_timeouts();
            }
        }
    }
    log::debug!("pipeline: control task exiting");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
