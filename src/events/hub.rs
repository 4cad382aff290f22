//! Event dispatch on a dedicated `speech-events` thread.
//!
//! Publishing is a non-blocking channel send, so neither the capture thread
//! nor runtime tasks ever wait on a slow listener.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{EventBridge, EventFilter, ListenerId, ListenerRegistry, PipelineEvent};

enum Dispatch {
    Event(PipelineEvent),
    /// Acknowledged once every earlier event has been delivered.
    Flush(mpsc::Sender<()>),
    Shutdown,
}

// ---------------------------------------------------------------------------
// EventPublisher
// ---------------------------------------------------------------------------

/// Cloneable sending half handed to the pipeline and services.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<Dispatch>,
}

impl EventPublisher {
    /// Queue `event` for delivery.  Dropped silently after the hub shuts down.
    pub fn publish(&self, event: PipelineEvent) {
        if self.tx.send(Dispatch::Event(event)).is_err() {
            log::debug!("events: hub closed, event dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// EventHub
// ---------------------------------------------------------------------------

/// Owns the listener registry and the dispatch thread.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use speech_pipeline::events::{EventFilter, EventHub, PipelineEvent};
///
/// let hub = EventHub::new().unwrap();
/// hub.register(EventFilter::All, Arc::new(|e: &PipelineEvent| println!("{e:?}")));
/// hub.publisher().publish(PipelineEvent::Activate);
/// ```
pub struct EventHub {
    registry: Arc<Mutex<ListenerRegistry>>,
    tx: mpsc::Sender<Dispatch>,
    worker: Option<JoinHandle<()>>,
}

impl EventHub {
    pub fn new() -> io::Result<Self> {
        let registry = Arc::new(Mutex::new(ListenerRegistry::new()));
        let (tx, rx) = mpsc::channel::<Dispatch>();

        let worker_registry = Arc::clone(&registry);
        let worker = std::thread::Builder::new()
            .name("speech-events".into())
            .spawn(move || dispatch_loop(rx, worker_registry))?;

        Ok(Self {
            registry,
            tx,
            worker: Some(worker),
        })
    }

    pub fn register(&self, filter: EventFilter, bridge: Arc<dyn EventBridge>) -> ListenerId {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(filter, bridge)
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister(id)
    }

    pub fn listener_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn publisher(&self) -> EventPublisher {
        EventPublisher {
            tx: self.tx.clone(),
        }
    }

    /// Block until every event published before this call has been delivered,
    /// or `timeout` elapses.  Returns `false` on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.tx.send(Dispatch::Flush(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }
}

impl Drop for EventHub {
    fn drop(&mut self) {
        let _ = self.tx.send(Dispatch::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("events: dispatch thread panicked");
            }
        }
    }
}

fn dispatch_loop(rx: mpsc::Receiver<Dispatch>, registry: Arc<Mutex<ListenerRegistry>>) {
    while let Ok(message) = rx.recv() {
        match message {
            Dispatch::Event(event) => {
                // Listeners run without the registry lock so they may
                // register or unregister from inside a callback.
                let subscribers = registry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .subscribers(event.kind());
                for bridge in subscribers {
                    let delivered = panic::catch_unwind(AssertUnwindSafe(|| bridge.emit(&event)));
                    if delivered.is_err() {
                        log::error!("events: listener panicked on {:?}", event.kind());
                    }
                }
            }
            Dispatch::Flush(ack) => {
                let _ = ack.send(());
            }
            Dispatch::Shutdown => break,
        }
    }
    log::debug!("events: dispatch thread exiting");
}
