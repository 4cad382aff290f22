//! Listener registry: who receives which events, in what order.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use super::{EventKind, PipelineEvent};

// ---------------------------------------------------------------------------
// EventBridge
// ---------------------------------------------------------------------------

/// Receiver of pipeline events.
///
/// Called on the `speech-events` dispatch thread.  Crossing into another
/// runtime (serialization, thread hops) is the implementor's job.
///
/// Any `Fn(&PipelineEvent) + Send + Sync` closure is a bridge.
pub trait EventBridge: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

impl<F> EventBridge for F
where
    F: Fn(&PipelineEvent) + Send + Sync,
{
    fn emit(&self, event: &PipelineEvent) {
        self(event)
    }
}

/// Forwards events into a tokio unbounded channel.
///
/// Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelBridge(pub UnboundedSender<PipelineEvent>);

impl EventBridge for ChannelBridge {
    fn emit(&self, event: &PipelineEvent) {
        let _ = self.0.send(event.clone());
    }
}

// ---------------------------------------------------------------------------
// EventFilter
// ---------------------------------------------------------------------------

/// Event kinds a listener subscribes to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EventFilter {
    #[default]
    All,
    Only(HashSet<EventKind>),
}

impl EventFilter {
    pub fn only(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        EventFilter::Only(kinds.into_iter().collect())
    }

    pub fn matches(&self, kind: EventKind) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(kinds) => kinds.contains(&kind),
        }
    }
}

// ---------------------------------------------------------------------------
// ListenerRegistry
// ---------------------------------------------------------------------------

/// Handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Entry {
    id: ListenerId,
    filter: EventFilter,
    bridge: Arc<dyn EventBridge>,
}

/// Ordered set of listeners.  Insertion order is delivery order.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    entries: Vec<Entry>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, filter: EventFilter, bridge: Arc<dyn EventBridge>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry { id, filter, bridge });
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Listeners subscribed to `kind`, in delivery order.
    pub fn subscribers(&self, kind: EventKind) -> Vec<Arc<dyn EventBridge>> {
        self.entries
            .iter()
            .filter(|e| e.filter.matches(kind))
            .map(|e| Arc::clone(&e.bridge))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Arc<dyn EventBridge> {
        let log = Arc::clone(log);
        Arc::new(move |e: &PipelineEvent| {
            log.lock().unwrap().push(format!("{name}:{:?}", e.kind()));
        })
    }

    fn deliver(registry: &ListenerRegistry, event: &PipelineEvent) {
        for bridge in registry.subscribers(event.kind()) {
            bridge.emit(event);
        }
    }

    #[test]
    fn delivers_in_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        registry.register(EventFilter::All, recorder(&log, "b"));
        registry.register(EventFilter::All, recorder(&log, "a"));

        deliver(&registry, &PipelineEvent::Activate);
        assert_eq!(*log.lock().unwrap(), vec!["b:Activate", "a:Activate"]);
    }

    #[test]
    fn filters_by_kind() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        registry.register(
            EventFilter::only([EventKind::Timeout]),
            recorder(&log, "t"),
        );

        deliver(&registry, &PipelineEvent::Activate);
        deliver(&registry, &PipelineEvent::Timeout);
        assert_eq!(*log.lock().unwrap(), vec!["t:Timeout"]);
    }

    #[test]
    fn unregister_removes_listener() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        let id = registry.register(EventFilter::All, recorder(&log, "x"));

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());

        deliver(&registry, &PipelineEvent::Deactivate);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn channel_bridge_forwards_clones() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let bridge = ChannelBridge(tx);
        bridge.emit(&PipelineEvent::Timeout);
        assert_eq!(rx.try_recv().unwrap(), PipelineEvent::Timeout);
    }
}
