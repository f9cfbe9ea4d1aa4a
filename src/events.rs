use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const BROADCAST_CAPACITY: usize = 64;

/// Connectivity transition emitted by a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionEvent {
    Online,
    Offline,
}

impl ConnectionEvent {
    pub fn for_state(online: bool) -> Self {
        if online {
            ConnectionEvent::Online
        } else {
            ConnectionEvent::Offline
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionEvent::Online => "online",
            ConnectionEvent::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

struct Registration {
    id: ListenerId,
    filter: Option<ConnectionEvent>,
    listener: Listener,
}

#[derive(Default)]
struct Dispatch {
    queue: VecDeque<ConnectionEvent>,
    draining: bool,
}

/// Listener registry owned by a single monitor.
///
/// Callbacks run synchronously on the emitting task, in registration order.
/// A panicking callback is logged and skipped.
/// Async consumers can take a broadcast receiver with [`EventEmitter::subscribe`].
pub struct EventEmitter {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Registration>>,
    dispatch: Mutex<Dispatch>,
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        EventEmitter {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
            dispatch: Mutex::new(Dispatch::default()),
            tx,
        }
    }

    /// Register a callback for every transition.
    pub fn on(&self, listener: impl Fn(ConnectionEvent) + Send + Sync + 'static) -> ListenerId {
        self.register(None, Arc::new(listener))
    }

    /// Register a callback for one kind of transition only.
    pub fn on_event(
        &self,
        event: ConnectionEvent,
        listener: impl Fn(ConnectionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.register(Some(event), Arc::new(listener))
    }

    /// Returns false if the id was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    #[cfg(test)]
    pub(crate) fn emit(&self, event: ConnectionEvent) {
        self.emit_if(|| Some(event));
    }

    /// Run `transition` under the dispatch lock and deliver the event it returns.
    ///
    /// Events are delivered strictly in the order their transitions ran. An emit
    /// issued from inside a listener is queued and delivered after the current
    /// event has reached every listener and the broadcast channel.
    pub(crate) fn emit_if(&self, transition: impl FnOnce() -> Option<ConnectionEvent>) {
        {
            let mut dispatch = self.lock_dispatch();
            let Some(event) = transition() else {
                return;
            };
            dispatch.queue.push_back(event);
            if dispatch.draining {
                return;
            }
            dispatch.draining = true;
        }

        loop {
            let event = {
                let mut dispatch = self.lock_dispatch();
                match dispatch.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        dispatch.draining = false;
                        return;
                    }
                }
            };
            self.deliver(event);
        }
    }

    fn deliver(&self, event: ConnectionEvent) {
        // no receivers is fine
        let _ = self.tx.send(event);

        // snapshot so listeners may register/unregister while being notified
        let targets: Vec<Listener> = self
            .lock_listeners()
            .iter()
            .filter(|r| r.filter.map_or(true, |f| f == event))
            .map(|r| r.listener.clone())
            .collect();

        for listener in targets {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!("listener panicked while handling {} event", event.as_str());
            }
        }
    }

    fn register(&self, filter: Option<ConnectionEvent>, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_listeners().push(Registration { id, filter, listener });
        id
    }

    fn lock_dispatch(&self) -> std::sync::MutexGuard<'_, Dispatch> {
        self.dispatch.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<Registration>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<ConnectionEvent>>>, impl Fn(ConnectionEvent) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |e| sink.lock().unwrap().push(e))
    }

    #[test]
    fn test_listeners_receive_events_in_order() {
        let emitter = EventEmitter::new();
        let (seen, listener) = recorder();
        emitter.on(listener);

        emitter.emit(ConnectionEvent::Offline);
        emitter.emit(ConnectionEvent::Online);

        assert_eq!(*seen.lock().unwrap(), vec![ConnectionEvent::Offline, ConnectionEvent::Online]);
    }

    #[test]
    fn test_filtered_listener() {
        let emitter = EventEmitter::new();
        let (seen, listener) = recorder();
        emitter.on_event(ConnectionEvent::Online, listener);

        emitter.emit(ConnectionEvent::Offline);
        emitter.emit(ConnectionEvent::Online);
        emitter.emit(ConnectionEvent::Offline);

        assert_eq!(*seen.lock().unwrap(), vec![ConnectionEvent::Online]);
    }

    #[test]
    fn test_off_removes_listener() {
        let emitter = EventEmitter::new();
        let (seen, listener) = recorder();
        let id = emitter.on(listener);
        assert_eq!(emitter.listener_count(), 1);

        assert!(emitter.off(id));
        assert!(!emitter.off(id));
        emitter.emit(ConnectionEvent::Offline);

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let emitter = EventEmitter::new();
        emitter.on(|_| panic!("listener bug"));
        let (seen, listener) = recorder();
        emitter.on(listener);

        emitter.emit(ConnectionEvent::Offline);
        emitter.emit(ConnectionEvent::Online);

        assert_eq!(*seen.lock().unwrap(), vec![ConnectionEvent::Offline, ConnectionEvent::Online]);
    }

    #[test]
    fn test_nested_emit_is_delivered_after_current_event() {
        let emitter = Arc::new(EventEmitter::new());
        let mut rx = emitter.subscribe();
        let nested = Arc::downgrade(&emitter);
        emitter.on_event(ConnectionEvent::Offline, move |_| {
            if let Some(e) = nested.upgrade() {
                e.emit(ConnectionEvent::Online);
            }
        });
        let (seen, listener) = recorder();
        emitter.on(listener);

        emitter.emit(ConnectionEvent::Offline);

        assert_eq!(*seen.lock().unwrap(), vec![ConnectionEvent::Offline, ConnectionEvent::Online]);
        assert_eq!(rx.try_recv().unwrap(), ConnectionEvent::Offline);
        assert_eq!(rx.try_recv().unwrap(), ConnectionEvent::Online);
    }

    #[test]
    fn test_emit_if_skips_when_transition_declines() {
        let emitter = EventEmitter::new();
        let (seen, listener) = recorder();
        emitter.on(listener);

        emitter.emit_if(|| None);

        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_subscriber() {
        let emitter = EventEmitter::new();
        let mut rx = emitter.subscribe();

        emitter.emit(ConnectionEvent::Offline);

        assert_eq!(rx.recv().await.unwrap(), ConnectionEvent::Offline);
    }

    #[test]
    fn test_event_serializes_lowercase() {
        let json = serde_json::to_string(&ConnectionEvent::Online).unwrap();
        assert_eq!(json, "\"online\"");
        assert_eq!(ConnectionEvent::for_state(false).as_str(), "offline");
    }
}
