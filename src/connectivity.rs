use std::sync::{Arc, Mutex};

/// Passive reachability signal reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Reachability::Reachable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type ReachabilityCallback = Arc<dyn Fn(Reachability) + Send + Sync>;

/// Source of passive connectivity signals (OS network state, a supervisor, ...).
pub trait ConnectivitySource: Send + Sync {
    /// Current platform indicator, `None` if the platform cannot tell.
    fn is_reachable(&self) -> Option<bool>;

    fn subscribe(&self, callback: ReachabilityCallback) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// In-process source whose signals are raised by calling [`ManualConnectivity::signal`].
#[derive(Clone, Default)]
pub struct ManualConnectivity {
    inner: Arc<Mutex<ManualInner>>,
}

#[derive(Default)]
struct ManualInner {
    current: Option<bool>,
    next_id: u64,
    subscribers: Vec<(SubscriptionId, ReachabilityCallback)>,
}

impl ManualConnectivity {
    /// A source with no current indicator.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(online: bool) -> Self {
        let source = Self::default();
        source.lock().current = Some(online);
        source
    }

    /// Record the new state and notify every subscriber.
    pub fn signal(&self, reachability: Reachability) {
        let targets: Vec<ReachabilityCallback> = {
            let mut inner = self.lock();
            inner.current = Some(reachability.is_reachable());
            inner.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
        };
        tracing::debug!("connectivity signal {:?} -> {} subscriber(s)", reachability, targets.len());
        for cb in targets {
            cb(reachability);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConnectivitySource for ManualConnectivity {
    fn is_reachable(&self) -> Option<bool> {
        self.lock().current
    }

    fn subscribe(&self, callback: ReachabilityCallback) -> SubscriptionId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.subscribers.push((id, callback));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().subscribers.retain(|(sid, _)| *sid != id);
    }
}
