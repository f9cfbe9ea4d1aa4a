//! Connection monitor: reconciles passive connectivity signals and active
//! heartbeat probes into one online/offline flag.
//!
//! The flag only changes inside [`MonitorInner::toggle_and_emit`], and every
//! change emits exactly one [`ConnectionEvent`]. Signals that agree with the
//! current state are dropped, so notifications are edge-triggered.

use crate::config::MonitorConfig;
use crate::connectivity::{ConnectivitySource, ManualConnectivity, ReachabilityCallback, SubscriptionId};
use crate::error::{ConfigurationError, MonitorError};
use crate::events::{ConnectionEvent, EventEmitter, ListenerId};
use crate::heartbeat::{classify, HeartbeatTransport, ReqwestTransport, StatusClassifier};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(60_000);

#[derive(Clone)]
pub struct MonitorOptions {
    pub active_monitoring: bool,
    pub heartbeat_interval: Duration,
    pub heartbeat_url: Option<String>,
    /// Replaces the default "status 200 means success" rule.
    pub heartbeat_status: Option<StatusClassifier>,
    pub request_timeout: Option<Duration>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            active_monitoring: false,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_url: None,
            heartbeat_status: None,
            request_timeout: None,
        }
    }
}

impl fmt::Debug for MonitorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorOptions")
            .field("active_monitoring", &self.active_monitoring)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("heartbeat_url", &self.heartbeat_url)
            .field("heartbeat_status", &self.heartbeat_status.as_ref().map(|_| "custom"))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl From<&MonitorConfig> for MonitorOptions {
    fn from(cfg: &MonitorConfig) -> Self {
        Self {
            active_monitoring: cfg.active_monitoring,
            heartbeat_interval: Duration::from_millis(cfg.heartbeat_interval_ms),
            heartbeat_url: cfg.heartbeat_url.clone(),
            heartbeat_status: None,
            request_timeout: cfg.request_timeout_ms.map(Duration::from_millis),
        }
    }
}

impl MonitorOptions {
    pub fn active(url: impl Into<String>) -> Self {
        Self {
            active_monitoring: true,
            heartbeat_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigurationError::ZeroHeartbeatInterval);
        }
        if self.active_monitoring && self.heartbeat_url.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigurationError::MissingHeartbeatUrl);
        }
        Ok(())
    }
}

/// Handle to a connection monitor. Clones share the same state.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    online: AtomicBool,
    heartbeat_interval: Duration,
    /// Set only when active monitoring is enabled.
    heartbeat_url: Option<String>,
    heartbeat_status: Option<StatusClassifier>,
    source: Arc<dyn ConnectivitySource>,
    transport: Arc<dyn HeartbeatTransport>,
    events: EventEmitter,
    session: Mutex<Option<Session>>,
}

/// Everything a running monitor owns; dropped as a unit by `stop()`.
struct Session {
    token: CancellationToken,
    subscription: SubscriptionId,
    /// Present iff heartbeat polling is scheduled.
    poller: Option<Poller>,
}

struct Poller {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Poller {
    fn cancel(self) {
        self.token.cancel();
        self.handle.abort();
    }
}

impl Monitor {
    /// Monitor with no platform indicator (starts online) and an HTTP transport.
    pub fn new(options: MonitorOptions) -> Result<Self, MonitorError> {
        Self::with_source(options, Arc::new(ManualConnectivity::new()))
    }

    pub fn with_source(
        options: MonitorOptions,
        source: Arc<dyn ConnectivitySource>,
    ) -> Result<Self, MonitorError> {
        options.validate()?;
        let transport = Arc::new(ReqwestTransport::new(options.request_timeout)?);
        Self::with_collaborators(options, source, transport)
    }

    pub fn with_collaborators(
        options: MonitorOptions,
        source: Arc<dyn ConnectivitySource>,
        transport: Arc<dyn HeartbeatTransport>,
    ) -> Result<Self, MonitorError> {
        options.validate()?;

        let online = source.is_reachable().unwrap_or(true);
        let heartbeat_url = if options.active_monitoring { options.heartbeat_url } else { None };

        tracing::debug!(
            "connection monitor created: online={}, heartbeat_url={:?}, interval={:?}",
            online,
            heartbeat_url,
            options.heartbeat_interval
        );

        Ok(Monitor {
            inner: Arc::new(MonitorInner {
                online: AtomicBool::new(online),
                heartbeat_interval: options.heartbeat_interval,
                heartbeat_url,
                heartbeat_status: options.heartbeat_status,
                source,
                transport,
                events: EventEmitter::new(),
                session: Mutex::new(None),
            }),
        })
    }

    /// Subscribe to passive signals and, with active monitoring, probe now and
    /// then every heartbeat interval.
    ///
    /// Calling `start` on a running monitor logs a warning and does nothing.
    pub fn start(&self) -> Result<(), MonitorError> {
        if self.is_running() {
            tracing::warn!("connection monitor already started; ignoring start()");
            return Ok(());
        }

        let runtime = match self.inner.heartbeat_url {
            Some(_) => Some(Handle::try_current().map_err(|_| MonitorError::NoRuntime)?),
            None => None,
        };

        // The source may invoke the callback before subscribe() returns, and
        // listeners may call back into the monitor: no session lock held here.
        let token = CancellationToken::new();
        let subscription = self.inner.source.subscribe(self.passive_callback(token.clone()));
        let poller = runtime.map(|rt| self.spawn_poller(&rt, &token));
        let active = poller.is_some();
        let fresh = Session { token, subscription, poller };

        let mut session = self.inner.lock_session();
        if session.is_some() {
            drop(session);
            self.inner.end_session(fresh);
            tracing::warn!("connection monitor already started; ignoring start()");
            return Ok(());
        }
        *session = Some(fresh);
        drop(session);

        tracing::info!("connection monitor started (online={}, active={})", self.status(), active);
        Ok(())
    }

    /// Unsubscribe from passive signals and cancel polling. Safe to call at any time.
    pub fn stop(&self) {
        let Some(session) = self.inner.lock_session().take() else {
            tracing::debug!("connection monitor not running; stop() is a no-op");
            return;
        };
        self.inner.end_session(session);
        tracing::info!("connection monitor stopped");
    }

    /// Restart the probe cycle: cancel the pending probe, probe immediately and
    /// reset the interval countdown. Passive subscriptions are untouched.
    ///
    /// No-op when the monitor is stopped or active monitoring is disabled.
    pub fn retry(&self) -> Result<(), MonitorError> {
        let mut guard = self.inner.lock_session();
        let Some(session) = guard.as_mut() else {
            tracing::debug!("retry() ignored: monitor not started");
            return Ok(());
        };
        if self.inner.heartbeat_url.is_none() {
            tracing::debug!("retry() ignored: active monitoring disabled");
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;
        if let Some(poller) = session.poller.take() {
            poller.cancel();
        }
        session.poller = Some(self.spawn_poller(&runtime, &session.token));
        tracing::debug!("heartbeat cycle restarted");
        Ok(())
    }

    pub fn status(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    /// Run one probe right now and apply its result.
    ///
    /// On a running monitor the probe belongs to the current session: if the
    /// monitor is stopped before it completes, the result is discarded and
    /// `Some(false)` is returned. On a stopped monitor the result is applied
    /// directly. Returns `None` when active monitoring is disabled.
    pub async fn send_heartbeat(&self) -> Option<bool> {
        self.inner.heartbeat_url.as_ref()?;
        let session = self.inner.lock_session().as_ref().map(|s| s.token.clone());
        Some(self.inner.probe(session.as_ref()).await)
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_session().is_some()
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .lock_session()
            .as_ref()
            .map_or(false, |s| s.poller.is_some())
    }

    pub fn events(&self) -> &EventEmitter {
        &self.inner.events
    }

    pub fn on(&self, listener: impl Fn(ConnectionEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.events.on(listener)
    }

    pub fn on_online(&self, listener: impl Fn(ConnectionEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.events.on_event(ConnectionEvent::Online, listener)
    }

    pub fn on_offline(&self, listener: impl Fn(ConnectionEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.events.on_event(ConnectionEvent::Offline, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Callback bound to this instance and to the session that registered it.
    fn passive_callback(&self, token: CancellationToken) -> ReachabilityCallback {
        let monitor = Arc::downgrade(&self.inner);
        Arc::new(move |signal| {
            if token.is_cancelled() {
                return;
            }
            if let Some(inner) = monitor.upgrade() {
                inner.observe(signal.is_reachable(), "connectivity signal");
            }
        })
    }

    fn spawn_poller(&self, runtime: &Handle, session: &CancellationToken) -> Poller {
        let token = session.child_token();
        let handle = runtime.spawn(poll_loop(
            Arc::downgrade(&self.inner),
            self.inner.heartbeat_interval,
            token.clone(),
        ));
        Poller { token, handle }
    }
}

impl MonitorInner {
    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn end_session(&self, session: Session) {
        session.token.cancel();
        if let Some(poller) = session.poller {
            poller.cancel();
        }
        self.source.unsubscribe(session.subscription);
    }

    /// Probe once. With a cycle token, an abandoned or stale probe leaves state untouched.
    async fn probe(&self, cycle: Option<&CancellationToken>) -> bool {
        let Some(url) = self.heartbeat_url.as_deref() else {
            return false;
        };

        let outcome = match cycle {
            Some(token) => tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("heartbeat to {} abandoned: cycle cancelled", url);
                    return false;
                }
                outcome = self.transport.get(url) => outcome,
            },
            None => self.transport.get(url).await,
        };

        let success = classify(outcome, self.heartbeat_status.as_ref());
        tracing::debug!("heartbeat to {} -> {}", url, if success { "ok" } else { "failed" });

        if cycle.map_or(false, CancellationToken::is_cancelled) {
            return success;
        }
        self.observe(success, "heartbeat");
        success
    }

    fn observe(&self, reachable: bool, origin: &str) {
        let current = self.online.load(Ordering::Acquire);
        if current == reachable {
            tracing::trace!("{} agrees with current state (online={})", origin, current);
            return;
        }
        self.toggle_and_emit(current);
    }

    /// Flip the flag from `from` and emit the matching event.
    ///
    /// The flip runs under the emitter's dispatch lock, so events are delivered
    /// in flip order. Loses quietly if another signal already flipped it.
    fn toggle_and_emit(&self, from: bool) {
        self.events.emit_if(|| {
            self.online
                .compare_exchange(from, !from, Ordering::AcqRel, Ordering::Acquire)
                .ok()?;
            let event = ConnectionEvent::for_state(!from);
            tracing::info!("connection is now {}", event.as_str());
            Some(event)
        });
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(session) = session {
            self.end_session(session);
        }
    }
}

async fn poll_loop(monitor: Weak<MonitorInner>, every: Duration, token: CancellationToken) {
    // first tick completes immediately
    let mut ticker = time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = monitor.upgrade() else {
            break;
        };
        inner.probe(Some(&token)).await;
    }
    tracing::debug!("heartbeat poller exited");
}

/// Build a monitor and start it straight away.
pub fn start_monitor(
    options: MonitorOptions,
    source: Arc<dyn ConnectivitySource>,
) -> Result<Monitor, MonitorError> {
    let monitor = Monitor::with_source(options, source)?;
    monitor.start()?;
    Ok(monitor)
}
