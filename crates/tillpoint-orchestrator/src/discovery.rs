//! Reader discovery sessions.
//!
//! At most one session runs at a time. A session subscribes to
//! "readers discovered" on every backend it involves, issues one discovery
//! call per backend, and re-emits the concatenation of the latest native and
//! network lists on every update. Its outcome is driven by the primary
//! backend's call alone: in combined mode the network call is started but
//! its result is only logged.
//!
//! ```text
//! Idle -> Discovering -> Completed | Failed | Cancelled -> Idle
//! ```
//!
//! Teardown (listeners, the single-flight slot) is synchronous. Cancelling a
//! backend call that is still outstanding is best effort and its errors are
//! logged and swallowed.

use crate::error::{Result, TerminalError};
use crate::hub::{EventHub, EventOrigin, Subscription, SubscriptionId};
use crate::normalizer::normalize_readers;
use crate::selector::Backends;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tillpoint_backend::{BackendEvent, EventKind, TerminalBackend};
use tillpoint_core::{BackendId, DiscoveryConfiguration, DiscoveryMethod, Reader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What a [`DiscoverySession`] yields.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    /// Current readers: native list followed by network list.
    Readers(Vec<Reader>),
    Completed,
    Failed(TerminalError),
    Cancelled,
}

impl DiscoveryEvent {
    fn is_terminal(&self) -> bool {
        !matches!(self, Self::Readers(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Discovering,
    Completed,
    Failed,
    Cancelled,
}

struct SessionState {
    phase: SessionPhase,
    native: Vec<Reader>,
    network: Vec<Reader>,
    /// Backends whose discovery call has not returned yet.
    outstanding: Vec<BackendId>,
}

impl SessionState {
    fn merged(&self) -> Vec<Reader> {
        self.native.iter().chain(self.network.iter()).cloned().collect()
    }
}

struct SessionShared {
    id: u64,
    method: DiscoveryMethod,
    state: Mutex<SessionState>,
    subscription: Mutex<Option<Subscription>>,
    tx: mpsc::UnboundedSender<DiscoveryEvent>,
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the session's listeners.
    fn detach(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(subscription);
    }
}

struct ManagerState {
    current: Option<Arc<SessionShared>>,
    next_id: u64,
    /// Latest merged list of the current or last session.
    discovered: Vec<Reader>,
}

pub struct DiscoveryManager<B> {
    backends: Arc<Backends<B>>,
    hub: Arc<EventHub<B>>,
    state: Mutex<ManagerState>,
}

impl<B: TerminalBackend> DiscoveryManager<B> {
    pub fn new(backends: Arc<Backends<B>>, hub: Arc<EventHub<B>>) -> Arc<Self> {
        Arc::new(Self {
            backends,
            hub,
            state: Mutex::new(ManagerState {
                current: None,
                next_id: 0,
                discovered: Vec::new(),
            }),
        })
    }

    /// Start a session. Must be called from within a Tokio runtime.
    pub fn start(self: &Arc<Self>, config: DiscoveryConfiguration) -> Result<DiscoverySession<B>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let session = {
            let mut state = self.lock_state();
            if let Some(current) = &state.current {
                warn!("Discovery {} already running, rejecting new session", current.id);
                return Err(TerminalError::DiscoveryInProgress);
            }
            state.next_id += 1;
            let session = Arc::new(SessionShared {
                id: state.next_id,
                method: config.method,
                state: Mutex::new(SessionState {
                    phase: SessionPhase::Discovering,
                    native: Vec::new(),
                    network: Vec::new(),
                    outstanding: Vec::new(),
                }),
                subscription: Mutex::new(None),
                tx,
            });
            state.current = Some(session.clone());
            state.discovered.clear();
            session
        };

        self.backends.selector().select_for_discovery(config.method);
        let plan = self.plan(&config);
        let targets: Vec<BackendId> = plan.iter().map(|(id, _)| *id).collect();
        session.lock().outstanding = targets.clone();

        let subscription = self.hub.subscribe_to(
            &targets,
            &[EventKind::ReadersDiscovered],
            self.readers_handler(&session),
        );
        *session
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(subscription);

        info!(
            "Discovery {} started ({}) on {:?}",
            session.id, config.method, targets
        );

        for (index, (target, backend_config)) in plan.into_iter().enumerate() {
            let backend = self.backends.route(target).clone();
            let manager = self.clone();
            let session = session.clone();
            let primary = index == 0;

            tokio::spawn(async move {
                let result = backend.discover_readers(backend_config).await;
                manager.on_call_finished(&session, target, primary, result);
            });
        }

        Ok(DiscoverySession {
            manager: self.clone(),
            shared: session,
            rx,
            done: false,
        })
    }

    /// Backend calls for `config`. The first entry drives the outcome.
    fn plan(&self, config: &DiscoveryConfiguration) -> Vec<(BackendId, DiscoveryConfiguration)> {
        match config.method {
            DiscoveryMethod::Combined => {
                let mut plan = vec![(
                    BackendId::Native,
                    config.retarget(DiscoveryMethod::BluetoothScan),
                )];
                if self.backends.get(BackendId::Network).is_some() {
                    plan.push((BackendId::Network, config.retarget(DiscoveryMethod::Internet)));
                }
                plan
            }
            method => vec![(self.backends.selector().active(), config.retarget(method))],
        }
    }

    fn readers_handler(self: &Arc<Self>, session: &Arc<SessionShared>) -> crate::hub::EventHandler {
        let manager: Weak<Self> = Arc::downgrade(self);
        let session: Weak<SessionShared> = Arc::downgrade(session);

        Arc::new(move |origin: EventOrigin, event: &BackendEvent| {
            let BackendEvent::ReadersDiscovered(readers) = event else {
                return;
            };
            let (Some(manager), Some(session)) = (manager.upgrade(), session.upgrade()) else {
                return;
            };

            // Merge, record and send under the session lock so that reports
            // racing in from both backends reach the subscriber in order.
            let mut state = session.lock();
            if state.phase != SessionPhase::Discovering {
                return;
            }
            let readers = normalize_readers(readers.clone());
            debug!(
                "Discovery {}: {} backend reports {} reader(s)",
                session.id,
                origin.backend,
                readers.len()
            );
            match origin.backend {
                BackendId::Native => state.native = readers,
                BackendId::Network => state.network = readers,
            }
            let merged = state.merged();

            manager.record_discovered(session.id, &merged);
            let _ = session.tx.send(DiscoveryEvent::Readers(merged));
        })
    }

    fn on_call_finished(
        &self,
        session: &Arc<SessionShared>,
        backend: BackendId,
        primary: bool,
        result: tillpoint_backend::Result<()>,
    ) {
        let event = {
            let mut state = session.lock();
            state.outstanding.retain(|id| *id != backend);

            if !primary {
                match &result {
                    Ok(()) => debug!("Discovery {}: {} backend finished", session.id, backend),
                    Err(e) => warn!("Discovery {}: {} backend failed: {}", session.id, backend, e),
                }
                return;
            }

            if state.phase != SessionPhase::Discovering {
                debug!(
                    "Discovery {}: ignoring {} backend result after {:?}",
                    session.id, backend, state.phase
                );
                return;
            }

            match result {
                Ok(()) => {
                    state.phase = SessionPhase::Completed;
                    info!("Discovery {} completed", session.id);
                    DiscoveryEvent::Completed
                }
                Err(e) => {
                    state.phase = SessionPhase::Failed;
                    warn!("Discovery {} failed: {}", session.id, e);
                    DiscoveryEvent::Failed(e.into())
                }
            }
        };

        self.end(session);
        let _ = session.tx.send(event);
    }

    /// Move `session` to Cancelled and tear it down.
    ///
    /// Returns the backends whose discovery call is still outstanding.
    fn cancel_session(&self, session: &Arc<SessionShared>) -> Vec<BackendId> {
        let outstanding = {
            let mut state = session.lock();
            if state.phase != SessionPhase::Discovering {
                return Vec::new();
            }
            state.phase = SessionPhase::Cancelled;
            state.outstanding.clone()
        };

        self.end(session);
        info!("Discovery {} cancelled", session.id);
        let _ = session.tx.send(DiscoveryEvent::Cancelled);
        outstanding
    }

    async fn cancel_backends(&self, backends: Vec<BackendId>) {
        for id in backends {
            if let Err(e) = self.backends.route(id).cancel_discover_readers().await {
                warn!("Ignoring error cancelling discovery on {} backend: {}", id, e);
            }
        }
    }

    /// Detach listeners and free the single-flight slot.
    fn end(&self, session: &SessionShared) {
        session.detach();
        let mut state = self.lock_state();
        if state.current.as_ref().is_some_and(|current| current.id == session.id) {
            state.current = None;
        }
    }

    /// Lock order is session state, then manager state.
    fn record_discovered(&self, session_id: u64, readers: &[Reader]) {
        let mut state = self.lock_state();
        if state.current.as_ref().is_some_and(|current| current.id == session_id) {
            state.discovered = readers.to_vec();
        }
    }

    /// Cancel the running session, if any.
    pub async fn cancel_current(&self) {
        let current = self.lock_state().current.clone();
        let Some(session) = current else {
            debug!("No discovery to cancel");
            return;
        };

        let outstanding = self.cancel_session(&session);
        self.cancel_backends(outstanding).await;
    }

    pub fn is_discovering(&self) -> bool {
        self.lock_state().current.is_some()
    }

    /// Readers reported by the current or last session.
    pub fn discovered_readers(&self) -> Vec<Reader> {
        self.lock_state().discovered.clone()
    }

    pub fn discovered_reader(&self, serial_number: &str) -> Option<Reader> {
        self.lock_state()
            .discovered
            .iter()
            .find(|reader| reader.serial_number == serial_number)
            .cloned()
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle on a running discovery.
///
/// Yields [`DiscoveryEvent`]s until a terminal one. Dropping the handle
/// while discovery runs cancels it.
pub struct DiscoverySession<B: TerminalBackend> {
    manager: Arc<DiscoveryManager<B>>,
    shared: Arc<SessionShared>,
    rx: mpsc::UnboundedReceiver<DiscoveryEvent>,
    done: bool,
}

impl<B: TerminalBackend> DiscoverySession<B> {
    /// Next event, or `None` after the terminal event was received.
    pub async fn recv(&mut self) -> Option<DiscoveryEvent> {
        if self.done {
            return None;
        }
        let event = self.rx.recv().await?;
        self.done = event.is_terminal();
        Some(event)
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn method(&self) -> DiscoveryMethod {
        self.shared.method
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.lock().phase
    }

    /// Latest merged reader list.
    pub fn readers(&self) -> Vec<Reader> {
        self.shared.lock().merged()
    }

    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.shared
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Subscription::id)
    }

    /// Stop discovery and wait for the backend cancel calls to return.
    pub async fn cancel(self) {
        let outstanding = self.manager.cancel_session(&self.shared);
        self.manager.cancel_backends(outstanding).await;
    }
}

impl<B: TerminalBackend> Drop for DiscoverySession<B> {
    fn drop(&mut self) {
        let outstanding = self.manager.cancel_session(&self.shared);
        if outstanding.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let manager = self.manager.clone();
                runtime.spawn(async move { manager.cancel_backends(outstanding).await });
            }
            Err(_) => warn!(
                "Discovery {} dropped outside a runtime, backends not cancelled",
                self.shared.id
            ),
        }
    }
}

impl<B: TerminalBackend> fmt::Debug for DiscoverySession<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoverySession")
            .field("id", &self.shared.id)
            .field("method", &self.shared.method)
            .field("phase", &self.phase())
            .finish()
    }
}
