//! Event fan-in/fan-out hub.
//!
//! One logical subscription attaches one listener per backend per event
//! kind. Every backend-level [`ListenerHandle`] is kept in a registry under
//! the subscription's id, so tearing the subscription down removes exactly
//! the listeners it created.
//!
//! [`EventHub::subscribe`] filters at delivery time: an event reaches the
//! handler only if its backend is the active one *when it is emitted*.
//! [`EventHub::subscribe_to`] delivers from the listed backends
//! unconditionally.

use crate::selector::Backends;
use futures::Stream;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tillpoint_backend::{BackendEvent, EventKind, Listener, ListenerHandle, TerminalBackend};
use tillpoint_core::{BackendId, Platform};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Backend an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventOrigin {
    pub backend: BackendId,
    pub platform: Platform,
}

pub type EventHandler = Arc<dyn Fn(EventOrigin, &BackendEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything that can tear a subscription down by id.
pub trait Unsubscribe: Send + Sync {
    /// Remove the subscription's listeners, returning how many were removed.
    fn unsubscribe(&self, id: SubscriptionId) -> usize;
}

/// A live logical subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriptionId,
    hub: Weak<dyn Unsubscribe>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

pub struct EventHub<B> {
    backends: Arc<Backends<B>>,
    registry: Mutex<HashMap<SubscriptionId, Vec<ListenerHandle>>>,
}

impl<B: TerminalBackend> EventHub<B> {
    pub fn new(backends: Arc<Backends<B>>) -> Arc<Self> {
        Arc::new(Self {
            backends,
            registry: Mutex::new(HashMap::new()),
        })
    }

    /// Deliver `kinds` from whichever backend is active at emission time.
    pub fn subscribe(
        self: &Arc<Self>,
        kinds: &[EventKind],
        handler: EventHandler,
    ) -> Subscription {
        let backends = Arc::downgrade(&self.backends);
        let filtered: EventHandler = Arc::new(move |origin: EventOrigin, event: &BackendEvent| {
            let Some(backends) = backends.upgrade() else {
                return;
            };
            let active = backends.selector().active();
            if active == origin.backend {
                handler(origin, event);
            } else {
                trace!("Dropping {} from inactive {} backend", event.kind(), origin.backend);
            }
        });

        self.attach(&BackendId::ALL, kinds, filtered)
    }

    /// Deliver `kinds` from every listed backend, active or not.
    pub fn subscribe_to(
        self: &Arc<Self>,
        targets: &[BackendId],
        kinds: &[EventKind],
        handler: EventHandler,
    ) -> Subscription {
        self.attach(targets, kinds, handler)
    }

    /// Stream of values mapped from `kinds`, filtered by active backend.
    pub fn stream<T, F>(
        self: &Arc<Self>,
        kinds: &[EventKind],
        capacity: usize,
        map: F,
    ) -> EventStream<T>
    where
        T: Send + 'static,
        F: Fn(EventOrigin, &BackendEvent) -> Option<T> + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity);
        let handler: EventHandler = Arc::new(move |origin: EventOrigin, event: &BackendEvent| {
            if let Some(item) = map(origin, event) {
                deliver(&tx, item);
            }
        });

        let subscription = self.subscribe(kinds, handler);
        EventStream::new(rx, Some(subscription))
    }

    fn attach(
        self: &Arc<Self>,
        targets: &[BackendId],
        kinds: &[EventKind],
        handler: EventHandler,
    ) -> Subscription {
        let id = SubscriptionId::new();
        let mut handles = Vec::with_capacity(targets.len() * kinds.len());

        for &target in targets {
            let Some(backend) = self.backends.get(target) else {
                continue;
            };
            let origin = EventOrigin {
                backend: target,
                platform: backend.platform(),
            };

            for &kind in kinds {
                let handler = handler.clone();
                let listener: Listener =
                    Arc::new(move |event: &BackendEvent| handler(origin, event));
                handles.push(backend.add_listener(kind, listener));
            }
        }

        debug!("Subscription {} attached {} listener(s)", id, handles.len());
        self.lock_registry().insert(id, handles);

        let hub: Weak<dyn Unsubscribe> = Arc::downgrade(self) as Weak<dyn Unsubscribe>;
        Subscription { id, hub }
    }

    /// Number of live logical subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.lock_registry().len()
    }

    /// Number of backend-level listeners held for `id`.
    pub fn listener_count(&self, id: SubscriptionId) -> usize {
        self.lock_registry().get(&id).map_or(0, Vec::len)
    }

    fn lock_registry(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Vec<ListenerHandle>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: TerminalBackend> Unsubscribe for EventHub<B> {
    fn unsubscribe(&self, id: SubscriptionId) -> usize {
        let Some(handles) = self.lock_registry().remove(&id) else {
            return 0;
        };

        let count = handles.len();
        for handle in handles {
            handle.remove();
        }
        debug!("Subscription {} removed {} listener(s)", id, count);
        count
    }
}

impl<B> Drop for EventHub<B> {
    /// Subscriptions outliving the hub can no longer reach it.
    fn drop(&mut self) {
        let registry = self.registry.get_mut().unwrap_or_else(PoisonError::into_inner);
        let count: usize = registry.values().map(Vec::len).sum();
        for handle in registry.drain().flat_map(|(_, handles)| handles) {
            handle.remove();
        }
        if count > 0 {
            debug!("Event hub dropped, removed {} orphaned listener(s)", count);
        }
    }
}

/// Queue `item` without blocking. A full queue drops the item.
pub(crate) fn deliver<T>(tx: &mpsc::Sender<T>, item: T) {
    match tx.try_send(item) {
        Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Event queue full, dropping event");
        }
    }
}

/// Values pushed by backends, received in emission order.
///
/// Dropping the stream detaches its listeners.
pub struct EventStream<T> {
    rx: mpsc::Receiver<T>,
    subscription: Option<Subscription>,
}

impl<T> EventStream<T> {
    pub(crate) fn new(rx: mpsc::Receiver<T>, subscription: Option<Subscription>) -> Self {
        Self { rx, subscription }
    }

    /// Wait for the next value. `None` once no more values can arrive.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next value if one is already queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.subscription.as_ref().map(Subscription::id)
    }
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("subscription", &self.subscription_id())
            .finish()
    }
}
