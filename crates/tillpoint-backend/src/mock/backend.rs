//! Mock reader SDK backend.

use crate::{
    BackendError, Result,
    events::{BackendEvent, EventKind, Listener, ListenerHandle},
    traits::{ConnectParams, RawSimulatorConfiguration, TerminalBackend},
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tillpoint_core::{
    BackendId, Cart, CollectConfig, ConnectionStatus, DiscoveryConfiguration,
    ListLocationsParameters, LocationList, PaymentIntent, PaymentIntentStatus, PermissionStatus,
    Platform, Reader, constants,
};
use tokio::sync::oneshot;
use tracing::debug;

const CONNECT_METHODS: [&str; 6] = [
    "connect_bluetooth_reader",
    "connect_usb_reader",
    "connect_local_mobile_reader",
    "connect_handoff_reader",
    "connect_embedded_reader",
    "connect_internet_reader",
];

/// How long [`MockBackendHandle::wait_for_calls`] polls before giving up.
const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Hold placed on a backend method by [`MockBackendHandle::hold`].
enum Gate {
    /// Held, no call has arrived yet.
    Armed,
    /// A call is parked on the receiver side.
    Waiting(oneshot::Sender<Result<()>>),
    /// Released before any call arrived.
    Released(Result<()>),
}

struct MockState {
    initialized: bool,
    next_listener_id: u64,
    listeners: BTreeMap<u64, (EventKind, Listener)>,
    listeners_added: usize,
    listeners_removed: usize,
    calls: HashMap<&'static str, usize>,
    gates: HashMap<&'static str, Gate>,
    failures: HashMap<&'static str, BackendError>,
    supported_connects: HashSet<&'static str>,
    discovered_readers: Option<Vec<Reader>>,
    last_discovery: Option<DiscoveryConfiguration>,
    connection_status: i64,
    payment_status: i64,
    connect_result: Option<Reader>,
    connected_reader: Option<Reader>,
    last_connect: Option<ConnectParams>,
    payment_intent: Option<PaymentIntent>,
    last_collect_config: Option<CollectConfig>,
    displayed_cart: Option<Cart>,
    locations: LocationList,
    permission: PermissionStatus,
    simulator: RawSimulatorConfiguration,
    reports_simulated_card: bool,
    token_deliveries: Vec<(Option<String>, Option<String>)>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock reader SDK backend.
///
/// Every trait call is counted under its method name. A call can be made to
/// fail once with [`MockBackendHandle::fail_next`] or parked until the test
/// releases it with [`MockBackendHandle::hold`].
///
/// # Examples
///
/// ```
/// use tillpoint_backend::mock::MockBackend;
/// use tillpoint_backend::{BackendEvent, EventKind, TerminalBackend};
/// use tillpoint_core::Platform;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let (backend, handle) = MockBackend::native(Platform::Ios);
///
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = seen.clone();
/// let listener = backend.add_listener(
///     EventKind::ReconnectStarted,
///     Arc::new(move |_: &BackendEvent| {
///         counter.fetch_add(1, Ordering::SeqCst);
///     }),
/// );
///
/// handle.emit(BackendEvent::ReconnectStarted);
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
///
/// listener.remove();
/// assert_eq!(handle.total_listener_count(), 0);
/// ```
pub struct MockBackend {
    id: BackendId,
    platform: Platform,
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    /// Create a backend that supports every connection style.
    pub fn new(id: BackendId, platform: Platform) -> (Self, MockBackendHandle) {
        let permission = match id {
            BackendId::Native => PermissionStatus::Granted,
            BackendId::Network => PermissionStatus::NotRequired,
        };

        let state = Arc::new(Mutex::new(MockState {
            initialized: false,
            next_listener_id: 1,
            listeners: BTreeMap::new(),
            listeners_added: 0,
            listeners_removed: 0,
            calls: HashMap::new(),
            gates: HashMap::new(),
            failures: HashMap::new(),
            supported_connects: CONNECT_METHODS.into_iter().collect(),
            discovered_readers: None,
            last_discovery: None,
            connection_status: constants::STATUS_NOT_CONNECTED,
            payment_status: 0,
            connect_result: None,
            connected_reader: None,
            last_connect: None,
            payment_intent: None,
            last_collect_config: None,
            displayed_cart: None,
            locations: LocationList::default(),
            permission,
            simulator: RawSimulatorConfiguration::default(),
            reports_simulated_card: true,
            token_deliveries: Vec::new(),
        }));

        let backend = Self {
            id,
            platform,
            state: state.clone(),
        };

        (backend, MockBackendHandle { state })
    }

    /// Native backend on `platform`.
    pub fn native(platform: Platform) -> (Self, MockBackendHandle) {
        Self::new(BackendId::Native, platform)
    }

    /// Network backend. It only knows how to connect internet readers.
    pub fn network() -> (Self, MockBackendHandle) {
        let (backend, handle) = Self::new(BackendId::Network, Platform::Web);
        {
            let mut state = lock(&backend.state);
            state.supported_connects = HashSet::from(["connect_internet_reader"]);
        }
        (backend, handle)
    }

    /// Record the call, then apply any scripted failure or hold.
    async fn enter(&self, method: &'static str) -> Result<()> {
        let waiter = {
            let mut state = lock(&self.state);
            *state.calls.entry(method).or_default() += 1;
            debug!("{} backend: {} called", self.id, method);

            if let Some(error) = state.failures.remove(method) {
                return Err(error);
            }

            match state.gates.remove(method) {
                Some(Gate::Armed) => {
                    let (tx, rx) = oneshot::channel();
                    state.gates.insert(method, Gate::Waiting(tx));
                    Some(rx)
                }
                Some(Gate::Released(result)) => return result,
                Some(waiting @ Gate::Waiting(_)) => {
                    state.gates.insert(method, waiting);
                    None
                }
                None => None,
            }
        };

        match waiter {
            Some(rx) => rx.await.unwrap_or_else(|_| Err(BackendError::canceled())),
            None => Ok(()),
        }
    }

    fn release_gate(&self, method: &'static str, result: Result<()>) {
        let gate = lock(&self.state).gates.remove(method);
        if let Some(Gate::Waiting(tx)) = gate {
            let _ = tx.send(result);
        }
    }

    async fn connect(
        &self,
        method: &'static str,
        params: ConnectParams,
    ) -> Result<Option<Reader>> {
        self.enter(method).await?;

        let mut state = lock(&self.state);
        if !state.supported_connects.contains(method) {
            return Ok(None);
        }

        let reader = state.connect_result.clone().or_else(|| {
            state
                .discovered_readers
                .as_ref()
                .and_then(|readers| {
                    readers
                        .iter()
                        .find(|reader| reader.serial_number == params.serial_number)
                })
                .cloned()
        });

        if reader.is_some() {
            state.connection_status = match self.platform {
                Platform::Android => constants::ANDROID_STATUS_CONNECTED,
                Platform::Ios | Platform::Web => ConnectionStatus::Connected.code(),
            };
        }
        state.connected_reader = reader.clone();
        state.last_connect = Some(params);

        Ok(reader)
    }

    fn stored_intent(&self) -> Result<PaymentIntent> {
        lock(&self.state)
            .payment_intent
            .clone()
            .ok_or_else(|| BackendError::new("There is no active payment intent."))
    }
}

impl fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBackend")
            .field("id", &self.id)
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

impl TerminalBackend for MockBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn platform(&self) -> Platform {
        self.platform
    }

    async fn initialize(&self) -> Result<()> {
        self.enter("initialize").await?;
        lock(&self.state).initialized = true;
        Ok(())
    }

    fn set_connection_token(&self, token: Option<String>, error: Option<String>) -> Result<()> {
        let mut state = lock(&self.state);
        *state.calls.entry("set_connection_token").or_default() += 1;
        state.token_deliveries.push((token, error));
        Ok(())
    }

    async fn discover_readers(&self, config: DiscoveryConfiguration) -> Result<()> {
        let readers = {
            let mut state = lock(&self.state);
            state.last_discovery = Some(config);
            state.discovered_readers.clone()
        };

        // Readers are reported before the call can be parked or failed, the
        // way an SDK reports what it found while the scan keeps running.
        if let Some(readers) = readers {
            MockBackendHandle {
                state: self.state.clone(),
            }
            .emit(BackendEvent::ReadersDiscovered(readers));
        }

        self.enter("discover_readers").await
    }

    async fn cancel_discover_readers(&self) -> Result<()> {
        self.enter("cancel_discover_readers").await?;
        self.release_gate("discover_readers", Err(BackendError::canceled()));
        Ok(())
    }

    async fn connect_bluetooth_reader(&self, params: ConnectParams) -> Result<Option<Reader>> {
        self.connect("connect_bluetooth_reader", params).await
    }

    async fn connect_usb_reader(&self, params: ConnectParams) -> Result<Option<Reader>> {
        self.connect("connect_usb_reader", params).await
    }

    async fn connect_local_mobile_reader(&self, params: ConnectParams) -> Result<Option<Reader>> {
        self.connect("connect_local_mobile_reader", params).await
    }

    async fn connect_handoff_reader(&self, params: ConnectParams) -> Result<Option<Reader>> {
        self.connect("connect_handoff_reader", params).await
    }

    async fn connect_embedded_reader(&self, params: ConnectParams) -> Result<Option<Reader>> {
        self.connect("connect_embedded_reader", params).await
    }

    async fn connect_internet_reader(&self, params: ConnectParams) -> Result<Option<Reader>> {
        self.connect("connect_internet_reader", params).await
    }

    async fn disconnect_reader(&self) -> Result<()> {
        self.enter("disconnect_reader").await?;
        let mut state = lock(&self.state);
        state.connected_reader = None;
        state.connection_status = constants::STATUS_NOT_CONNECTED;
        Ok(())
    }

    async fn get_connected_reader(&self) -> Result<Option<Reader>> {
        self.enter("get_connected_reader").await?;
        Ok(lock(&self.state).connected_reader.clone())
    }

    async fn get_connection_status(&self) -> Result<i64> {
        self.enter("get_connection_status").await?;
        Ok(lock(&self.state).connection_status)
    }

    async fn get_payment_status(&self) -> Result<i64> {
        self.enter("get_payment_status").await?;
        Ok(lock(&self.state).payment_status)
    }

    async fn retrieve_payment_intent(&self, client_secret: String) -> Result<PaymentIntent> {
        self.enter("retrieve_payment_intent").await?;
        debug!("{} backend: retrieving intent for {}", self.id, client_secret);
        self.stored_intent()
    }

    async fn collect_payment_method(&self, config: Option<CollectConfig>) -> Result<PaymentIntent> {
        lock(&self.state).last_collect_config = config;
        self.enter("collect_payment_method").await?;
        self.stored_intent()
    }

    async fn cancel_collect_payment_method(&self) -> Result<()> {
        self.enter("cancel_collect_payment_method").await?;
        self.release_gate("collect_payment_method", Err(BackendError::canceled()));
        Ok(())
    }

    async fn process_payment(&self) -> Result<PaymentIntent> {
        self.enter("process_payment").await?;
        let mut intent = self.stored_intent()?;
        intent.status = PaymentIntentStatus::RequiresCapture;
        Ok(intent)
    }

    async fn clear_cached_credentials(&self) -> Result<()> {
        self.enter("clear_cached_credentials").await
    }

    async fn set_reader_display(&self, cart: Cart) -> Result<()> {
        self.enter("set_reader_display").await?;
        lock(&self.state).displayed_cart = Some(cart);
        Ok(())
    }

    async fn clear_reader_display(&self) -> Result<()> {
        self.enter("clear_reader_display").await?;
        lock(&self.state).displayed_cart = None;
        Ok(())
    }

    async fn list_locations(&self, params: ListLocationsParameters) -> Result<LocationList> {
        self.enter("list_locations").await?;
        let mut list = lock(&self.state).locations.clone();
        if let Some(limit) = params.limit {
            let limit = limit as usize;
            if list.locations.len() > limit {
                list.locations.truncate(limit);
                list.has_more = true;
            }
        }
        Ok(list)
    }

    async fn install_available_update(&self) -> Result<()> {
        self.enter("install_available_update").await
    }

    async fn cancel_install_update(&self) -> Result<()> {
        self.enter("cancel_install_update").await?;
        self.release_gate("install_available_update", Err(BackendError::canceled()));
        Ok(())
    }

    async fn cancel_auto_reconnect(&self) -> Result<()> {
        self.enter("cancel_auto_reconnect").await
    }

    async fn check_permissions(&self) -> Result<PermissionStatus> {
        self.enter("check_permissions").await?;
        Ok(lock(&self.state).permission)
    }

    async fn request_permissions(&self) -> Result<PermissionStatus> {
        self.enter("request_permissions").await?;
        Ok(lock(&self.state).permission)
    }

    async fn get_simulator_configuration(&self) -> Result<RawSimulatorConfiguration> {
        self.enter("get_simulator_configuration").await?;
        let state = lock(&self.state);
        let mut config = state.simulator.clone();
        if !state.reports_simulated_card {
            config.simulated_card = None;
        }
        Ok(config)
    }

    async fn set_simulator_configuration(
        &self,
        config: RawSimulatorConfiguration,
    ) -> Result<RawSimulatorConfiguration> {
        self.enter("set_simulator_configuration").await?;
        let mut state = lock(&self.state);
        if config.available_reader_update.is_some() {
            state.simulator.available_reader_update = config.available_reader_update;
        }
        if config.simulated_card.is_some() {
            state.simulator.simulated_card = config.simulated_card;
        }
        let mut reported = state.simulator.clone();
        if !state.reports_simulated_card {
            reported.simulated_card = None;
        }
        Ok(reported)
    }

    fn add_listener(&self, kind: EventKind, listener: Listener) -> ListenerHandle {
        let id = {
            let mut state = lock(&self.state);
            let id = state.next_listener_id;
            state.next_listener_id += 1;
            state.listeners.insert(id, (kind, listener));
            state.listeners_added += 1;
            id
        };

        let state = Arc::downgrade(&self.state);
        ListenerHandle::new(id, kind, move || {
            if let Some(state) = state.upgrade() {
                let mut state = lock(&state);
                if state.listeners.remove(&id).is_some() {
                    state.listeners_removed += 1;
                }
            }
        })
    }
}

/// Handle for scripting and inspecting a [`MockBackend`].
#[derive(Clone)]
pub struct MockBackendHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockBackendHandle {
    /// Deliver `event` to every listener registered for its kind.
    ///
    /// Listeners run on the caller's thread after the backend lock is
    /// released, so they may call back into the backend.
    pub fn emit(&self, event: BackendEvent) {
        let kind = event.kind();
        let listeners: Vec<Listener> = lock(&self.state)
            .listeners
            .values()
            .filter(|(listener_kind, _)| *listener_kind == kind)
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener(&event);
        }
    }

    /// Ask the orchestrator for a connection token.
    pub fn request_token(&self) {
        self.emit(BackendEvent::RequestConnectionToken);
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        lock(&self.state)
            .listeners
            .values()
            .filter(|(listener_kind, _)| *listener_kind == kind)
            .count()
    }

    pub fn total_listener_count(&self) -> usize {
        lock(&self.state).listeners.len()
    }

    /// Listeners ever registered.
    pub fn listeners_added(&self) -> usize {
        lock(&self.state).listeners_added
    }

    /// Listeners ever removed.
    pub fn listeners_removed(&self) -> usize {
        lock(&self.state).listeners_removed
    }

    /// Number of times `method` was called.
    pub fn call_count(&self, method: &str) -> usize {
        lock(&self.state).calls.get(method).copied().unwrap_or(0)
    }

    /// Wait until `method` has been called at least `count` times.
    ///
    /// Returns `false` if that does not happen within two seconds.
    pub async fn wait_for_calls(&self, method: &str, count: usize) -> bool {
        let poll = async {
            while self.call_count(method) < count {
                tokio::time::sleep(WAIT_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(WAIT_TIMEOUT, poll).await.is_ok()
    }

    /// Park the next call to `method` until [`release`](Self::release).
    pub fn hold(&self, method: &'static str) {
        lock(&self.state).gates.insert(method, Gate::Armed);
    }

    /// Let a held call to `method` finish with `result`.
    ///
    /// A release that arrives before the call is kept for it.
    pub fn release(&self, method: &'static str, result: Result<()>) {
        let mut state = lock(&self.state);
        match state.gates.remove(method) {
            Some(Gate::Waiting(tx)) => {
                let _ = tx.send(result);
            }
            Some(Gate::Armed) | Some(Gate::Released(_)) => {
                state.gates.insert(method, Gate::Released(result));
            }
            None => {}
        }
    }

    /// Make the next call to `method` fail with `error`.
    pub fn fail_next(&self, method: &'static str, error: BackendError) {
        lock(&self.state).failures.insert(method, error);
    }

    /// Readers reported, as one batch, whenever discovery starts.
    pub fn set_discovered_readers(&self, readers: Vec<Reader>) {
        lock(&self.state).discovered_readers = Some(readers);
    }

    /// Configuration of the last discovery call.
    pub fn last_discovery(&self) -> Option<DiscoveryConfiguration> {
        lock(&self.state).last_discovery.clone()
    }

    /// Status code in this backend's own ordinal layout.
    pub fn set_connection_status(&self, code: i64) {
        lock(&self.state).connection_status = code;
    }

    pub fn set_payment_status(&self, code: i64) {
        lock(&self.state).payment_status = code;
    }

    /// Reader every supported connect call returns, instead of looking the
    /// serial number up among the discovered readers.
    pub fn set_connect_result(&self, reader: Option<Reader>) {
        lock(&self.state).connect_result = reader;
    }

    pub fn last_connect(&self) -> Option<ConnectParams> {
        lock(&self.state).last_connect.clone()
    }

    pub fn connected_reader(&self) -> Option<Reader> {
        lock(&self.state).connected_reader.clone()
    }

    pub fn set_payment_intent(&self, intent: PaymentIntent) {
        lock(&self.state).payment_intent = Some(intent);
    }

    pub fn last_collect_config(&self) -> Option<CollectConfig> {
        lock(&self.state).last_collect_config.clone()
    }

    pub fn displayed_cart(&self) -> Option<Cart> {
        lock(&self.state).displayed_cart.clone()
    }

    pub fn set_locations(&self, locations: LocationList) {
        lock(&self.state).locations = locations;
    }

    pub fn set_permission(&self, permission: PermissionStatus) {
        lock(&self.state).permission = permission;
    }

    /// Whether the simulated card is reported back. Android cannot.
    pub fn set_reports_simulated_card(&self, reports: bool) {
        lock(&self.state).reports_simulated_card = reports;
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.state).initialized
    }

    /// Every `(token, error)` pair passed to `set_connection_token`.
    pub fn token_deliveries(&self) -> Vec<(Option<String>, Option<String>)> {
        lock(&self.state).token_deliveries.clone()
    }
}

impl fmt::Debug for MockBackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBackendHandle")
            .field("listeners", &self.total_listener_count())
            .finish_non_exhaustive()
    }
}
