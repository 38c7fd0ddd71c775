//! The host-facing terminal.
//!
//! [`Terminal`] owns both backends and composes token bridging, backend
//! selection, event fan-in, discovery, connection and payment collection
//! behind one API. Every call made before [`Terminal::initialize`] has
//! completed fails with [`TerminalError::NotInitialized`].
//!
//! ```no_run
//! use tillpoint_backend::mock::MockBackend;
//! use tillpoint_core::{DiscoveryConfiguration, DiscoveryMethod, Platform};
//! use tillpoint_orchestrator::{Terminal, TerminalConfig, token_fetcher};
//!
//! # async fn run() -> tillpoint_orchestrator::Result<()> {
//! let (native, _) = MockBackend::native(Platform::Ios);
//! let (network, _) = MockBackend::network();
//! let fetcher = token_fetcher(|| async { anyhow::Ok("pst_test_123".to_string()) });
//!
//! let config = TerminalConfig::default().from_env();
//! config.init_logging();
//! let terminal = Terminal::create(config, native, Some(network), fetcher, None).await?;
//! let mut session =
//!     terminal.discover_readers(DiscoveryConfiguration::new(DiscoveryMethod::Combined))?;
//! while let Some(event) = session.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

use crate::collection::PaymentCollector;
use crate::config::TerminalConfig;
use crate::connection::{ConnectionController, DisconnectCallback};
use crate::discovery::{DiscoveryManager, DiscoverySession};
use crate::error::{Result, TerminalError};
use crate::hub::{EventHub, EventOrigin, EventStream, Subscription};
use crate::normalizer::{
    normalize_location, normalize_update, translate_battery, translate_display_message,
    translate_payment_status, translate_reader_event, translate_reader_input,
    translate_simulator_configuration,
};
use crate::selector::{Backends, ConnectStyle};
use crate::token::{TokenBridge, TokenFetcher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tillpoint_backend::{
    BackendEvent, ConnectParams, EventKind, RawSimulatorConfiguration, TerminalBackend,
};
use tillpoint_core::{
    BackendId, BatteryLevel, BluetoothConnectionConfiguration, Cart, CollectConfig,
    ConnectionStatus, DiscoveryConfiguration, InternetConnectionConfiguration,
    ListLocationsParameters, LocationConnectionConfiguration, LocationList, PaymentIntent,
    PaymentStatus, PermissionStatus, Reader, ReaderDisplayMessage, ReaderEvent,
    ReaderInputOptions, ReconnectEvent, SimulatedCardType, SimulatorConfiguration,
    SoftwareUpdate, UpdateInstallResult,
};
use tracing::{debug, info, warn};

pub struct Terminal<B: TerminalBackend> {
    config: TerminalConfig,
    backends: Arc<Backends<B>>,
    hub: Arc<EventHub<B>>,
    tokens: Arc<TokenBridge<B>>,
    discovery: Arc<DiscoveryManager<B>>,
    connection: Arc<ConnectionController<B>>,
    collection: PaymentCollector<B>,
    initialized: Arc<AtomicBool>,
    init_lock: tokio::sync::Mutex<()>,
    token_subscription: Mutex<Option<Subscription>>,
    /// Card last set by the host, for backends that cannot report it.
    simulated_card: Mutex<Option<SimulatedCardType>>,
}

impl<B: TerminalBackend> Terminal<B> {
    /// Build a terminal without initializing it.
    pub fn new(
        config: TerminalConfig,
        native: B,
        network: Option<B>,
        fetcher: TokenFetcher,
        on_unexpected_disconnect: Option<DisconnectCallback>,
    ) -> Result<Self> {
        config.validate()?;

        let backends = Arc::new(Backends::new(
            native,
            network,
            config.network_backend_enabled,
        ));
        let hub = EventHub::new(backends.clone());
        let discovery = DiscoveryManager::new(backends.clone(), hub.clone());
        let connection = ConnectionController::new(
            backends.clone(),
            hub.clone(),
            discovery.clone(),
            config.event_buffer,
            on_unexpected_disconnect,
        );
        let initialized = Arc::new(AtomicBool::new(false));

        Ok(Self {
            tokens: Arc::new(TokenBridge::new(backends.clone(), fetcher)),
            collection: PaymentCollector::new(backends.clone(), initialized.clone()),
            config,
            backends,
            hub,
            discovery,
            connection,
            initialized,
            init_lock: tokio::sync::Mutex::new(()),
            token_subscription: Mutex::new(None),
            simulated_card: Mutex::new(None),
        })
    }

    /// Build and initialize a terminal.
    pub async fn create(
        config: TerminalConfig,
        native: B,
        network: Option<B>,
        fetcher: TokenFetcher,
        on_unexpected_disconnect: Option<DisconnectCallback>,
    ) -> Result<Self> {
        let terminal = Self::new(config, native, network, fetcher, on_unexpected_disconnect)?;
        terminal.initialize().await?;
        Ok(terminal)
    }

    /// Wire up token requests and disconnect handling, then initialize every
    /// available backend. A second call is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        let _init = self.init_lock.lock().await;
        if self.is_initialized() {
            debug!("Terminal already initialized");
            return Ok(());
        }

        self.attach_token_bridge();
        self.connection.attach();

        for backend in self.backends.available() {
            info!("Initializing {} backend", backend.id());
            backend.initialize().await?;
        }

        self.initialized.store(true, Ordering::Release);
        info!("Terminal initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(TerminalError::NotInitialized)
        }
    }

    fn attach_token_bridge(&self) {
        let mut slot = self
            .token_subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }

        let bridge = Arc::downgrade(&self.tokens);
        let handler = Arc::new(move |origin: EventOrigin, _: &BackendEvent| {
            if let Some(bridge) = bridge.upgrade() {
                bridge.on_token_requested(origin.backend);
            }
        });
        *slot = Some(self.hub.subscribe_to(
            &BackendId::ALL,
            &[EventKind::RequestConnectionToken],
            handler,
        ));
    }

    /// Backend that currently serves calls and events.
    pub fn active_backend(&self) -> Result<BackendId> {
        self.ensure_initialized()?;
        Ok(self.backends.selector().active())
    }

    pub fn selected_backend(&self) -> Result<BackendId> {
        self.ensure_initialized()?;
        Ok(self.backends.selector().selected())
    }

    // Discovery

    /// Start a discovery session. Fails while another session is running.
    pub fn discover_readers(&self, config: DiscoveryConfiguration) -> Result<DiscoverySession<B>> {
        self.ensure_initialized()?;
        self.discovery.start(config)
    }

    /// Cancel the running discovery session, if any.
    pub async fn cancel_discover_readers(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.discovery.cancel_current().await;
        Ok(())
    }

    pub fn is_discovering(&self) -> bool {
        self.discovery.is_discovering()
    }

    /// Readers reported by the last discovery session.
    pub fn discovered_readers(&self) -> Result<Vec<Reader>> {
        self.ensure_initialized()?;
        Ok(self.discovery.discovered_readers())
    }

    // Connection

    pub async fn connect_bluetooth_reader(
        &self,
        serial_number: &str,
        config: BluetoothConnectionConfiguration,
    ) -> Result<Option<Reader>> {
        let mut params = ConnectParams::new(serial_number).with_location(config.location_id);
        params.auto_reconnect_on_unexpected_disconnect =
            config.auto_reconnect_on_unexpected_disconnect;
        self.connect(ConnectStyle::Bluetooth, params).await
    }

    pub async fn connect_usb_reader(
        &self,
        serial_number: &str,
        config: LocationConnectionConfiguration,
    ) -> Result<Option<Reader>> {
        let params = ConnectParams::new(serial_number).with_location(config.location_id);
        self.connect(ConnectStyle::Usb, params).await
    }

    pub async fn connect_local_mobile_reader(
        &self,
        serial_number: &str,
        config: LocationConnectionConfiguration,
    ) -> Result<Option<Reader>> {
        let params = ConnectParams::new(serial_number).with_location(config.location_id);
        self.connect(ConnectStyle::LocalMobile, params).await
    }

    pub async fn connect_handoff_reader(
        &self,
        serial_number: &str,
        config: LocationConnectionConfiguration,
    ) -> Result<Option<Reader>> {
        let params = ConnectParams::new(serial_number).with_location(config.location_id);
        self.connect(ConnectStyle::Handoff, params).await
    }

    pub async fn connect_embedded_reader(
        &self,
        serial_number: &str,
        config: LocationConnectionConfiguration,
    ) -> Result<Option<Reader>> {
        let params = ConnectParams::new(serial_number).with_location(config.location_id);
        self.connect(ConnectStyle::Embedded, params).await
    }

    pub async fn connect_internet_reader(
        &self,
        serial_number: &str,
        config: InternetConnectionConfiguration,
    ) -> Result<Option<Reader>> {
        let mut params = ConnectParams::new(serial_number);
        params.fail_if_in_use = config.fail_if_in_use;
        params.allow_customer_cancel = config.allow_customer_cancel;
        self.connect(ConnectStyle::Internet, params).await
    }

    async fn connect(&self, style: ConnectStyle, params: ConnectParams) -> Result<Option<Reader>> {
        self.ensure_initialized()?;
        self.connection.connect(style, params).await
    }

    pub async fn disconnect_reader(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.connection.disconnect_reader().await
    }

    pub async fn get_connected_reader(&self) -> Result<Option<Reader>> {
        self.ensure_initialized()?;
        self.connection.get_connected_reader().await
    }

    pub async fn get_connection_status(&self) -> Result<ConnectionStatus> {
        self.ensure_initialized()?;
        self.connection.get_connection_status().await
    }

    /// Current connection status, then every change.
    pub fn connection_status(&self) -> Result<EventStream<ConnectionStatus>> {
        self.ensure_initialized()?;
        Ok(self.connection.connection_status())
    }

    /// Readers lost from the active backend without a disconnect call.
    pub fn unexpected_disconnects(&self) -> Result<EventStream<Option<Reader>>> {
        self.ensure_initialized()?;
        Ok(self.connection.unexpected_disconnects())
    }

    pub async fn cancel_auto_reconnect(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.connection.cancel_auto_reconnect().await
    }

    // Payments

    pub async fn retrieve_payment_intent(&self, client_secret: &str) -> Result<PaymentIntent> {
        self.ensure_initialized()?;
        self.collection
            .retrieve_payment_intent(client_secret.to_string())
            .await
    }

    /// Collect a payment method. Resolves to `None` if a collection is
    /// already running.
    pub async fn collect_payment_method(
        &self,
        config: Option<CollectConfig>,
    ) -> Result<Option<PaymentIntent>> {
        self.ensure_initialized()?;
        self.collection.collect_payment_method(config).await
    }

    pub async fn cancel_collect_payment_method(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.collection.cancel_collect_payment_method().await
    }

    pub async fn process_payment(&self) -> Result<PaymentIntent> {
        self.ensure_initialized()?;
        self.collection.process_payment().await
    }

    pub async fn clear_cached_credentials(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.collection.clear_cached_credentials().await
    }

    pub fn is_collecting_payment_method(&self) -> bool {
        self.collection.is_collecting()
    }

    pub fn last_payment_intent(&self) -> Option<PaymentIntent> {
        self.collection.last_payment_intent()
    }

    pub async fn get_payment_status(&self) -> Result<PaymentStatus> {
        self.ensure_initialized()?;
        self.collection.get_payment_status().await
    }

    pub fn payment_status(&self) -> Result<EventStream<PaymentStatus>> {
        self.event_stream(&[EventKind::PaymentStatusChanged], |event| match event {
            BackendEvent::PaymentStatusChanged { code } => {
                decoded(event.kind(), translate_payment_status(*code))
            }
            _ => None,
        })
    }

    // Reader display

    pub async fn set_reader_display(&self, cart: Cart) -> Result<()> {
        self.ensure_initialized()?;
        self.collection.set_reader_display(cart).await
    }

    pub async fn clear_reader_display(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.collection.clear_reader_display().await
    }

    pub fn reader_display_messages(&self) -> Result<EventStream<ReaderDisplayMessage>> {
        self.event_stream(&[EventKind::ReaderDisplayMessageRequested], |event| match event {
            BackendEvent::ReaderDisplayMessageRequested { code } => {
                decoded(event.kind(), translate_display_message(*code))
            }
            _ => None,
        })
    }

    pub fn reader_input_requests(&self) -> Result<EventStream<ReaderInputOptions>> {
        self.event_stream(&[EventKind::ReaderInputRequested], |event| match event {
            BackendEvent::ReaderInputRequested(raw) => Some(translate_reader_input(raw)),
            _ => None,
        })
    }

    // Locations

    pub async fn list_locations(&self, params: ListLocationsParameters) -> Result<LocationList> {
        self.ensure_initialized()?;
        let mut list = self.backends.active().list_locations(params).await?;
        list.locations = list.locations.into_iter().map(normalize_location).collect();
        Ok(list)
    }

    // Software updates

    pub async fn install_available_update(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.backends.active().install_available_update().await?;
        Ok(())
    }

    pub async fn cancel_install_update(&self) -> Result<()> {
        self.ensure_initialized()?;
        info!("Cancelling software update");
        self.backends.active().cancel_install_update().await?;
        Ok(())
    }

    pub fn available_updates(&self) -> Result<EventStream<SoftwareUpdate>> {
        self.event_stream(&[EventKind::UpdateAvailable], |event| match event {
            BackendEvent::UpdateAvailable(update) => Some(normalize_update(update.clone())),
            _ => None,
        })
    }

    pub fn update_install_started(&self) -> Result<EventStream<SoftwareUpdate>> {
        self.event_stream(&[EventKind::UpdateInstallStarted], |event| match event {
            BackendEvent::UpdateInstallStarted(update) => Some(normalize_update(update.clone())),
            _ => None,
        })
    }

    /// Installation progress in `0.0..=1.0`.
    pub fn update_progress(&self) -> Result<EventStream<f64>> {
        self.event_stream(&[EventKind::UpdateProgress], |event| match event {
            BackendEvent::UpdateProgress(progress) => Some(*progress),
            _ => None,
        })
    }

    pub fn update_install_finished(&self) -> Result<EventStream<UpdateInstallResult>> {
        self.event_stream(&[EventKind::UpdateInstallFinished], |event| match event {
            BackendEvent::UpdateInstallFinished {
                error: Some(message),
                ..
            } => Some(UpdateInstallResult::Failed(message.clone())),
            BackendEvent::UpdateInstallFinished { update, error: None } => Some(
                UpdateInstallResult::Installed(update.clone().map(normalize_update)),
            ),
            _ => None,
        })
    }

    // Reader health

    /// Auto-reconnect lifecycle, forwarded as reported.
    pub fn reconnect_events(&self) -> Result<EventStream<ReconnectEvent>> {
        let kinds = [
            EventKind::ReconnectStarted,
            EventKind::ReconnectSucceeded,
            EventKind::ReconnectFailed,
        ];
        self.event_stream(&kinds, |event| match event {
            BackendEvent::ReconnectStarted => Some(ReconnectEvent::Started),
            BackendEvent::ReconnectSucceeded => Some(ReconnectEvent::Succeeded),
            BackendEvent::ReconnectFailed => Some(ReconnectEvent::Failed),
            _ => None,
        })
    }

    pub fn battery_levels(&self) -> Result<EventStream<BatteryLevel>> {
        self.event_stream(&[EventKind::BatteryLevelReported], |event| match event {
            BackendEvent::BatteryLevelReported {
                level,
                status_code,
                is_charging,
            } => Some(translate_battery(*level, *status_code, *is_charging)),
            _ => None,
        })
    }

    pub fn low_battery_warnings(&self) -> Result<EventStream<()>> {
        self.event_stream(&[EventKind::LowBatteryWarning], |event| match event {
            BackendEvent::LowBatteryWarning => Some(()),
            _ => None,
        })
    }

    pub fn reader_events(&self) -> Result<EventStream<ReaderEvent>> {
        self.event_stream(&[EventKind::ReaderEventReported], |event| match event {
            BackendEvent::ReaderEventReported { code } => {
                decoded(event.kind(), translate_reader_event(*code))
            }
            _ => None,
        })
    }

    fn event_stream<T, F>(&self, kinds: &[EventKind], map: F) -> Result<EventStream<T>>
    where
        T: Send + 'static,
        F: Fn(&BackendEvent) -> Option<T> + Send + Sync + 'static,
    {
        self.ensure_initialized()?;
        Ok(self.hub.stream(
            kinds,
            self.config.event_buffer,
            move |_: EventOrigin, event: &BackendEvent| map(event),
        ))
    }

    // Permissions

    pub async fn check_permissions(&self) -> Result<PermissionStatus> {
        self.ensure_initialized()?;
        Ok(self.backends.native().check_permissions().await?)
    }

    pub async fn request_permissions(&self) -> Result<PermissionStatus> {
        self.ensure_initialized()?;
        Ok(self.backends.native().request_permissions().await?)
    }

    // Simulator

    pub async fn get_simulator_configuration(&self) -> Result<SimulatorConfiguration> {
        self.ensure_initialized()?;
        let raw = self.backends.active().get_simulator_configuration().await?;
        Ok(translate_simulator_configuration(raw, self.cached_card()))
    }

    pub async fn set_simulator_configuration(
        &self,
        config: SimulatorConfiguration,
    ) -> Result<SimulatorConfiguration> {
        self.ensure_initialized()?;
        if let Some(card) = config.simulated_card {
            *self
                .simulated_card
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(card);
        }

        let raw = RawSimulatorConfiguration {
            available_reader_update: config.available_reader_update,
            simulated_card: config.simulated_card.map(|card| card.name().to_string()),
        };
        let reported = self
            .backends
            .active()
            .set_simulator_configuration(raw)
            .await?;
        Ok(translate_simulator_configuration(reported, self.cached_card()))
    }

    fn cached_card(&self) -> Option<SimulatedCardType> {
        *self
            .simulated_card
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn decoded<T>(kind: EventKind, result: tillpoint_core::Result<T>) -> Option<T> {
    result
        .map_err(|e| warn!("Dropping {} event: {}", kind, e))
        .ok()
}
