//! The collaborator contract every reader SDK backend exposes.
//!
//! # Send futures
//!
//! Methods are declared as `fn .. -> impl Future<Output = ..> + Send` rather
//! than `async fn` so that callers holding a generic `B: TerminalBackend`
//! behind an `Arc` can move the call onto a spawned task. Implementors are
//! free to write `async fn` as long as the resulting future is `Send`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tillpoint_backend::{Result, TerminalBackend};
//! use tillpoint_core::{DiscoveryConfiguration, DiscoveryMethod};
//!
//! async fn scan<B: TerminalBackend>(backend: Arc<B>) -> Result<()> {
//!     backend.initialize().await?;
//!     let config = DiscoveryConfiguration::new(DiscoveryMethod::BluetoothScan);
//!     tokio::spawn(async move { backend.discover_readers(config).await })
//!         .await
//!         .unwrap_or(Ok(()))
//! }
//! ```
//!
//! # Connect calls
//!
//! A backend implements the `connect_*` entry points for the reader styles it
//! supports. The provided defaults resolve to `Ok(None)`: a backend that has
//! no such transport cannot find the reader, which is not an error.

use crate::{
    Result,
    events::{EventKind, Listener, ListenerHandle},
};
use std::future::Future;
use tillpoint_core::{
    BackendId, Cart, CollectConfig, DiscoveryConfiguration, ListLocationsParameters, LocationList,
    PaymentIntent, PermissionStatus, Platform, Reader, SimulateReaderUpdate,
};

/// Parameters shared by all `connect_*` calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectParams {
    pub serial_number: String,

    pub location_id: Option<String>,

    /// Bluetooth only.
    pub auto_reconnect_on_unexpected_disconnect: bool,

    /// Internet only.
    pub ip_address: Option<String>,

    /// Internet only.
    pub backend_reader_id: Option<String>,

    /// Internet only.
    pub fail_if_in_use: bool,

    /// Internet only.
    pub allow_customer_cancel: bool,
}

impl ConnectParams {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            ..Self::default()
        }
    }

    pub fn with_location(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = Some(location_id.into());
        self
    }
}

/// Simulator settings as a backend reports them.
///
/// Backends name the simulated card by a string; some cannot report it at
/// all and leave it `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSimulatorConfiguration {
    pub available_reader_update: Option<SimulateReaderUpdate>,
    pub simulated_card: Option<String>,
}

/// A reader SDK backend.
pub trait TerminalBackend: Send + Sync + 'static {
    /// Which of the two backend slots this backend fills.
    fn id(&self) -> BackendId;

    /// Platform whose ordinal tables apply to codes this backend reports.
    fn platform(&self) -> Platform;

    /// Prepare the SDK. Calling it again is a successful no-op.
    fn initialize(&self) -> impl Future<Output = Result<()>> + Send;

    /// Answer the backend's last token request with a token, or with an
    /// error message when the host could not produce one.
    fn set_connection_token(&self, token: Option<String>, error: Option<String>) -> Result<()>;

    /// Run discovery. Resolves when discovery completes, rejects on failure.
    /// Found readers arrive through [`EventKind::ReadersDiscovered`].
    fn discover_readers(
        &self,
        config: DiscoveryConfiguration,
    ) -> impl Future<Output = Result<()>> + Send;

    fn cancel_discover_readers(&self) -> impl Future<Output = Result<()>> + Send;

    fn connect_bluetooth_reader(
        &self,
        params: ConnectParams,
    ) -> impl Future<Output = Result<Option<Reader>>> + Send {
        let _ = params;
        async { Ok(None) }
    }

    fn connect_usb_reader(
        &self,
        params: ConnectParams,
    ) -> impl Future<Output = Result<Option<Reader>>> + Send {
        let _ = params;
        async { Ok(None) }
    }

    fn connect_local_mobile_reader(
        &self,
        params: ConnectParams,
    ) -> impl Future<Output = Result<Option<Reader>>> + Send {
        let _ = params;
        async { Ok(None) }
    }

    fn connect_handoff_reader(
        &self,
        params: ConnectParams,
    ) -> impl Future<Output = Result<Option<Reader>>> + Send {
        let _ = params;
        async { Ok(None) }
    }

    fn connect_embedded_reader(
        &self,
        params: ConnectParams,
    ) -> impl Future<Output = Result<Option<Reader>>> + Send {
        let _ = params;
        async { Ok(None) }
    }

    fn connect_internet_reader(
        &self,
        params: ConnectParams,
    ) -> impl Future<Output = Result<Option<Reader>>> + Send {
        let _ = params;
        async { Ok(None) }
    }

    fn disconnect_reader(&self) -> impl Future<Output = Result<()>> + Send;

    fn get_connected_reader(&self) -> impl Future<Output = Result<Option<Reader>>> + Send;

    /// Connection status code in this backend's ordinal layout.
    fn get_connection_status(&self) -> impl Future<Output = Result<i64>> + Send;

    fn get_payment_status(&self) -> impl Future<Output = Result<i64>> + Send;

    fn retrieve_payment_intent(
        &self,
        client_secret: String,
    ) -> impl Future<Output = Result<PaymentIntent>> + Send;

    fn collect_payment_method(
        &self,
        config: Option<CollectConfig>,
    ) -> impl Future<Output = Result<PaymentIntent>> + Send;

    fn cancel_collect_payment_method(&self) -> impl Future<Output = Result<()>> + Send;

    fn process_payment(&self) -> impl Future<Output = Result<PaymentIntent>> + Send;

    fn clear_cached_credentials(&self) -> impl Future<Output = Result<()>> + Send;

    fn set_reader_display(&self, cart: Cart) -> impl Future<Output = Result<()>> + Send;

    fn clear_reader_display(&self) -> impl Future<Output = Result<()>> + Send;

    fn list_locations(
        &self,
        params: ListLocationsParameters,
    ) -> impl Future<Output = Result<LocationList>> + Send;

    fn install_available_update(&self) -> impl Future<Output = Result<()>> + Send;

    fn cancel_install_update(&self) -> impl Future<Output = Result<()>> + Send;

    /// Stop a Bluetooth auto-reconnect in progress.
    fn cancel_auto_reconnect(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    fn check_permissions(&self) -> impl Future<Output = Result<PermissionStatus>> + Send;

    fn request_permissions(&self) -> impl Future<Output = Result<PermissionStatus>> + Send;

    fn get_simulator_configuration(
        &self,
    ) -> impl Future<Output = Result<RawSimulatorConfiguration>> + Send;

    fn set_simulator_configuration(
        &self,
        config: RawSimulatorConfiguration,
    ) -> impl Future<Output = Result<RawSimulatorConfiguration>> + Send;

    /// Register `listener` for every event of `kind`.
    fn add_listener(&self, kind: EventKind, listener: Listener) -> ListenerHandle;
}
