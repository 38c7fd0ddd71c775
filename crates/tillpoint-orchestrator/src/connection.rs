//! Connection lifecycle.
//!
//! Connect calls force the selection for their reader style, then go to the
//! active backend. A backend that cannot find the reader, or does not
//! support the style, answers `None`; that is not an error.
//!
//! Status is exposed both as a one-shot query and as a stream. The stream
//! starts with the one-shot value unless a pushed status beat it, in which
//! case the one-shot value is stale and dropped.

use crate::discovery::DiscoveryManager;
use crate::error::{Result, TerminalError};
use crate::hub::{EventHub, EventOrigin, EventStream, Subscription, deliver};
use crate::normalizer::{normalize_reader, translate_connection_status};
use crate::selector::{Backends, ConnectStyle};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tillpoint_backend::{BackendEvent, ConnectParams, EventKind, TerminalBackend};
use tillpoint_core::{BackendId, ConnectionStatus, Reader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Host callback for a reader lost without being asked to disconnect.
pub type DisconnectCallback = Arc<dyn Fn(Option<Reader>) + Send + Sync>;

struct StatusSink {
    tx: mpsc::Sender<ConnectionStatus>,
    pushed: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ConnectionController<B> {
    backends: Arc<Backends<B>>,
    hub: Arc<EventHub<B>>,
    discovery: Arc<DiscoveryManager<B>>,
    capacity: usize,
    on_unexpected_disconnect: Option<DisconnectCallback>,
    disconnect_streams: Mutex<Vec<mpsc::Sender<Option<Reader>>>>,
    disconnect_subscription: Mutex<Option<Subscription>>,
}

impl<B: TerminalBackend> ConnectionController<B> {
    pub fn new(
        backends: Arc<Backends<B>>,
        hub: Arc<EventHub<B>>,
        discovery: Arc<DiscoveryManager<B>>,
        capacity: usize,
        on_unexpected_disconnect: Option<DisconnectCallback>,
    ) -> Arc<Self> {
        Arc::new(Self {
            backends,
            hub,
            discovery,
            capacity,
            on_unexpected_disconnect,
            disconnect_streams: Mutex::new(Vec::new()),
            disconnect_subscription: Mutex::new(None),
        })
    }

    /// Start listening for unexpected disconnects on every backend.
    /// Calling it again does nothing.
    pub fn attach(self: &Arc<Self>) {
        let mut slot = lock(&self.disconnect_subscription);
        if slot.is_some() {
            return;
        }

        let controller: Weak<Self> = Arc::downgrade(self);
        let handler = Arc::new(move |origin: EventOrigin, event: &BackendEvent| {
            if let (Some(controller), BackendEvent::UnexpectedReaderDisconnect(reader)) =
                (controller.upgrade(), event)
            {
                controller.on_unexpected_disconnect(origin, reader.clone());
            }
        });

        *slot = Some(self.hub.subscribe_to(
            &BackendId::ALL,
            &[EventKind::UnexpectedReaderDisconnect],
            handler,
        ));
    }

    /// A reader was lost. Selection always returns to native; the host only
    /// hears about it when the reporting backend was the active one.
    pub fn on_unexpected_disconnect(&self, origin: EventOrigin, reader: Option<Reader>) {
        let selector = self.backends.selector();
        let was_active = selector.active() == origin.backend;
        selector.reset();

        if !was_active {
            debug!(
                "Ignoring unexpected disconnect from inactive {} backend",
                origin.backend
            );
            return;
        }

        let reader = reader.map(normalize_reader);
        warn!(
            "Reader {} disconnected unexpectedly from {} backend",
            reader
                .as_ref()
                .map_or("<unknown>", |reader| reader.serial_number.as_str()),
            origin.backend
        );

        if let Some(callback) = &self.on_unexpected_disconnect {
            callback(reader.clone());
        }

        let mut streams = lock(&self.disconnect_streams);
        streams.retain(|tx| !tx.is_closed());
        for tx in streams.iter() {
            deliver(tx, reader.clone());
        }
    }

    /// Stream of readers lost from the active backend.
    pub fn unexpected_disconnects(&self) -> EventStream<Option<Reader>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut streams = lock(&self.disconnect_streams);
        streams.retain(|tx| !tx.is_closed());
        streams.push(tx);
        EventStream::new(rx, None)
    }

    /// Connect the discovered reader `params.serial_number` over `style`.
    pub async fn connect(
        &self,
        style: ConnectStyle,
        mut params: ConnectParams,
    ) -> Result<Option<Reader>> {
        let Some(known) = self.discovery.discovered_reader(&params.serial_number) else {
            warn!("Reader {} was not discovered", params.serial_number);
            return Err(TerminalError::reader_not_found(params.serial_number));
        };

        if style == ConnectStyle::Internet {
            params.ip_address = params.ip_address.or(known.ip_address);
            params.backend_reader_id = params.backend_reader_id.or(known.backend_reader_id);
        }

        self.backends.selector().select_for_connect(style);
        let backend = self.backends.active();
        info!(
            "Connecting to reader {} ({:?}) on {} backend",
            params.serial_number,
            style,
            backend.id()
        );

        let reader = match style {
            ConnectStyle::Bluetooth => backend.connect_bluetooth_reader(params).await?,
            ConnectStyle::Usb => backend.connect_usb_reader(params).await?,
            ConnectStyle::LocalMobile => backend.connect_local_mobile_reader(params).await?,
            ConnectStyle::Handoff => backend.connect_handoff_reader(params).await?,
            ConnectStyle::Embedded => backend.connect_embedded_reader(params).await?,
            ConnectStyle::Internet => backend.connect_internet_reader(params).await?,
        };

        match &reader {
            Some(reader) => info!("Connected to reader {}", reader.serial_number),
            None => info!("Backend returned no reader"),
        }
        Ok(reader.map(normalize_reader))
    }

    pub async fn disconnect_reader(&self) -> Result<()> {
        let backend = self.backends.active();
        info!("Disconnecting reader on {} backend", backend.id());
        backend.disconnect_reader().await?;
        Ok(())
    }

    pub async fn get_connected_reader(&self) -> Result<Option<Reader>> {
        let reader = self.backends.active().get_connected_reader().await?;
        Ok(reader.map(normalize_reader))
    }

    pub async fn get_connection_status(&self) -> Result<ConnectionStatus> {
        let backend = self.backends.active();
        let code = backend.get_connection_status().await?;
        Ok(translate_connection_status(backend.platform(), code)?)
    }

    pub async fn cancel_auto_reconnect(&self) -> Result<()> {
        self.backends.active().cancel_auto_reconnect().await?;
        Ok(())
    }

    /// Current status followed by every change on the active backend.
    pub fn connection_status(&self) -> EventStream<ConnectionStatus> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let sink = Arc::new(Mutex::new(StatusSink { tx, pushed: false }));

        let push_sink = sink.clone();
        let handler = Arc::new(move |origin: EventOrigin, event: &BackendEvent| {
            let BackendEvent::ConnectionStatusChanged { code } = event else {
                return;
            };
            match translate_connection_status(origin.platform, *code) {
                Ok(status) => {
                    let mut sink = lock(&push_sink);
                    sink.pushed = true;
                    deliver(&sink.tx, status);
                }
                Err(e) => warn!("Dropping status from {} backend: {}", origin.backend, e),
            }
        });
        let subscription = self
            .hub
            .subscribe(&[EventKind::ConnectionStatusChanged], handler);

        let backend = self.backends.active().clone();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime to query the initial connection status on");
            return EventStream::new(rx, Some(subscription));
        };
        runtime.spawn(async move {
            let status = match backend.get_connection_status().await {
                Ok(code) => translate_connection_status(backend.platform(), code)
                    .map_err(TerminalError::from),
                Err(e) => Err(e.into()),
            };

            let sink = lock(&sink);
            match status {
                Ok(_) if sink.pushed => debug!("Discarding stale initial connection status"),
                Ok(status) => deliver(&sink.tx, status),
                Err(e) => warn!("Initial connection status query failed: {}", e),
            }
        });

        EventStream::new(rx, Some(subscription))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tillpoint_backend::mock::{MockBackend, MockBackendHandle};
    use tillpoint_core::{
        DeviceType, DiscoveryConfiguration, DiscoveryMethod, NetworkStatus, Platform, constants,
    };

    struct Fixture {
        controller: Arc<ConnectionController<MockBackend>>,
        discovery: Arc<DiscoveryManager<MockBackend>>,
        backends: Arc<Backends<MockBackend>>,
        native: MockBackendHandle,
        network: MockBackendHandle,
        disconnects: Arc<AtomicUsize>,
    }

    fn fixture(platform: Platform) -> Fixture {
        let (native_backend, native) = MockBackend::native(platform);
        let (network_backend, network) = MockBackend::network();
        let backends = Arc::new(Backends::new(native_backend, Some(network_backend), true));
        let hub = EventHub::new(backends.clone());
        let discovery = DiscoveryManager::new(backends.clone(), hub.clone());

        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = disconnects.clone();
        let callback: DisconnectCallback = Arc::new(move |_: Option<Reader>| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let controller =
            ConnectionController::new(backends.clone(), hub, discovery.clone(), 16, Some(callback));
        controller.attach();

        Fixture {
            controller,
            discovery,
            backends,
            native,
            network,
            disconnects,
        }
    }

    async fn discover(f: &Fixture, method: DiscoveryMethod, readers: Vec<Reader>) {
        let handle = if method == DiscoveryMethod::Internet {
            &f.network
        } else {
            &f.native
        };
        handle.set_discovered_readers(readers);
        let mut session = f.discovery.start(DiscoveryConfiguration::new(method)).unwrap();
        while session.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_connect_unknown_serial_rejected() {
        let f = fixture(Platform::Ios);

        let err = f
            .controller
            .connect(ConnectStyle::Bluetooth, ConnectParams::new("NOPE"))
            .await
            .unwrap_err();

        assert_eq!(err, TerminalError::reader_not_found("NOPE"));
        assert_eq!(f.native.call_count("connect_bluetooth_reader"), 0);
    }

    #[tokio::test]
    async fn test_bluetooth_connect_uses_native() {
        let f = fixture(Platform::Android);
        discover(&f, DiscoveryMethod::BluetoothScan, vec![
            Reader::new("CHB-1", DeviceType::Chipper2X).with_software_version("unknown"),
        ])
        .await;

        let reader = f
            .controller
            .connect(ConnectStyle::Bluetooth, ConnectParams::new("CHB-1"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reader.software_version, None);
        assert_eq!(f.backends.selector().selected(), BackendId::Native);
        assert_eq!(
            f.controller.get_connection_status().await.unwrap(),
            ConnectionStatus::Connected
        );
    }

    #[tokio::test]
    async fn test_internet_connect_fills_network_fields() {
        let f = fixture(Platform::Ios);
        discover(&f, DiscoveryMethod::Internet, vec![
            Reader::new("WPE-1", DeviceType::WisePosE).with_network(
                "10.0.0.4",
                "tmr_1",
                NetworkStatus::Online,
            ),
        ])
        .await;

        let reader = f
            .controller
            .connect(ConnectStyle::Internet, ConnectParams::new("WPE-1"))
            .await
            .unwrap();

        assert!(reader.is_some());
        let params = f.network.last_connect().unwrap();
        assert_eq!(params.ip_address.as_deref(), Some("10.0.0.4"));
        assert_eq!(params.backend_reader_id.as_deref(), Some("tmr_1"));
        assert_eq!(f.backends.selector().active(), BackendId::Network);
    }

    #[tokio::test]
    async fn test_usb_connect_forces_native() {
        let f = fixture(Platform::Ios);
        discover(&f, DiscoveryMethod::Usb, vec![Reader::new("M2-1", DeviceType::StripeM2)]).await;
        f.backends.selector().select(BackendId::Network);

        let reader = f
            .controller
            .connect(ConnectStyle::Usb, ConnectParams::new("M2-1"))
            .await
            .unwrap();

        assert!(reader.is_some());
        assert_eq!(f.native.call_count("connect_usb_reader"), 1);
        assert_eq!(f.network.call_count("connect_usb_reader"), 0);
        assert_eq!(f.backends.selector().selected(), BackendId::Native);
    }

    #[tokio::test]
    async fn test_backend_without_reader_resolves_to_none() {
        let f = fixture(Platform::Ios);
        discover(&f, DiscoveryMethod::BluetoothScan, vec![
            Reader::new("CHB-1", DeviceType::Chipper2X),
        ])
        .await;
        f.native.set_discovered_readers(Vec::new());

        let reader = f
            .controller
            .connect(ConnectStyle::Bluetooth, ConnectParams::new("CHB-1"))
            .await
            .unwrap();

        assert_eq!(reader, None);
        assert_eq!(f.controller.get_connected_reader().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disconnect_reader() {
        let f = fixture(Platform::Ios);
        f.native.set_connect_result(Some(Reader::new("CHB-1", DeviceType::Chipper2X)));
        discover(&f, DiscoveryMethod::BluetoothScan, vec![
            Reader::new("CHB-1", DeviceType::Chipper2X),
        ])
        .await;
        f.controller
            .connect(ConnectStyle::Bluetooth, ConnectParams::new("CHB-1"))
            .await
            .unwrap();

        f.controller.disconnect_reader().await.unwrap();

        assert_eq!(f.native.connected_reader(), None);
        assert_eq!(
            f.controller.get_connection_status().await.unwrap(),
            ConnectionStatus::NotConnected
        );
    }

    #[tokio::test]
    async fn test_unexpected_disconnect_from_active_backend() {
        let f = fixture(Platform::Ios);
        let mut stream = f.controller.unexpected_disconnects();
        f.backends.selector().select(BackendId::Network);

        f.network.emit(BackendEvent::UnexpectedReaderDisconnect(Some(
            Reader::new("WPE-1", DeviceType::WisePosE),
        )));

        assert_eq!(f.backends.selector().selected(), BackendId::Native);
        assert_eq!(f.disconnects.load(Ordering::SeqCst), 1);
        let reader = stream.recv().await.unwrap().unwrap();
        assert_eq!(reader.serial_number, "WPE-1");
    }

    #[tokio::test]
    async fn test_unexpected_disconnect_from_inactive_backend_only_resets() {
        let f = fixture(Platform::Ios);
        let mut stream = f.controller.unexpected_disconnects();

        f.network.emit(BackendEvent::UnexpectedReaderDisconnect(None));

        assert_eq!(f.backends.selector().selected(), BackendId::Native);
        assert_eq!(f.disconnects.load(Ordering::SeqCst), 0);
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn test_dropped_disconnect_streams_are_pruned() {
        let f = fixture(Platform::Ios);
        for _ in 0..10 {
            drop(f.controller.unexpected_disconnects());
        }
        let _live = f.controller.unexpected_disconnects();

        assert_eq!(lock(&f.controller.disconnect_streams).len(), 1);
    }

    #[tokio::test]
    async fn test_status_stream_translates_android_codes() {
        let f = fixture(Platform::Android);
        f.native.set_connection_status(constants::ANDROID_STATUS_CONNECTING);

        let mut stream = f.controller.connection_status();
        assert_eq!(stream.recv().await, Some(ConnectionStatus::Connecting));

        f.native.emit(BackendEvent::ConnectionStatusChanged {
            code: constants::ANDROID_STATUS_CONNECTED,
        });
        assert_eq!(stream.recv().await, Some(ConnectionStatus::Connected));
    }

    #[tokio::test]
    async fn test_status_stream_push_beats_initial_query() {
        let f = fixture(Platform::Ios);
        f.native.hold("get_connection_status");
        f.native.set_connection_status(constants::STATUS_NOT_CONNECTED);

        let mut stream = f.controller.connection_status();
        assert!(f.native.wait_for_calls("get_connection_status", 1).await);

        f.native.emit(BackendEvent::ConnectionStatusChanged {
            code: constants::STATUS_CONNECTED,
        });
        f.native.release("get_connection_status", Ok(()));

        assert_eq!(stream.recv().await, Some(ConnectionStatus::Connected));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_status_stream_detaches_on_drop() {
        let f = fixture(Platform::Ios);
        let stream = f.controller.connection_status();
        assert_eq!(f.native.listener_count(EventKind::ConnectionStatusChanged), 1);
        assert_eq!(f.network.listener_count(EventKind::ConnectionStatusChanged), 1);

        drop(stream);
        assert_eq!(f.native.listener_count(EventKind::ConnectionStatusChanged), 0);
        assert_eq!(f.network.listener_count(EventKind::ConnectionStatusChanged), 0);
    }
}
