//! Shared fixtures for terminal integration tests.
//!
//! Every test drives a real [`Terminal`] over two scriptable mock backends.
//! The harness keeps the mock handles so tests can emit backend events and
//! assert call and listener counts directly.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tillpoint_backend::mock::{MockBackend, MockBackendHandle};
use tillpoint_core::{DeviceType, DiscoveryConfiguration, DiscoveryMethod, Platform, Reader};
use tillpoint_orchestrator::{
    DisconnectCallback, DiscoveryEvent, DiscoverySession, Terminal, TerminalConfig, logging,
    token_fetcher,
};

pub const TOKEN: &str = "pst_test_integration";

pub struct Harness {
    pub terminal: Terminal<MockBackend>,
    pub native: MockBackendHandle,
    pub network: MockBackendHandle,
    /// Readers passed to the host disconnect callback.
    pub disconnects: Arc<Mutex<Vec<Option<Reader>>>>,
    pub token_fetches: Arc<AtomicUsize>,
}

impl Harness {
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.lock().unwrap().len()
    }

    pub fn token_fetch_count(&self) -> usize {
        self.token_fetches.load(Ordering::SeqCst)
    }
}

/// Initialized terminal with both backends available.
pub async fn harness(platform: Platform) -> Harness {
    build(platform, TerminalConfig::default()).await
}

/// Initialized terminal whose network backend is disabled by configuration.
pub async fn harness_without_network(platform: Platform) -> Harness {
    build(platform, TerminalConfig::default().with_network_backend(false)).await
}

async fn build(platform: Platform, config: TerminalConfig) -> Harness {
    logging::init_for_tests();

    let (native_backend, native) = MockBackend::native(platform);
    let (network_backend, network) = MockBackend::network();

    let disconnects = Arc::new(Mutex::new(Vec::new()));
    let seen = disconnects.clone();
    let on_disconnect: DisconnectCallback = Arc::new(move |reader: Option<Reader>| {
        seen.lock().unwrap().push(reader);
    });

    let token_fetches = Arc::new(AtomicUsize::new(0));
    let counter = token_fetches.clone();
    let fetcher = token_fetcher(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { anyhow::Ok(TOKEN.to_string()) }
    });

    let terminal = Terminal::create(
        config,
        native_backend,
        Some(network_backend),
        fetcher,
        Some(on_disconnect),
    )
    .await
    .expect("terminal should initialize");

    Harness {
        terminal,
        native,
        network,
        disconnects,
        token_fetches,
    }
}

pub fn bluetooth_reader(serial: &str) -> Reader {
    Reader::new(serial, DeviceType::Chipper2X).with_software_version("2.1.0")
}

pub fn internet_reader(serial: &str) -> Reader {
    Reader::new(serial, DeviceType::WisePosE).with_network(
        "192.168.1.20",
        format!("tmr_{}", serial),
        tillpoint_core::NetworkStatus::Online,
    )
}

pub fn start(harness: &Harness, method: DiscoveryMethod) -> DiscoverySession<MockBackend> {
    harness
        .terminal
        .discover_readers(DiscoveryConfiguration::new(method))
        .expect("discovery should start")
}

/// Receive events until the session ends.
pub async fn drain(session: &mut DiscoverySession<MockBackend>) -> Vec<DiscoveryEvent> {
    let mut events = Vec::new();
    while let Some(event) = session.recv().await {
        events.push(event);
    }
    events
}

/// Run a discovery to completion.
pub async fn discover(harness: &Harness, method: DiscoveryMethod) -> Vec<DiscoveryEvent> {
    let mut session = start(harness, method);
    drain(&mut session).await
}

pub fn serials(readers: &[Reader]) -> Vec<&str> {
    readers
        .iter()
        .map(|reader| reader.serial_number.as_str())
        .collect()
}
