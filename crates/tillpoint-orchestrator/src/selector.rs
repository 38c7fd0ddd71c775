//! Backend selection.
//!
//! Which backend serves a request is a pure function of the operation
//! ([`backend_for_discovery`], [`backend_for_connect`]). The result is stored
//! as the *selected* backend; the *active* backend is what every other
//! component consults, and falls back to native when the network backend is
//! not available in this embedding.

use std::sync::{Arc, Mutex, PoisonError};
use tillpoint_backend::TerminalBackend;
use tillpoint_core::{BackendId, DiscoveryMethod};
use tracing::{debug, info};

/// Reader transport a connect call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectStyle {
    Bluetooth,
    Usb,
    LocalMobile,
    Handoff,
    Embedded,
    Internet,
}

impl ConnectStyle {
    pub const ALL: [ConnectStyle; 6] = [
        Self::Bluetooth,
        Self::Usb,
        Self::LocalMobile,
        Self::Handoff,
        Self::Embedded,
        Self::Internet,
    ];
}

/// Backend that must run a discovery with `method`.
///
/// Combined discovery runs on both backends but keeps native selected.
pub fn backend_for_discovery(method: DiscoveryMethod) -> BackendId {
    if method.is_internet() {
        BackendId::Network
    } else {
        BackendId::Native
    }
}

/// Backend that must serve a connect call of `style`.
pub fn backend_for_connect(style: ConnectStyle) -> BackendId {
    match style {
        ConnectStyle::Internet => BackendId::Network,
        ConnectStyle::Bluetooth
        | ConnectStyle::Usb
        | ConnectStyle::LocalMobile
        | ConnectStyle::Handoff
        | ConnectStyle::Embedded => BackendId::Native,
    }
}

/// Selected backend and the availability it is resolved against.
#[derive(Debug)]
pub struct BackendSelector {
    selected: Mutex<BackendId>,
    network_available: bool,
}

impl BackendSelector {
    pub fn new(network_available: bool) -> Self {
        Self {
            selected: Mutex::new(BackendId::Native),
            network_available,
        }
    }

    pub fn selected(&self) -> BackendId {
        *self.selected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Backend authoritative for events and status right now.
    pub fn active(&self) -> BackendId {
        match self.selected() {
            BackendId::Network if self.network_available => BackendId::Network,
            _ => BackendId::Native,
        }
    }

    pub fn is_network_available(&self) -> bool {
        self.network_available
    }

    /// Select `backend`, returning the previous selection.
    pub fn select(&self, backend: BackendId) -> BackendId {
        let mut selected = self.selected.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *selected, backend);
        if previous != backend {
            info!("Selected {} backend (was {})", backend, previous);
        }
        previous
    }

    pub fn select_for_discovery(&self, method: DiscoveryMethod) -> BackendId {
        let backend = backend_for_discovery(method);
        debug!("{} discovery runs on {} backend", method, backend);
        self.select(backend);
        backend
    }

    pub fn select_for_connect(&self, style: ConnectStyle) -> BackendId {
        let backend = backend_for_connect(style);
        self.select(backend);
        backend
    }

    /// Return to the native backend after a reader was lost.
    pub fn reset(&self) {
        self.select(BackendId::Native);
    }
}

/// The injected backends together with the selection state.
pub struct Backends<B> {
    native: Arc<B>,
    network: Option<Arc<B>>,
    selector: BackendSelector,
}

impl<B: TerminalBackend> Backends<B> {
    /// A disabled network backend is dropped here and never used.
    pub fn new(native: B, network: Option<B>, network_enabled: bool) -> Self {
        let network = match network {
            Some(_) if !network_enabled => {
                info!("Network backend disabled by configuration");
                None
            }
            other => other.map(Arc::new),
        };

        Self {
            selector: BackendSelector::new(network.is_some()),
            native: Arc::new(native),
            network,
        }
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    /// The backend with identity `id`, if available.
    pub fn get(&self, id: BackendId) -> Option<&Arc<B>> {
        match id {
            BackendId::Native => Some(&self.native),
            BackendId::Network => self.network.as_ref(),
        }
    }

    /// The backend with identity `id`, or native when it is unavailable.
    pub fn route(&self, id: BackendId) -> &Arc<B> {
        self.get(id).unwrap_or(&self.native)
    }

    pub fn active(&self) -> &Arc<B> {
        self.route(self.selector.active())
    }

    pub fn native(&self) -> &Arc<B> {
        &self.native
    }

    /// Available backends, native first.
    pub fn available(&self) -> impl Iterator<Item = &Arc<B>> {
        std::iter::once(&self.native).chain(self.network.iter())
    }
}
