//! Push events emitted by backends.
//!
//! Every asynchronous notification a backend produces goes through the same
//! primitive: [`TerminalBackend::add_listener`](crate::TerminalBackend::add_listener)
//! registers a [`Listener`] for one [`EventKind`] and returns a
//! [`ListenerHandle`]. The handle must be removed explicitly; dropping it
//! leaves the listener attached, the same way the platform SDKs behave.
//!
//! Payloads are raw: codes are in the emitting platform's ordinal layout and
//! records may still carry backend sentinel values.

use std::fmt;
use std::sync::Arc;
use tillpoint_core::{Reader, SoftwareUpdate};

/// Kinds of events a backend can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    RequestConnectionToken,
    ReadersDiscovered,
    ConnectionStatusChanged,
    PaymentStatusChanged,
    UnexpectedReaderDisconnect,
    ReaderDisplayMessageRequested,
    ReaderInputRequested,
    UpdateAvailable,
    UpdateInstallStarted,
    UpdateProgress,
    UpdateInstallFinished,
    ReconnectStarted,
    ReconnectSucceeded,
    ReconnectFailed,
    BatteryLevelReported,
    LowBatteryWarning,
    ReaderEventReported,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RequestConnectionToken => "requestConnectionToken",
            Self::ReadersDiscovered => "readersDiscovered",
            Self::ConnectionStatusChanged => "didChangeConnectionStatus",
            Self::PaymentStatusChanged => "didChangePaymentStatus",
            Self::UnexpectedReaderDisconnect => "didReportUnexpectedReaderDisconnect",
            Self::ReaderDisplayMessageRequested => "didRequestReaderDisplayMessage",
            Self::ReaderInputRequested => "didRequestReaderInput",
            Self::UpdateAvailable => "didReportAvailableUpdate",
            Self::UpdateInstallStarted => "didStartInstallingUpdate",
            Self::UpdateProgress => "didReportReaderSoftwareUpdateProgress",
            Self::UpdateInstallFinished => "didFinishInstallingUpdate",
            Self::ReconnectStarted => "didStartReaderReconnect",
            Self::ReconnectSucceeded => "didSucceedReaderReconnect",
            Self::ReconnectFailed => "didFailReaderReconnect",
            Self::BatteryLevelReported => "didReportBatteryLevel",
            Self::LowBatteryWarning => "didReportLowBatteryWarning",
            Self::ReaderEventReported => "didReportReaderEvent",
        };
        write!(f, "{name}")
    }
}

/// Card entry options as a backend reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawReaderInput {
    /// Numeric bit set (iOS, network backend).
    Bits(u8),
    /// Human-readable list such as `"Swipe / Tap / Insert"` (Android).
    Description(String),
}

/// An event as emitted by a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// The backend needs a fresh connection token.
    RequestConnectionToken,

    /// Full current list of readers found by the running discovery.
    ReadersDiscovered(Vec<Reader>),

    /// Connection status code in the platform's ordinal layout.
    ConnectionStatusChanged { code: i64 },

    PaymentStatusChanged { code: i64 },

    UnexpectedReaderDisconnect(Option<Reader>),

    ReaderDisplayMessageRequested { code: i64 },

    ReaderInputRequested(RawReaderInput),

    UpdateAvailable(SoftwareUpdate),

    UpdateInstallStarted(SoftwareUpdate),

    /// Installation progress in `0.0..=1.0`.
    UpdateProgress(f64),

    UpdateInstallFinished {
        update: Option<SoftwareUpdate>,
        error: Option<String>,
    },

    ReconnectStarted,

    ReconnectSucceeded,

    ReconnectFailed,

    BatteryLevelReported {
        level: f64,
        status_code: i64,
        is_charging: bool,
    },

    LowBatteryWarning,

    ReaderEventReported { code: i64 },
}

impl BackendEvent {
    /// Kind of this event, used to route it to listeners.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::RequestConnectionToken => EventKind::RequestConnectionToken,
            Self::ReadersDiscovered(_) => EventKind::ReadersDiscovered,
            Self::ConnectionStatusChanged { .. } => EventKind::ConnectionStatusChanged,
            Self::PaymentStatusChanged { .. } => EventKind::PaymentStatusChanged,
            Self::UnexpectedReaderDisconnect(_) => EventKind::UnexpectedReaderDisconnect,
            Self::ReaderDisplayMessageRequested { .. } => EventKind::ReaderDisplayMessageRequested,
            Self::ReaderInputRequested(_) => EventKind::ReaderInputRequested,
            Self::UpdateAvailable(_) => EventKind::UpdateAvailable,
            Self::UpdateInstallStarted(_) => EventKind::UpdateInstallStarted,
            Self::UpdateProgress(_) => EventKind::UpdateProgress,
            Self::UpdateInstallFinished { .. } => EventKind::UpdateInstallFinished,
            Self::ReconnectStarted => EventKind::ReconnectStarted,
            Self::ReconnectSucceeded => EventKind::ReconnectSucceeded,
            Self::ReconnectFailed => EventKind::ReconnectFailed,
            Self::BatteryLevelReported { .. } => EventKind::BatteryLevelReported,
            Self::LowBatteryWarning => EventKind::LowBatteryWarning,
            Self::ReaderEventReported { .. } => EventKind::ReaderEventReported,
        }
    }
}

/// Callback invoked for every event of the kind it was registered for.
pub type Listener = Arc<dyn Fn(&BackendEvent) + Send + Sync>;

/// Registration of a [`Listener`] on a backend.
///
/// Call [`remove`](ListenerHandle::remove) to detach the listener.
#[must_use = "dropping a ListenerHandle leaves the listener attached"]
pub struct ListenerHandle {
    id: u64,
    kind: EventKind,
    remover: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerHandle {
    /// Create a handle that runs `remover` when removed.
    pub fn new(id: u64, kind: EventKind, remover: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            kind,
            remover: Some(Box::new(remover)),
        }
    }

    /// Backend-assigned listener id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Detach the listener from its backend.
    pub fn remove(mut self) {
        if let Some(remover) = self.remover.take() {
            remover();
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("attached", &self.remover.is_some())
            .finish()
    }
}
