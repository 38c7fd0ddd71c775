use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one of the two reader SDK backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    /// On-device Bluetooth/USB/NFC reader SDK.
    Native,
    /// Internet-connected reader SDK driven over HTTPS.
    Network,
}

impl BackendId {
    /// Both identities, native first.
    pub const ALL: [BackendId; 2] = [BackendId::Native, BackendId::Network];
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Platform a backend runs on. Decides which ordinal tables apply to the
/// codes it reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ios => write!(f, "ios"),
            Self::Android => write!(f, "android"),
            Self::Web => write!(f, "web"),
        }
    }
}

/// Reader hardware model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Chipper2X,
    VerifoneP400,
    WisePad3,
    StripeM2,
    WisePosE,
    WisePosEDevKit,
    Unknown,
    Etna,
    Chipper1X,
    StripeS700,
    /// The phone or tablet the application runs on (tap to pay).
    CotsDevice,
}

impl DeviceType {
    /// Decode the numeric device type both backends report.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Chipper2X,
            1 => Self::VerifoneP400,
            2 => Self::WisePad3,
            3 => Self::StripeM2,
            4 => Self::WisePosE,
            5 => Self::WisePosEDevKit,
            7 => Self::Etna,
            8 => Self::Chipper1X,
            9 => Self::StripeS700,
            10 => Self::CotsDevice,
            _ => Self::Unknown,
        }
    }

    /// How readers of this type are connected.
    ///
    /// Types without a known transport are treated as internet readers.
    pub fn style(&self) -> DeviceStyle {
        match self {
            Self::Chipper2X | Self::Chipper1X | Self::StripeM2 | Self::WisePad3 => {
                DeviceStyle::Bluetooth
            }
            Self::CotsDevice => DeviceStyle::Local,
            Self::VerifoneP400
            | Self::WisePosE
            | Self::WisePosEDevKit
            | Self::StripeS700
            | Self::Etna
            | Self::Unknown => DeviceStyle::Internet,
        }
    }
}

/// Transport class of a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStyle {
    Bluetooth,
    Internet,
    Local,
}

/// Bucketed battery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryStatus {
    #[default]
    Unknown,
    Critical,
    Low,
    Nominal,
}

impl BatteryStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Critical,
            2 => Self::Low,
            3 => Self::Nominal,
            _ => Self::Unknown,
        }
    }
}

/// Network reachability of an internet reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    Offline,
    Online,
}

/// Whether the reader has a location assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationStatus {
    #[default]
    Unknown,
    Set,
    NotSet,
}

/// A card reader as seen by the host application.
///
/// Backend-specific fields are all optional: a reader found over Bluetooth
/// has no IP address or backend id, and an internet reader has no battery
/// information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reader {
    /// Serial number, unique within a discovery session.
    pub serial_number: String,

    pub device_type: DeviceType,

    pub software_version: Option<String>,

    /// Battery level in `0.0..=1.0`, `None` when unknown.
    pub battery_level: Option<f64>,

    pub battery_status: BatteryStatus,

    pub is_charging: Option<bool>,

    /// Internet readers only.
    pub network_status: Option<NetworkStatus>,

    pub ip_address: Option<String>,

    /// Identifier assigned by the network backend once it knows the reader.
    pub backend_reader_id: Option<String>,

    pub label: Option<String>,

    pub location_id: Option<String>,

    pub location_status: LocationStatus,

    pub simulated: bool,
}

impl Reader {
    /// Create a reader with only the required fields set.
    pub fn new(serial_number: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            serial_number: serial_number.into(),
            device_type,
            software_version: None,
            battery_level: None,
            battery_status: BatteryStatus::Unknown,
            is_charging: None,
            network_status: None,
            ip_address: None,
            backend_reader_id: None,
            label: None,
            location_id: None,
            location_status: LocationStatus::Unknown,
            simulated: false,
        }
    }

    pub fn with_software_version(mut self, version: impl Into<String>) -> Self {
        self.software_version = Some(version.into());
        self
    }

    pub fn with_battery(mut self, level: f64, status: BatteryStatus) -> Self {
        self.battery_level = Some(level);
        self.battery_status = status;
        self
    }

    pub fn with_network(
        mut self,
        ip_address: impl Into<String>,
        backend_reader_id: impl Into<String>,
        status: NetworkStatus,
    ) -> Self {
        self.ip_address = Some(ip_address.into());
        self.backend_reader_id = Some(backend_reader_id.into());
        self.network_status = Some(status);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_location(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = Some(location_id.into());
        self.location_status = LocationStatus::Set;
        self
    }

    pub fn simulated(mut self) -> Self {
        self.simulated = true;
        self
    }

    /// Transport class derived from the device type.
    pub fn style(&self) -> DeviceStyle {
        self.device_type.style()
    }
}

/// How readers are searched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    BluetoothScan,
    BluetoothProximity,
    Internet,
    /// Bluetooth scan on the native backend and internet discovery on the
    /// network backend at the same time.
    Combined,
    Usb,
    Embedded,
    Handoff,
    LocalMobile,
}

impl DiscoveryMethod {
    pub fn is_internet(&self) -> bool {
        matches!(self, Self::Internet)
    }
}

impl fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BluetoothScan => "bluetooth_scan",
            Self::BluetoothProximity => "bluetooth_proximity",
            Self::Internet => "internet",
            Self::Combined => "combined",
            Self::Usb => "usb",
            Self::Embedded => "embedded",
            Self::Handoff => "handoff",
            Self::LocalMobile => "local_mobile",
        };
        write!(f, "{name}")
    }
}

/// Parameters of one discovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfiguration {
    pub method: DiscoveryMethod,

    pub simulated: bool,

    /// Only honoured by internet discovery.
    pub location_id: Option<String>,
}

impl DiscoveryConfiguration {
    pub fn new(method: DiscoveryMethod) -> Self {
        Self {
            method,
            simulated: false,
            location_id: None,
        }
    }

    pub fn simulated(mut self) -> Self {
        self.simulated = true;
        self
    }

    pub fn with_location(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = Some(location_id.into());
        self
    }

    /// Copy of this configuration with `method` substituted. The location
    /// filter is kept only when the new method is internet discovery.
    pub fn retarget(&self, method: DiscoveryMethod) -> Self {
        Self {
            method,
            simulated: self.simulated,
            location_id: if method.is_internet() {
                self.location_id.clone()
            } else {
                None
            },
        }
    }
}

/// Connection state of the reader, as exposed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    NotConnected,
    Connected,
    Connecting,
}

impl ConnectionStatus {
    /// Decode a canonical status code.
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            crate::constants::STATUS_NOT_CONNECTED => Ok(Self::NotConnected),
            crate::constants::STATUS_CONNECTED => Ok(Self::Connected),
            crate::constants::STATUS_CONNECTING => Ok(Self::Connecting),
            other => Err(Error::unknown_code("connection status", other)),
        }
    }

    /// Canonical code of this status.
    pub fn code(&self) -> i64 {
        match self {
            Self::NotConnected => crate::constants::STATUS_NOT_CONNECTED,
            Self::Connected => crate::constants::STATUS_CONNECTED,
            Self::Connecting => crate::constants::STATUS_CONNECTING,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not_connected"),
            Self::Connected => write!(f, "connected"),
            Self::Connecting => write!(f, "connecting"),
        }
    }
}

/// Readiness of the payment pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    NotReady,
    Ready,
    WaitingForInput,
    Processing,
}

impl PaymentStatus {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::NotReady),
            1 => Ok(Self::Ready),
            2 => Ok(Self::WaitingForInput),
            3 => Ok(Self::Processing),
            other => Err(Error::unknown_code("payment status", other)),
        }
    }
}

/// Prompt the reader wants shown to the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderDisplayMessage {
    RetryCard,
    InsertCard,
    InsertOrSwipeCard,
    SwipeCard,
    RemoveCard,
    MultipleContactlessCardsDetected,
    TryAnotherReadMethod,
    TryAnotherCard,
}

impl ReaderDisplayMessage {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::RetryCard),
            1 => Ok(Self::InsertCard),
            2 => Ok(Self::InsertOrSwipeCard),
            3 => Ok(Self::SwipeCard),
            4 => Ok(Self::RemoveCard),
            5 => Ok(Self::MultipleContactlessCardsDetected),
            6 => Ok(Self::TryAnotherReadMethod),
            7 => Ok(Self::TryAnotherCard),
            other => Err(Error::unknown_code("reader display message", other)),
        }
    }
}

/// Bit set of the card entry modes the reader is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ReaderInputOptions(u8);

impl ReaderInputOptions {
    pub const NONE: Self = Self(0);
    pub const SWIPE: Self = Self(crate::constants::READER_INPUT_SWIPE);
    pub const INSERT: Self = Self(crate::constants::READER_INPUT_INSERT);
    pub const TAP: Self = Self(crate::constants::READER_INPUT_TAP);

    /// Build from raw bits, ignoring bits with no meaning.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0b111)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ReaderInputOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Card presence changes reported by Bluetooth readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderEvent {
    CardInserted,
    CardRemoved,
}

impl ReaderEvent {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::CardInserted),
            1 => Ok(Self::CardRemoved),
            other => Err(Error::unknown_code("reader event", other)),
        }
    }
}

/// Battery report pushed by a connected Bluetooth reader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryLevel {
    pub level: f64,
    pub status: BatteryStatus,
    pub is_charging: bool,
}

/// Auto-reconnect lifecycle of a Bluetooth reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectEvent {
    Started,
    Succeeded,
    Failed,
}

/// Rough duration of a reader software update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateTimeEstimate {
    #[default]
    LessThanOneMinute,
    OneToTwoMinutes,
    TwoToFiveMinutes,
    FiveToFifteenMinutes,
}

impl UpdateTimeEstimate {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::LessThanOneMinute),
            1 => Ok(Self::OneToTwoMinutes),
            2 => Ok(Self::TwoToFiveMinutes),
            3 => Ok(Self::FiveToFifteenMinutes),
            other => Err(Error::unknown_code("update time estimate", other)),
        }
    }
}

/// A reader software update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareUpdate {
    pub device_software_version: Option<String>,
    pub estimated_update_time: UpdateTimeEstimate,
    pub components: Vec<String>,
    pub required_at: Option<DateTime<Utc>>,
}

impl SoftwareUpdate {
    pub fn new(version: impl Into<String>, estimate: UpdateTimeEstimate) -> Self {
        Self {
            device_software_version: Some(version.into()),
            estimated_update_time: estimate,
            components: Vec::new(),
            required_at: None,
        }
    }
}

/// Outcome of an update installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateInstallResult {
    Installed(Option<SoftwareUpdate>),
    Failed(String),
}

/// Runtime permission state for location/Bluetooth access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Granted,
    Denied,
    Prompt,
    /// The backend does not need any runtime permission.
    NotRequired,
}

/// Connection options for Bluetooth readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BluetoothConnectionConfiguration {
    pub location_id: String,
    pub auto_reconnect_on_unexpected_disconnect: bool,
}

impl BluetoothConnectionConfiguration {
    pub fn new(location_id: impl Into<String>) -> Self {
        Self {
            location_id: location_id.into(),
            auto_reconnect_on_unexpected_disconnect: false,
        }
    }

    pub fn with_auto_reconnect(mut self) -> Self {
        self.auto_reconnect_on_unexpected_disconnect = true;
        self
    }
}

/// Connection options for USB, handoff, local-mobile and embedded readers,
/// which only need a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationConnectionConfiguration {
    pub location_id: String,
}

impl LocationConnectionConfiguration {
    pub fn new(location_id: impl Into<String>) -> Self {
        Self {
            location_id: location_id.into(),
        }
    }
}

/// Connection options for internet readers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternetConnectionConfiguration {
    pub fail_if_in_use: bool,
    pub allow_customer_cancel: bool,
}
