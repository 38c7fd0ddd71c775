//! Orchestration of a native reader SDK and a network reader SDK behind one
//! terminal API.
//!
//! Start from [`Terminal`]. The other modules are public so that embedders
//! can reuse individual pieces, such as the normalizer tables or the event
//! hub, against their own backends.

pub mod collection;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod hub;
pub mod logging;
pub mod normalizer;
pub mod selector;
pub mod terminal;
pub mod token;

pub use collection::{CollectGuard, PaymentCollector, PaymentGate};
pub use config::TerminalConfig;
pub use connection::{ConnectionController, DisconnectCallback};
pub use discovery::{DiscoveryEvent, DiscoveryManager, DiscoverySession, SessionPhase};
pub use error::{Result, TerminalError};
pub use hub::{EventHub, EventOrigin, EventStream, Subscription, SubscriptionId};
pub use selector::{BackendSelector, Backends, ConnectStyle};
pub use terminal::Terminal;
pub use token::{TokenBridge, TokenFetcher, TokenResponse, token_fetcher};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
