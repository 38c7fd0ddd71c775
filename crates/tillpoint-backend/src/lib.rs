//! Reader SDK backend contract for the tillpoint orchestrator.
//!
//! A payment terminal is driven through one of two structurally different
//! SDKs: a native SDK talking to Bluetooth, USB or on-device readers, and a
//! network SDK talking to internet readers over HTTPS. This crate defines
//! the contract both of them expose to the orchestrator:
//!
//! - [`TerminalBackend`]: request/response calls (discovery, connection,
//!   payment collection, display, updates, permissions, simulator).
//! - [`BackendEvent`] and [`TerminalBackend::add_listener`]: push events,
//!   delivered to listeners registered per [`EventKind`].
//! - [`BackendError`]: structured rejection carrying an optional decline
//!   code and payment intent.
//!
//! With the `mock` feature (on by default), [`mock::MockBackend`] provides a
//! scriptable backend for tests.
//!
//! # Raw values
//!
//! Backends report codes in their platform's own ordinal layout and may use
//! sentinel values for unknown fields. Nothing in this crate translates
//! them; that is the orchestrator's job.

pub mod error;
pub mod events;
pub mod traits;

#[cfg(feature = "mock")]
pub mod mock;

pub use error::{BackendError, Result};
pub use events::{BackendEvent, EventKind, Listener, ListenerHandle, RawReaderInput};
pub use traits::{ConnectParams, RawSimulatorConfiguration, TerminalBackend};
