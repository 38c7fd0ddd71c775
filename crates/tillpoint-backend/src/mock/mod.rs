//! Scriptable in-memory backend for testing and development.
//!
//! The mock is split into the backend itself, which the orchestrator owns,
//! and a cloneable handle the test keeps to emit events, hold calls open and
//! inspect what the orchestrator did.

pub mod backend;

pub use backend::{MockBackend, MockBackendHandle};
