//! Constants shared by the terminal data model and the backend adapters.
//!
//! Backends disagree on how they encode "no value" and on the ordinal layout
//! of several enums. The values below name those encodings so translation
//! code never matches on bare literals.
//!
//! # Canonical ordinals
//!
//! | Enum | Canonical (iOS / network) | Android |
//! |------|---------------------------|---------|
//! | Connection status | `0` not connected, `1` connected, `2` connecting | `0` not connected, `1` connecting, `2` connected |
//! | Payment status | `0` not ready, `1` ready, `2` waiting for input, `3` processing | same |
//!
//! ```
//! use tillpoint_core::constants::*;
//!
//! assert_eq!(UNKNOWN_SOFTWARE_VERSION, "unknown");
//! assert_eq!(READER_INPUT_SWIPE | READER_INPUT_INSERT | READER_INPUT_TAP, 7);
//! ```

// ============================================================================
// Backend sentinel values
// ============================================================================

/// Software version string the native Android path reports when the reader
/// has not told it yet.
pub const UNKNOWN_SOFTWARE_VERSION: &str = "unknown";

/// Battery level the native Android path reports while scanning, when the
/// real level is not known.
pub const UNKNOWN_BATTERY_LEVEL: f64 = 0.0;

/// Lowest valid battery level.
pub const MIN_BATTERY_LEVEL: f64 = 0.0;

/// Highest valid battery level.
pub const MAX_BATTERY_LEVEL: f64 = 1.0;

// ============================================================================
// Connection status codes
// ============================================================================

/// Canonical code for "not connected".
pub const STATUS_NOT_CONNECTED: i64 = 0;

/// Canonical code for "connected".
pub const STATUS_CONNECTED: i64 = 1;

/// Canonical code for "connecting".
pub const STATUS_CONNECTING: i64 = 2;

/// Android ordinal for "not connected".
pub const ANDROID_STATUS_NOT_CONNECTED: i64 = 0;

/// Android ordinal for "connecting".
pub const ANDROID_STATUS_CONNECTING: i64 = 1;

/// Android ordinal for "connected".
pub const ANDROID_STATUS_CONNECTED: i64 = 2;

// ============================================================================
// Reader input options
// ============================================================================

/// Bit set when the reader accepts a swiped card.
pub const READER_INPUT_SWIPE: u8 = 0b001;

/// Bit set when the reader accepts an inserted card.
pub const READER_INPUT_INSERT: u8 = 0b010;

/// Bit set when the reader accepts a tapped card.
pub const READER_INPUT_TAP: u8 = 0b100;

/// Token Android uses for swipe in its `"Swipe / Tap / Insert"` description.
pub const ANDROID_INPUT_SWIPE: &str = "Swipe";

/// Token Android uses for insert.
pub const ANDROID_INPUT_INSERT: &str = "Insert";

/// Token Android uses for tap.
pub const ANDROID_INPUT_TAP: &str = "Tap";

/// Separator between tokens in the Android description.
pub const ANDROID_INPUT_SEPARATOR: char = '/';

// ============================================================================
// Payment intents
// ============================================================================

/// Key inside a payment intent that holds user-supplied metadata. Keys below
/// it are user data and are never re-cased.
pub const METADATA_KEY: &str = "metadata";
