//! Translation of raw backend records into the canonical model.
//!
//! Every function here is pure and idempotent: feeding a normalized record
//! back in returns it unchanged. Platform-specific tables (Android status
//! ordinals, the Android reader input string) live here and nowhere else.

use serde_json::{Map, Value};
use tillpoint_backend::{RawReaderInput, RawSimulatorConfiguration};
use tillpoint_core::{
    BatteryLevel, BatteryStatus, ConnectionStatus, Location, PaymentIntent, PaymentStatus,
    Platform, Reader, ReaderDisplayMessage, ReaderEvent, ReaderInputOptions, SimulatedCardType,
    SimulatorConfiguration, SoftwareUpdate, constants,
};
use tracing::warn;

/// Clean up a reader record.
///
/// A battery level of exactly zero means "unknown" and becomes `None`; the
/// software version sentinel `"unknown"` becomes `None`.
pub fn normalize_reader(mut reader: Reader) -> Reader {
    if reader.battery_level == Some(constants::UNKNOWN_BATTERY_LEVEL) {
        reader.battery_level = None;
    }
    reader.software_version = normalize_version(reader.software_version);
    reader
}

pub fn normalize_readers(readers: Vec<Reader>) -> Vec<Reader> {
    readers.into_iter().map(normalize_reader).collect()
}

pub fn normalize_update(mut update: SoftwareUpdate) -> SoftwareUpdate {
    update.device_software_version = normalize_version(update.device_software_version);
    update
}

fn normalize_version(version: Option<String>) -> Option<String> {
    version.filter(|v| v != constants::UNKNOWN_SOFTWARE_VERSION)
}

/// Decode JSON-encoded sub-objects of a payment intent and camel-case their
/// keys. The top-level metadata map and any nested `metadata` object keep
/// their keys verbatim.
pub fn normalize_payment_intent(mut intent: PaymentIntent) -> PaymentIntent {
    intent.amount_details = intent.amount_details.map(normalize_nested);
    intent.payment_method = intent.payment_method.map(normalize_nested);
    intent.charges = intent.charges.into_iter().map(normalize_nested).collect();
    intent
}

fn normalize_nested(value: Value) -> Value {
    camelize(decode_embedded_json(value))
}

/// Replace a string holding a JSON object or array by the decoded value.
/// Any other string is kept as is.
fn decode_embedded_json(value: Value) -> Value {
    if let Value::String(text) = &value
        && let Ok(decoded @ (Value::Object(_) | Value::Array(_))) =
            serde_json::from_str::<Value>(text)
    {
        return decoded;
    }
    value
}

fn camelize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                let value = if key == constants::METADATA_KEY {
                    value
                } else {
                    camelize(value)
                };
                out.insert(snake_to_camel(&key), value);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(camelize).collect()),
        other => other,
    }
}

fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, part) in key.split('_').enumerate() {
        if i == 0 {
            out.push_str(part);
            continue;
        }
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

pub fn normalize_location(mut location: Location) -> Location {
    location.display_name = location.display_name.filter(|name| !name.trim().is_empty());
    location
}

/// Decode a connection status code reported by a backend on `platform`.
pub fn translate_connection_status(
    platform: Platform,
    code: i64,
) -> tillpoint_core::Result<ConnectionStatus> {
    match platform {
        Platform::Android => match code {
            constants::ANDROID_STATUS_NOT_CONNECTED => Ok(ConnectionStatus::NotConnected),
            constants::ANDROID_STATUS_CONNECTING => Ok(ConnectionStatus::Connecting),
            constants::ANDROID_STATUS_CONNECTED => Ok(ConnectionStatus::Connected),
            other => Err(tillpoint_core::Error::unknown_code("connection status", other)),
        },
        Platform::Ios | Platform::Web => ConnectionStatus::from_code(code),
    }
}

pub fn translate_payment_status(code: i64) -> tillpoint_core::Result<PaymentStatus> {
    PaymentStatus::from_code(code)
}

/// Card entry options as a bit set.
///
/// Android describes them as `"Swipe / Tap / Insert"`; unknown tokens are
/// skipped.
pub fn translate_reader_input(raw: &RawReaderInput) -> ReaderInputOptions {
    match raw {
        RawReaderInput::Bits(bits) => ReaderInputOptions::from_bits(*bits),
        RawReaderInput::Description(text) => text
            .split(constants::ANDROID_INPUT_SEPARATOR)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .fold(ReaderInputOptions::NONE, |options, token| {
                let bit = if token.eq_ignore_ascii_case(constants::ANDROID_INPUT_SWIPE) {
                    ReaderInputOptions::SWIPE
                } else if token.eq_ignore_ascii_case(constants::ANDROID_INPUT_INSERT) {
                    ReaderInputOptions::INSERT
                } else if token.eq_ignore_ascii_case(constants::ANDROID_INPUT_TAP) {
                    ReaderInputOptions::TAP
                } else {
                    warn!("Unknown reader input option '{}'", token);
                    ReaderInputOptions::NONE
                };
                options | bit
            }),
    }
}

pub fn translate_display_message(code: i64) -> tillpoint_core::Result<ReaderDisplayMessage> {
    ReaderDisplayMessage::from_code(code)
}

pub fn translate_reader_event(code: i64) -> tillpoint_core::Result<ReaderEvent> {
    ReaderEvent::from_code(code)
}

pub fn translate_battery(level: f64, status_code: i64, is_charging: bool) -> BatteryLevel {
    BatteryLevel {
        level: level.clamp(constants::MIN_BATTERY_LEVEL, constants::MAX_BATTERY_LEVEL),
        status: BatteryStatus::from_code(status_code),
        is_charging,
    }
}

/// Decode simulator settings. `cached_card` fills in the simulated card when
/// the backend does not report one.
pub fn translate_simulator_configuration(
    raw: RawSimulatorConfiguration,
    cached_card: Option<SimulatedCardType>,
) -> SimulatorConfiguration {
    let reported = raw.simulated_card.and_then(|name| match name.parse() {
        Ok(card) => Some(card),
        Err(e) => {
            warn!("Ignoring simulated card reported by backend: {}", e);
            None
        }
    });

    SimulatorConfiguration {
        available_reader_update: raw.available_reader_update,
        simulated_card: reported.or(cached_card),
    }
}
