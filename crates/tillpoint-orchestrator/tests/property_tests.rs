//! Property-based tests for record normalization.
//!
//! Normalizing a record twice must give the same result as normalizing it
//! once, for any reader or payment intent shape a backend may report.

use proptest::prelude::*;
use serde_json::{Map, Value};
use tillpoint_core::{
    BatteryStatus, DeviceType, PaymentIntent, PaymentIntentStatus, Reader, constants,
};
use tillpoint_orchestrator::normalizer::{normalize_payment_intent, normalize_reader};

fn device_type() -> impl Strategy<Value = DeviceType> {
    prop_oneof![
        Just(DeviceType::Chipper2X),
        Just(DeviceType::WisePad3),
        Just(DeviceType::StripeM2),
        Just(DeviceType::WisePosE),
        Just(DeviceType::VerifoneP400),
        Just(DeviceType::CotsDevice),
        Just(DeviceType::Unknown),
    ]
}

/// Software versions, including the "unknown" sentinel.
fn software_version() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some(constants::UNKNOWN_SOFTWARE_VERSION.to_string())),
        "[0-9]\\.[0-9]{1,2}\\.[0-9]{1,2}".prop_map(Some),
    ]
}

/// Battery levels, including the zero sentinel.
fn battery_level() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        Just(None),
        Just(Some(constants::UNKNOWN_BATTERY_LEVEL)),
        (0.01f64..=1.0).prop_map(Some),
    ]
}

prop_compose! {
    fn reader()(
        serial in "[A-Z]{3}-[0-9]{1,6}",
        device_type in device_type(),
        software_version in software_version(),
        battery_level in battery_level(),
        is_charging in proptest::option::of(any::<bool>()),
        label in proptest::option::of("[a-z ]{1,12}"),
        simulated in any::<bool>(),
    ) -> Reader {
        let mut reader = Reader::new(serial, device_type);
        reader.software_version = software_version;
        reader.battery_level = battery_level;
        reader.battery_status = BatteryStatus::Unknown;
        reader.is_charging = is_charging;
        reader.label = label;
        reader.simulated = simulated;
        reader
    }
}

fn snake_key() -> impl Strategy<Value = String> {
    "[a-z]{1,6}(_[a-z0-9]{1,6}){0,2}"
}

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-z ]{0,10}".prop_map(Value::from),
        Just(Value::Null),
    ]
}

/// Nested object with snake_case keys, possibly holding a `metadata` map.
fn nested_object() -> impl Strategy<Value = Value> {
    let inner = prop::collection::btree_map(snake_key(), leaf(), 0..4)
        .prop_map(|map| Value::Object(map.into_iter().collect::<Map<_, _>>()));
    let value = prop_oneof![leaf(), inner];
    (
        prop::collection::btree_map(snake_key(), value, 0..5),
        proptest::option::of(prop::collection::btree_map(snake_key(), leaf(), 1..3)),
    )
        .prop_map(|(fields, metadata)| {
            let mut object: Map<String, Value> = fields.into_iter().collect();
            if let Some(metadata) = metadata {
                object.insert(
                    constants::METADATA_KEY.to_string(),
                    Value::Object(metadata.into_iter().collect()),
                );
            }
            Value::Object(object)
        })
}

/// A nested object, delivered either structured or JSON-encoded.
fn maybe_encoded() -> impl Strategy<Value = Value> {
    (nested_object(), any::<bool>()).prop_map(|(value, encoded)| {
        if encoded {
            Value::String(value.to_string())
        } else {
            value
        }
    })
}

prop_compose! {
    fn payment_intent()(
        amount in 1i64..1_000_000,
        amount_details in proptest::option::of(maybe_encoded()),
        payment_method in proptest::option::of(maybe_encoded()),
        charges in prop::collection::vec(maybe_encoded(), 0..3),
        metadata in prop::collection::btree_map(snake_key(), "[a-z]{1,8}", 0..4),
    ) -> PaymentIntent {
        let status = PaymentIntentStatus::RequiresPaymentMethod;
        let mut intent = PaymentIntent::new("pi_prop", status, amount, "usd");
        intent.amount_details = amount_details;
        intent.payment_method = payment_method;
        intent.charges = charges;
        intent.metadata = metadata;
        intent
    }
}

fn has_snake_key_outside_metadata(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.iter().any(|(key, value)| {
            key.contains('_')
                || (key != constants::METADATA_KEY && has_snake_key_outside_metadata(value))
        }),
        Value::Array(items) => items.iter().any(has_snake_key_outside_metadata),
        _ => false,
    }
}

proptest! {
    /// Property: normalizing a reader is idempotent.
    #[test]
    fn prop_reader_normalization_idempotent(reader in reader()) {
        let once = normalize_reader(reader);
        let twice = normalize_reader(once.clone());
        prop_assert_eq!(once, twice);
    }

    /// Property: sentinel values never survive normalization.
    #[test]
    fn prop_reader_sentinels_removed(reader in reader()) {
        let original = reader.clone();
        let normalized = normalize_reader(reader);

        prop_assert_ne!(normalized.battery_level, Some(constants::UNKNOWN_BATTERY_LEVEL));
        prop_assert_ne!(
            normalized.software_version.as_deref(),
            Some(constants::UNKNOWN_SOFTWARE_VERSION)
        );
        prop_assert_eq!(normalized.serial_number, original.serial_number);
        prop_assert_eq!(normalized.label, original.label);
    }

    /// Property: normalizing a payment intent is idempotent.
    #[test]
    fn prop_intent_normalization_idempotent(intent in payment_intent()) {
        let once = normalize_payment_intent(intent);
        let twice = normalize_payment_intent(once.clone());
        prop_assert_eq!(once, twice);
    }

    /// Property: encoded sub-objects are decoded and camel-cased, and the
    /// top-level metadata map is untouched.
    #[test]
    fn prop_intent_keys_camel_cased(intent in payment_intent()) {
        let metadata = intent.metadata.clone();
        let normalized = normalize_payment_intent(intent);

        prop_assert_eq!(&normalized.metadata, &metadata);
        for value in normalized
            .amount_details
            .iter()
            .chain(normalized.payment_method.iter())
            .chain(normalized.charges.iter())
        {
            prop_assert!(value.is_object());
            prop_assert!(!has_snake_key_outside_metadata(value));
        }
    }
}
