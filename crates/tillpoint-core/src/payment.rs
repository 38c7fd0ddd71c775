//! Payment, location and simulator records.
//!
//! The orchestrator treats these as opaque values it passes between the host
//! and the backends. Nested objects that carry card or charge details are
//! kept as [`serde_json::Value`] so that nothing here interprets them.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Lifecycle of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresCapture,
    Processing,
    Canceled,
    Succeeded,
}

impl PaymentIntentStatus {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::RequiresPaymentMethod),
            1 => Ok(Self::RequiresConfirmation),
            2 => Ok(Self::RequiresCapture),
            3 => Ok(Self::Processing),
            4 => Ok(Self::Canceled),
            5 => Ok(Self::Succeeded),
            other => Err(Error::unknown_code("payment intent status", other)),
        }
    }

    /// Whether the intent can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Succeeded)
    }
}

/// A payment intent as last returned by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,

    pub created: DateTime<Utc>,

    pub status: PaymentIntentStatus,

    /// Amount in the smallest currency unit.
    pub amount: i64,

    pub currency: String,

    pub amount_tip: Option<i64>,

    pub statement_descriptor: Option<String>,

    /// Amount breakdown. Some backends deliver this as a JSON-encoded string.
    pub amount_details: Option<Value>,

    /// Payment method snapshot. Some backends deliver this as a
    /// JSON-encoded string.
    pub payment_method: Option<Value>,

    /// Charges, each possibly JSON-encoded.
    pub charges: Vec<Value>,

    /// Free-form user metadata. Keys are never rewritten.
    pub metadata: BTreeMap<String, String>,
}

impl PaymentIntent {
    pub fn new(
        id: impl Into<String>,
        status: PaymentIntentStatus,
        amount: i64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            created: Utc::now(),
            status,
            amount,
            currency: currency.into(),
            amount_tip: None,
            statement_descriptor: None,
            amount_details: None,
            payment_method: None,
            charges: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One line on the reader's cart display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineItem {
    pub display_name: String,
    pub quantity: u32,
    pub amount: i64,
}

/// Cart shown on the reader display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub currency: String,
    pub tax: i64,
    pub total: i64,
    pub line_items: Vec<CartLineItem>,
}

/// Options for collecting a payment method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectConfig {
    pub update_payment_intent: bool,
    pub skip_tipping: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub city: Option<String>,
    pub country: Option<String>,
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub postal_code: Option<String>,
    pub state: Option<String>,
}

/// A business location readers can be registered to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub display_name: Option<String>,
    pub livemode: bool,
    pub address: Option<Address>,
    pub metadata: BTreeMap<String, String>,
}

impl Location {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            livemode: false,
            address: None,
            metadata: BTreeMap::new(),
        }
    }
}

/// Pagination parameters for location listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListLocationsParameters {
    pub limit: Option<u32>,
    pub ending_before: Option<String>,
    pub starting_after: Option<String>,
}

/// One page of locations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationList {
    pub locations: Vec<Location>,
    pub has_more: bool,
}

/// Test card the simulated reader presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedCardType {
    Visa,
    VisaDebit,
    Mastercard,
    MasterDebit,
    MastercardPrepaid,
    Amex,
    Amex2,
    Discover,
    Discover2,
    Diners,
    Diners14Digit,
    Jcb,
    UnionPay,
    Interac,
    ChargeDeclined,
    ChargeDeclinedInsufficientFunds,
    ChargeDeclinedLostCard,
    ChargeDeclinedStolenCard,
    ChargeDeclinedExpiredCard,
    ChargeDeclinedProcessingError,
    RefundFailed,
}

impl SimulatedCardType {
    /// Name backends use when they report the card type as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Visa => "visa",
            Self::VisaDebit => "visa_debit",
            Self::Mastercard => "mastercard",
            Self::MasterDebit => "mastercard_debit",
            Self::MastercardPrepaid => "mastercard_prepaid",
            Self::Amex => "amex",
            Self::Amex2 => "amex2",
            Self::Discover => "discover",
            Self::Discover2 => "discover2",
            Self::Diners => "diners",
            Self::Diners14Digit => "diners_14digits",
            Self::Jcb => "jcb",
            Self::UnionPay => "unionpay",
            Self::Interac => "interac",
            Self::ChargeDeclined => "charge_declined",
            Self::ChargeDeclinedInsufficientFunds => "charge_declined_insufficient_funds",
            Self::ChargeDeclinedLostCard => "charge_declined_lost_card",
            Self::ChargeDeclinedStolenCard => "charge_declined_stolen_card",
            Self::ChargeDeclinedExpiredCard => "charge_declined_expired_card",
            Self::ChargeDeclinedProcessingError => "charge_declined_processing_error",
            Self::RefundFailed => "refund_fail",
        }
    }

    const ALL: [SimulatedCardType; 21] = [
        Self::Visa,
        Self::VisaDebit,
        Self::Mastercard,
        Self::MasterDebit,
        Self::MastercardPrepaid,
        Self::Amex,
        Self::Amex2,
        Self::Discover,
        Self::Discover2,
        Self::Diners,
        Self::Diners14Digit,
        Self::Jcb,
        Self::UnionPay,
        Self::Interac,
        Self::ChargeDeclined,
        Self::ChargeDeclinedInsufficientFunds,
        Self::ChargeDeclinedLostCard,
        Self::ChargeDeclinedStolenCard,
        Self::ChargeDeclinedExpiredCard,
        Self::ChargeDeclinedProcessingError,
        Self::RefundFailed,
    ];
}

impl FromStr for SimulatedCardType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|card| card.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::unknown_name("simulated card type", s))
    }
}

/// Whether the simulated reader advertises a software update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulateReaderUpdate {
    Available,
    None,
    Required,
    Random,
}

/// Behaviour of simulated readers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorConfiguration {
    pub available_reader_update: Option<SimulateReaderUpdate>,
    pub simulated_card: Option<SimulatedCardType>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("visa", SimulatedCardType::Visa)]
    #[case("mastercard_debit", SimulatedCardType::MasterDebit)]
    #[case("diners_14digits", SimulatedCardType::Diners14Digit)]
    #[case(" refund_fail ", SimulatedCardType::RefundFailed)]
    #[case("VISA", SimulatedCardType::Visa)]
    fn test_simulated_card_from_name(#[case] input: &str, #[case] expected: SimulatedCardType) {
        assert_eq!(input.parse::<SimulatedCardType>().unwrap(), expected);
    }

    #[test]
    fn test_simulated_card_unknown_name() {
        let err = "solid_gold".parse::<SimulatedCardType>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown simulated card type name: solid_gold");
    }

    #[test]
    fn test_simulated_card_names_roundtrip() {
        for card in SimulatedCardType::ALL {
            assert_eq!(card.name().parse::<SimulatedCardType>().unwrap(), card);
        }
    }

    #[test]
    fn test_payment_intent_status_terminal() {
        assert!(PaymentIntentStatus::Succeeded.is_terminal());
        assert!(PaymentIntentStatus::Canceled.is_terminal());
        assert!(!PaymentIntentStatus::RequiresCapture.is_terminal());
        assert!(PaymentIntentStatus::from_code(9).is_err());
    }

    #[test]
    fn test_payment_intent_builder() {
        let intent = PaymentIntent::new("pi_1", PaymentIntentStatus::RequiresPaymentMethod, 1250, "usd")
            .with_metadata("orderId", "A-17");

        assert_eq!(intent.amount, 1250);
        assert_eq!(intent.metadata.get("orderId").map(String::as_str), Some("A-17"));
        assert!(intent.charges.is_empty());
    }
}
