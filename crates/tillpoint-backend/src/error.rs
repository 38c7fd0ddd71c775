//! Error type for backend calls.
//!
//! A backend rejects a call with a message, an optional machine-readable
//! code, and, for payment failures, an optional decline code and the payment
//! intent the backend was working on.

use tillpoint_core::PaymentIntent;

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Structured rejection from a reader SDK backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    /// Human-readable message from the backend.
    pub message: String,

    /// Backend error code, if any.
    pub code: Option<String>,

    /// Card network decline code for payment failures.
    pub decline_code: Option<String>,

    /// Payment intent echoed back with a payment failure.
    pub payment_intent: Option<Box<PaymentIntent>>,
}

impl BackendError {
    /// Create an error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            decline_code: None,
            payment_intent: None,
        }
    }

    /// Error returned when an in-flight operation was cancelled.
    pub fn canceled() -> Self {
        Self::new("The operation was canceled.").with_code("canceled")
    }

    /// Error returned when the backend does not implement an operation.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::new(format!("{} is not supported by this backend", operation.into()))
            .with_code("unsupported")
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_decline_code(mut self, decline_code: impl Into<String>) -> Self {
        self.decline_code = Some(decline_code.into());
        self
    }

    pub fn with_payment_intent(mut self, intent: PaymentIntent) -> Self {
        self.payment_intent = Some(Box::new(intent));
        self
    }

    /// Check whether this error reports a cancellation.
    pub fn is_canceled(&self) -> bool {
        self.code.as_deref() == Some("canceled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillpoint_core::PaymentIntentStatus;

    #[test]
    fn test_message_only() {
        let error = BackendError::new("Reader busy");
        assert_eq!(error.to_string(), "Reader busy");
        assert_eq!(error.code, None);
        assert!(!error.is_canceled());
    }

    #[test]
    fn test_canceled() {
        let error = BackendError::canceled();
        assert!(error.is_canceled());
        assert_eq!(error.code.as_deref(), Some("canceled"));
    }

    #[test]
    fn test_unsupported() {
        let error = BackendError::unsupported("connect_bluetooth_reader");
        assert_eq!(
            error.to_string(),
            "connect_bluetooth_reader is not supported by this backend"
        );
    }

    #[test]
    fn test_payment_failure_details() {
        let intent = PaymentIntent::new("pi_9", PaymentIntentStatus::RequiresPaymentMethod, 500, "eur");
        let error = BackendError::new("Your card was declined.")
            .with_code("card_declined")
            .with_decline_code("insufficient_funds")
            .with_payment_intent(intent);

        assert_eq!(error.decline_code.as_deref(), Some("insufficient_funds"));
        assert_eq!(error.payment_intent.as_ref().map(|pi| pi.id.as_str()), Some("pi_9"));
    }
}
