use thiserror::Error;
use tillpoint_backend::BackendError;
use tillpoint_core::PaymentIntent;

pub type Result<T> = std::result::Result<T, TerminalError>;

/// Errors surfaced to the host application.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TerminalError {
    /// A call arrived before `initialize` completed.
    #[error("Terminal is not initialized. Call initialize() or create() first")]
    NotInitialized,

    /// A backend rejected the call. Passed through unmodified.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Processing a payment failed.
    #[error("Payment processing failed: {message}")]
    PaymentProcessing {
        message: String,
        decline_code: Option<String>,
        payment_intent: Option<Box<PaymentIntent>>,
    },

    /// The serial number is not among the last discovered readers.
    #[error("No reader found with serial number {serial_number}")]
    ReaderNotFound { serial_number: String },

    #[error("A reader discovery is already in progress")]
    DiscoveryInProgress,

    #[error("Failed to fetch connection token: {0}")]
    TokenFetch(String),

    /// A backend reported a code or payload that could not be decoded.
    #[error("Unrecognized backend value: {0}")]
    Decode(#[from] tillpoint_core::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl TerminalError {
    pub fn reader_not_found(serial_number: impl Into<String>) -> Self {
        Self::ReaderNotFound {
            serial_number: serial_number.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Decline code of a payment failure, if any.
    pub fn decline_code(&self) -> Option<&str> {
        match self {
            Self::PaymentProcessing { decline_code, .. } => decline_code.as_deref(),
            Self::Backend(error) => error.decline_code.as_deref(),
            _ => None,
        }
    }
}
