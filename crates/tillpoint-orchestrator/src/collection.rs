//! Payment collection.
//!
//! Only one `collect_payment_method` may be in flight. A second call while
//! one is running resolves to `None` without touching the backend. While the
//! gate is held, reader display updates are skipped.

use crate::error::{Result, TerminalError};
use crate::normalizer::{normalize_payment_intent, translate_payment_status};
use crate::selector::Backends;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tillpoint_backend::TerminalBackend;
use tillpoint_core::{Cart, CollectConfig, PaymentIntent, PaymentStatus};
use tracing::{debug, info, warn};

/// Flag marking a collection in progress.
#[derive(Debug, Default)]
pub struct PaymentGate {
    collecting: AtomicBool,
}

impl PaymentGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the gate, or `None` if a collection already holds it.
    pub fn try_acquire(&self) -> Option<CollectGuard<'_>> {
        self.collecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CollectGuard { gate: self })
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::Acquire)
    }
}

/// Releases the gate when dropped.
#[must_use]
pub struct CollectGuard<'a> {
    gate: &'a PaymentGate,
}

impl Drop for CollectGuard<'_> {
    fn drop(&mut self) {
        self.gate.collecting.store(false, Ordering::Release);
    }
}

pub struct PaymentCollector<B> {
    backends: Arc<Backends<B>>,
    gate: PaymentGate,
    initialized: Arc<AtomicBool>,
    last_intent: Mutex<Option<PaymentIntent>>,
}

impl<B: TerminalBackend> PaymentCollector<B> {
    pub fn new(backends: Arc<Backends<B>>, initialized: Arc<AtomicBool>) -> Self {
        Self {
            backends,
            gate: PaymentGate::new(),
            initialized,
            last_intent: Mutex::new(None),
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.gate.is_collecting()
    }

    /// Collect a payment method on the active backend.
    ///
    /// Returns `Ok(None)` when another collection is already running.
    pub async fn collect_payment_method(
        &self,
        config: Option<CollectConfig>,
    ) -> Result<Option<PaymentIntent>> {
        let Some(_guard) = self.gate.try_acquire() else {
            info!("Payment method collection already in progress");
            return Ok(None);
        };

        if !self.initialized.load(Ordering::Acquire) {
            return Err(TerminalError::NotInitialized);
        }

        let backend = self.backends.active();
        debug!("Collecting payment method on {} backend", backend.id());
        let intent = backend.collect_payment_method(config).await?;

        Ok(Some(self.remember(normalize_payment_intent(intent))))
    }

    pub async fn cancel_collect_payment_method(&self) -> Result<()> {
        info!("Cancelling payment method collection");
        self.backends.active().cancel_collect_payment_method().await?;
        Ok(())
    }

    pub async fn retrieve_payment_intent(&self, client_secret: String) -> Result<PaymentIntent> {
        let intent = self
            .backends
            .active()
            .retrieve_payment_intent(client_secret)
            .await?;
        Ok(self.remember(normalize_payment_intent(intent)))
    }

    /// Process the collected payment. Backend failures are reported as
    /// [`TerminalError::PaymentProcessing`] with the normalized intent.
    pub async fn process_payment(&self) -> Result<PaymentIntent> {
        match self.backends.active().process_payment().await {
            Ok(intent) => {
                let intent = self.remember(normalize_payment_intent(intent));
                info!("Processed payment {} ({:?})", intent.id, intent.status);
                Ok(intent)
            }
            Err(e) => {
                warn!(
                    "Payment processing failed: {} (decline code {:?})",
                    e.message, e.decline_code
                );
                let payment_intent = e
                    .payment_intent
                    .map(|intent| Box::new(self.remember(normalize_payment_intent(*intent))));
                Err(TerminalError::PaymentProcessing {
                    message: e.message,
                    decline_code: e.decline_code,
                    payment_intent,
                })
            }
        }
    }

    pub async fn clear_cached_credentials(&self) -> Result<()> {
        self.backends.active().clear_cached_credentials().await?;
        Ok(())
    }

    /// Show `cart` on the reader, unless a collection owns the display.
    pub async fn set_reader_display(&self, cart: Cart) -> Result<()> {
        if self.gate.is_collecting() {
            debug!("Skipping reader display update during collection");
            return Ok(());
        }
        self.backends.active().set_reader_display(cart).await?;
        Ok(())
    }

    pub async fn clear_reader_display(&self) -> Result<()> {
        if self.gate.is_collecting() {
            debug!("Skipping reader display clear during collection");
            return Ok(());
        }
        self.backends.active().clear_reader_display().await?;
        Ok(())
    }

    pub async fn get_payment_status(&self) -> Result<PaymentStatus> {
        let code = self.backends.active().get_payment_status().await?;
        Ok(translate_payment_status(code)?)
    }

    /// Last intent returned by any payment call.
    pub fn last_payment_intent(&self) -> Option<PaymentIntent> {
        self.last_intent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember(&self, intent: PaymentIntent) -> PaymentIntent {
        *self.last_intent.lock().unwrap_or_else(PoisonError::into_inner) = Some(intent.clone());
        intent
    }
}
