//! Connection token bridge.
//!
//! Backends ask for a token by emitting
//! [`EventKind::RequestConnectionToken`](tillpoint_backend::EventKind) and
//! expect an answer through
//! [`TerminalBackend::set_connection_token`]. The host provides a plain
//! async fetcher. The bridge runs the fetcher once per request and answers
//! the backend that asked, tracking outstanding requests per backend so that
//! answering one never touches the other.

use crate::error::{Result, TerminalError};
use crate::selector::Backends;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tillpoint_backend::TerminalBackend;
use tillpoint_core::BackendId;
use tracing::{debug, info, warn};

/// Host callback producing a fresh connection token.
pub type TokenFetcher = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

/// Wrap an async closure as a [`TokenFetcher`].
///
/// ```
/// use tillpoint_orchestrator::token::token_fetcher;
///
/// let fetcher = token_fetcher(|| async { anyhow::Ok("pst_test_123".to_string()) });
/// ```
pub fn token_fetcher<F, Fut>(fetch: F) -> TokenFetcher
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    Arc::new(move || fetch().boxed())
}

/// Outcome of one fetch, as handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenResponse {
    Token(String),
    Error(String),
}

pub struct TokenBridge<B> {
    backends: Arc<Backends<B>>,
    fetcher: TokenFetcher,
    /// Outstanding requests per backend.
    pending: Mutex<HashMap<BackendId, usize>>,
}

impl<B: TerminalBackend> TokenBridge<B> {
    pub fn new(backends: Arc<Backends<B>>, fetcher: TokenFetcher) -> Self {
        Self {
            backends,
            fetcher,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Record a token request from `backend` and answer it in the background.
    pub fn on_token_requested(self: &Arc<Self>, backend: BackendId) {
        *self.lock_pending().entry(backend).or_default() += 1;
        debug!("{} backend requested a connection token", backend);

        let bridge = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let response = bridge.fetch().await;
                    bridge.submit_token(backend, response);
                });
            }
            Err(_) => {
                warn!("No async runtime to fetch a connection token on");
                bridge.submit_token(
                    backend,
                    TokenResponse::Error("No async runtime available".to_string()),
                );
            }
        }
    }

    /// Run the host fetcher once.
    pub async fn fetch(&self) -> TokenResponse {
        match checked_token((self.fetcher)().await) {
            Ok(token) => TokenResponse::Token(token),
            Err(e) => {
                warn!("{}", e);
                TokenResponse::Error(e.to_string())
            }
        }
    }

    /// Deliver `response` to `backend` if it has a request outstanding.
    ///
    /// Returns whether a request was answered.
    pub fn submit_token(&self, backend: BackendId, response: TokenResponse) -> bool {
        {
            let mut pending = self.lock_pending();
            match pending.get_mut(&backend) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    if *count == 0 {
                        pending.remove(&backend);
                    }
                }
                _ => {
                    debug!("Dropping token for {} backend: nothing requested", backend);
                    return false;
                }
            }
        }

        let Some(target) = self.backends.get(backend) else {
            warn!("Token requested by unavailable {} backend", backend);
            return false;
        };

        let result = match response {
            TokenResponse::Token(token) => {
                info!("Delivering connection token to {} backend", backend);
                target.set_connection_token(Some(token), None)
            }
            TokenResponse::Error(message) => target.set_connection_token(None, Some(message)),
        };

        if let Err(e) = result {
            warn!("{} backend rejected connection token: {}", backend, e);
        }
        true
    }

    /// Whether `backend` is waiting for a token.
    pub fn is_pending(&self, backend: BackendId) -> bool {
        self.lock_pending().contains_key(&backend)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<BackendId, usize>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An empty token counts as a failed fetch.
fn checked_token(result: anyhow::Result<String>) -> Result<String> {
    match result {
        Ok(token) if token.is_empty() => Err(TerminalError::TokenFetch(
            "fetcher returned an empty token".to_string(),
        )),
        Ok(token) => Ok(token),
        Err(e) => Err(TerminalError::TokenFetch(format!("{:#}", e))),
    }
}
