//! Terminal configuration.
//!
//! Values start from [`TerminalConfig::default`], may be overridden in code
//! with the `with_*` setters, and finally from the environment with
//! [`TerminalConfig::from_env`].

use crate::error::{Result, TerminalError};
use std::env;
use tracing::warn;

pub const ENV_NETWORK_BACKEND: &str = "TILLPOINT_NETWORK_BACKEND";
pub const ENV_EVENT_BUFFER: &str = "TILLPOINT_EVENT_BUFFER";
pub const ENV_LOG: &str = "TILLPOINT_LOG";

pub const DEFAULT_EVENT_BUFFER: usize = 64;
pub const DEFAULT_LOG_FILTER: &str = "tillpoint=info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalConfig {
    /// Whether the network backend is usable in this embedding. When false
    /// the native backend stays active whatever was selected.
    pub network_backend_enabled: bool,

    /// Capacity of each stream's event queue.
    pub event_buffer: usize,

    /// Default filter directive for [`crate::logging::init`].
    pub log_filter: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            network_backend_enabled: true,
            event_buffer: DEFAULT_EVENT_BUFFER,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl TerminalConfig {
    pub fn with_network_backend(mut self, enabled: bool) -> Self {
        self.network_backend_enabled = enabled;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Override fields from `TILLPOINT_*` environment variables.
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn from_env(mut self) -> Self {
        if let Ok(value) = env::var(ENV_NETWORK_BACKEND) {
            match parse_bool(&value) {
                Some(enabled) => self.network_backend_enabled = enabled,
                None => warn!("Ignoring {}={}: expected a boolean", ENV_NETWORK_BACKEND, value),
            }
        }

        if let Ok(value) = env::var(ENV_EVENT_BUFFER) {
            match value.trim().parse::<usize>() {
                Ok(capacity) => self.event_buffer = capacity,
                Err(e) => warn!("Ignoring {}={}: {}", ENV_EVENT_BUFFER, value, e),
            }
        }

        if let Ok(filter) = env::var(ENV_LOG) {
            self.log_filter = filter;
        }

        self
    }

    /// Install the global subscriber with this config's filter as default.
    pub fn init_logging(&self) {
        crate::logging::init(&self.log_filter);
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 {
            return Err(TerminalError::config("event buffer must be greater than zero"));
        }
        if self.log_filter.trim().is_empty() {
            return Err(TerminalError::config("log filter must not be empty"));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = TerminalConfig::default();
        assert!(config.network_backend_enabled);
        assert_eq!(config.event_buffer, 64);
        assert_eq!(config.log_filter, "tillpoint=info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_event_buffer_rejected() {
        let config = TerminalConfig::default().with_event_buffer(0);
        assert_eq!(
            config.validate(),
            Err(TerminalError::config("event buffer must be greater than zero"))
        );
    }

    #[test]
    fn test_empty_log_filter_rejected() {
        assert!(TerminalConfig::default().with_log_filter(" ").validate().is_err());
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        let config = TerminalConfig::default().with_log_filter("tillpoint=trace");
        config.init_logging();
        config.init_logging();
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case("true", Some(true))]
    #[case("ON", Some(true))]
    #[case("1", Some(true))]
    #[case("no", Some(false))]
    #[case(" 0 ", Some(false))]
    #[case("maybe", None)]
    fn test_parse_bool(#[case] input: &str, #[case] expected: Option<bool>) {
        assert_eq!(parse_bool(input), expected);
    }
}
