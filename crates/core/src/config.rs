//! Client runtime configuration and mode resolution.
//!
//! Configuration is resolved once at process startup and then passed into the backend and
//! drivers. Nothing in this crate reads environment variables while a negotiation or transfer
//! is running, which keeps behaviour consistent in multi-threaded runtimes and test harnesses.
//!
//! Mode resolution has no error path: an absent or unrecognised mode falls back to
//! [`OperatingMode::DirectMock`], which never talks to a live protocol engine.

use crate::constants::{
    API_MODE_ENV, DEFAULT_EDC_API_URL, DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_MOCK_API_URL,
    DEFAULT_POLL_INTERVAL, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY,
    EDC_API_URL_ENV, MAX_POLL_ATTEMPTS_ENV, MOCK_API_URL_ENV, POLL_INTERVAL_MS_ENV,
    REQUEST_TIMEOUT_MS_ENV, RETRY_ATTEMPTS_ENV, RETRY_DELAY_MS_ENV,
};
use crate::error::ConfigError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which backend the client talks to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperatingMode {
    /// Simulated responses, no protocol engine involved.
    #[default]
    DirectMock,
    /// Protocol-backed catalog and negotiation, mock data for payloads.
    Hybrid,
    /// Complete protocol flow including data-plane transfer.
    FullProtocol,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::DirectMock => "direct-mock",
            OperatingMode::Hybrid => "hybrid",
            OperatingMode::FullProtocol => "full-protocol",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            OperatingMode::DirectMock => "Mock mode: simulated negotiation and transfer",
            OperatingMode::Hybrid => "Hybrid mode: protocol engine metadata with mock data",
            OperatingMode::FullProtocol => "Full mode: complete protocol data flow",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for mode strings that name no known mode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised operating mode: {0}")]
pub struct UnknownMode(pub String);

impl FromStr for OperatingMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" | "direct-mock" | "direct_mock" => Ok(OperatingMode::DirectMock),
            "hybrid" => Ok(OperatingMode::Hybrid),
            "full" | "full-protocol" | "full_protocol" => Ok(OperatingMode::FullProtocol),
            _ => Err(UnknownMode(s.to_owned())),
        }
    }
}

/// Resolve the operating mode from an optional configuration value.
///
/// `None`, blank and unrecognised values all resolve to [`OperatingMode::DirectMock`].
pub fn mode_from_env_value(value: Option<String>) -> OperatingMode {
    let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) else {
        return OperatingMode::default();
    };

    match value.parse() {
        Ok(mode) => mode,
        Err(err) => {
            tracing::warn!("{err}; falling back to {}", OperatingMode::default());
            OperatingMode::default()
        }
    }
}

/// Pick the base URL that serves `mode`.
///
/// Hybrid and full-protocol both go through the protocol-backed endpoint.
pub fn base_url_for<'a>(mode: OperatingMode, mock_url: &'a str, edc_url: &'a str) -> &'a str {
    match mode {
        OperatingMode::DirectMock => mock_url,
        OperatingMode::Hybrid | OperatingMode::FullProtocol => edc_url,
    }
}

/// Polling and retry policy shared by the negotiation and transfer drivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSettings {
    /// Delay between successive status requests.
    pub poll_interval: Duration,
    /// Ceiling on non-terminal status responses before a polling timeout.
    pub max_poll_attempts: u32,
    /// Consecutive transient failures tolerated (also the data-fetch attempt budget).
    pub retry_attempts: u32,
    /// Base delay for retries; attempt `n` waits `retry_delay * n`.
    pub retry_delay: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl PollSettings {
    /// Linear backoff: the delay before retry number `attempt` (1-based).
    pub fn retry_delay_for(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_poll_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_poll_attempts must be at least 1".into(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Client configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    mode: OperatingMode,
    mock_api_url: String,
    edc_api_url: String,
    request_timeout: Duration,
    poll: PollSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::default(),
            mock_api_url: DEFAULT_MOCK_API_URL.into(),
            edc_api_url: DEFAULT_EDC_API_URL.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll: PollSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration for `mode` with explicit endpoints and default policy.
    pub fn new(mode: OperatingMode, mock_api_url: String, edc_api_url: String) -> Self {
        Self {
            mode,
            mock_api_url: non_blank_or(Some(mock_api_url), DEFAULT_MOCK_API_URL),
            edc_api_url: non_blank_or(Some(edc_api_url), DEFAULT_EDC_API_URL),
            ..Self::default()
        }
    }

    /// Resolve configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration from an arbitrary key lookup.
    ///
    /// Tests use this to avoid mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = PollSettings::default();
        let poll = PollSettings {
            poll_interval: millis_or(&lookup, POLL_INTERVAL_MS_ENV, defaults.poll_interval),
            max_poll_attempts: count_or(&lookup, MAX_POLL_ATTEMPTS_ENV, defaults.max_poll_attempts),
            retry_attempts: count_or(&lookup, RETRY_ATTEMPTS_ENV, defaults.retry_attempts),
            retry_delay: millis_or(&lookup, RETRY_DELAY_MS_ENV, defaults.retry_delay),
        };

        Self {
            mode: mode_from_env_value(lookup(API_MODE_ENV)),
            mock_api_url: non_blank_or(lookup(MOCK_API_URL_ENV), DEFAULT_MOCK_API_URL),
            edc_api_url: non_blank_or(lookup(EDC_API_URL_ENV), DEFAULT_EDC_API_URL),
            request_timeout: millis_or(&lookup, REQUEST_TIMEOUT_MS_ENV, DEFAULT_REQUEST_TIMEOUT),
            poll,
        }
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Base URL for the active mode.
    pub fn base_url(&self) -> &str {
        base_url_for(self.mode, &self.mock_api_url, &self.edc_api_url)
    }

    pub fn mock_api_url(&self) -> &str {
        &self.mock_api_url
    }

    pub fn edc_api_url(&self) -> &str {
        &self.edc_api_url
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn poll_settings(&self) -> PollSettings {
        self.poll
    }
}

fn non_blank_or(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_u64<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("ignoring {key}={raw:?}: not a non-negative integer");
            None
        }
    }
}

fn millis_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    parse_u64(lookup, key)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn count_or<F>(lookup: &F, key: &str, default: u32) -> u32
where
    F: Fn(&str) -> Option<String>,
{
    parse_u64(lookup, key)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn mode_defaults_to_direct_mock() {
        assert_eq!(mode_from_env_value(None), OperatingMode::DirectMock);
        assert_eq!(mode_from_env_value(Some("  ".into())), OperatingMode::DirectMock);
        assert_eq!(
            mode_from_env_value(Some("production".into())),
            OperatingMode::DirectMock
        );
    }

    #[test]
    fn mode_accepts_short_and_long_names() {
        assert_eq!(mode_from_env_value(Some("hybrid".into())), OperatingMode::Hybrid);
        assert_eq!(mode_from_env_value(Some("FULL".into())), OperatingMode::FullProtocol);
        assert_eq!(
            mode_from_env_value(Some("full-protocol".into())),
            OperatingMode::FullProtocol
        );
        assert_eq!(mode_from_env_value(Some("mock".into())), OperatingMode::DirectMock);
    }

    #[test]
    fn base_url_follows_mode() {
        let mock = "http://mock:3001";
        let edc = "http://edc:3002";
        assert_eq!(base_url_for(OperatingMode::DirectMock, mock, edc), mock);
        assert_eq!(base_url_for(OperatingMode::Hybrid, mock, edc), edc);
        assert_eq!(base_url_for(OperatingMode::FullProtocol, mock, edc), edc);
    }

    #[test]
    fn from_lookup_reads_all_keys() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            (API_MODE_ENV, "full"),
            (EDC_API_URL_ENV, "http://edc.example:9000"),
            (POLL_INTERVAL_MS_ENV, "250"),
            (MAX_POLL_ATTEMPTS_ENV, "5"),
            (RETRY_ATTEMPTS_ENV, "4"),
            (RETRY_DELAY_MS_ENV, "10"),
        ]));

        assert_eq!(config.mode(), OperatingMode::FullProtocol);
        assert_eq!(config.base_url(), "http://edc.example:9000");
        assert_eq!(config.mock_api_url(), DEFAULT_MOCK_API_URL);
        let poll = config.poll_settings();
        assert_eq!(poll.poll_interval, Duration::from_millis(250));
        assert_eq!(poll.max_poll_attempts, 5);
        assert_eq!(poll.retry_attempts, 4);
        assert_eq!(poll.retry_delay, Duration::from_millis(10));
    }

    #[test]
    fn from_lookup_falls_back_on_blank_and_invalid_values() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            (MOCK_API_URL_ENV, "   "),
            (POLL_INTERVAL_MS_ENV, "soon"),
            (MAX_POLL_ATTEMPTS_ENV, "-1"),
        ]));

        assert_eq!(config.mode(), OperatingMode::DirectMock);
        assert_eq!(config.base_url(), DEFAULT_MOCK_API_URL);
        assert_eq!(config.poll_settings(), PollSettings::default());
    }

    #[test]
    fn retry_delay_grows_linearly() {
        let poll = PollSettings {
            retry_delay: Duration::from_millis(100),
            ..PollSettings::default()
        };
        assert_eq!(poll.retry_delay_for(1), Duration::from_millis(100));
        assert_eq!(poll.retry_delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn validate_rejects_zero_budgets() {
        let poll = PollSettings {
            retry_attempts: 0,
            ..PollSettings::default()
        };
        assert!(poll.validate().is_err());
        assert!(PollSettings::default().validate().is_ok());
    }
}
