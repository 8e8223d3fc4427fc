//! Constants used throughout the dataspace core crate.
//!
//! Environment keys, default endpoints and default polling policy live here so the
//! configuration layer and the tests agree on them.

use std::time::Duration;

/// Environment key selecting the operating mode.
pub const API_MODE_ENV: &str = "API_MODE";

/// Environment key for the base URL used in direct-mock mode.
pub const MOCK_API_URL_ENV: &str = "MOCK_API_URL";

/// Environment key for the base URL used in hybrid and full-protocol modes.
pub const EDC_API_URL_ENV: &str = "EDC_API_URL";

pub const POLL_INTERVAL_MS_ENV: &str = "POLL_INTERVAL_MS";
pub const MAX_POLL_ATTEMPTS_ENV: &str = "MAX_POLL_ATTEMPTS";
pub const RETRY_ATTEMPTS_ENV: &str = "RETRY_ATTEMPTS";
pub const RETRY_DELAY_MS_ENV: &str = "RETRY_DELAY_MS";
pub const REQUEST_TIMEOUT_MS_ENV: &str = "REQUEST_TIMEOUT_MS";

/// Default mock backend endpoint.
pub const DEFAULT_MOCK_API_URL: &str = "http://localhost:3001";

/// Default protocol-backed endpoint (hybrid and full-protocol).
pub const DEFAULT_EDC_API_URL: &str = "http://localhost:3002";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 30;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of protocol events retained by an event log.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 256;

/// Resource path segments of the backend API.
pub(crate) const API_SEGMENT: &str = "api";
pub(crate) const NEGOTIATIONS_SEGMENT: &str = "negotiations";
pub(crate) const TRANSFERS_SEGMENT: &str = "transfers";
pub(crate) const DATA_SEGMENT: &str = "data";
pub(crate) const HEALTH_SEGMENT: &str = "health";
pub(crate) const MODE_SEGMENT: &str = "mode";

/// Fallback messages when the remote terminates without explaining why.
pub(crate) const NEGOTIATION_TERMINATED_MESSAGE: &str = "negotiation terminated";
pub(crate) const TRANSFER_TERMINATED_MESSAGE: &str = "transfer terminated";
pub(crate) const FLOW_TERMINATED_MESSAGE: &str = "flow terminated";
