use serde::Serialize;
use std::fmt;

/// Which process an error or event belongs to. `Flow` is the combined run driven by the
/// orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Process {
    Negotiation,
    Transfer,
    Flow,
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Process::Negotiation => f.write_str("negotiation"),
            Process::Transfer => f.write_str("transfer"),
            Process::Flow => f.write_str("flow"),
        }
    }
}

/// Failures of a single request issued by the transport client.
///
/// Cloneable so that the drivers can keep the last error in their observable status and
/// return it to the caller at the same time.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("{message}")]
    Remote { status: u16, message: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

impl TransportError {
    /// HTTP status code, when the remote answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors surfaced by the negotiation driver, the transfer driver and the flow orchestrator.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The initiating request failed. Never retried.
    #[error("failed to initiate {process}: {source}")]
    Initiation {
        process: Process,
        #[source]
        source: TransportError,
    },

    /// Status requests kept failing until the retry budget ran out.
    #[error("{process} polling failed after {attempts} attempts: {source}")]
    PollRetryExhausted {
        process: Process,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The protocol engine reported `TERMINATED`.
    #[error("{message}")]
    RemoteTermination { process: Process, message: String },

    #[error("{process} polling timeout - maximum attempts ({attempts}) reached")]
    PollTimeout { process: Process, attempts: u32 },

    /// Payload retrieval after a completed transfer failed on every attempt.
    #[error("failed to fetch transfer data after {attempts} attempts: {source}")]
    DataFetch {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("negotiation finalized without a contract agreement id")]
    MissingAgreement,

    #[error("{0} cancelled")]
    Cancelled(Process),
}

impl DriverError {
    /// Human-readable message suitable for direct display.
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DriverError::Cancelled(_))
    }

    /// Stable machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            DriverError::InvalidInput(_) => "invalid_input",
            DriverError::Initiation { .. } => "initiation",
            DriverError::PollRetryExhausted { .. } => "poll_retry_exhausted",
            DriverError::RemoteTermination { .. } => "remote_termination",
            DriverError::PollTimeout { .. } => "poll_timeout",
            DriverError::DataFetch { .. } => "data_fetch",
            DriverError::MissingAgreement => "missing_agreement",
            DriverError::Cancelled(_) => "cancelled",
        }
    }

    /// Remote HTTP status code behind this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            DriverError::Initiation { source, .. }
            | DriverError::PollRetryExhausted { source, .. }
            | DriverError::DataFetch { source, .. } => source.status(),
            _ => None,
        }
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Invalid client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("invalid base URL {url}: {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_termination_displays_the_remote_message() {
        let err = DriverError::RemoteTermination {
            process: Process::Negotiation,
            message: "Policy not satisfied".into(),
        };
        assert_eq!(err.message(), "Policy not satisfied");
    }

    #[test]
    fn status_is_exposed_for_remote_failures() {
        let err = DriverError::Initiation {
            process: Process::Transfer,
            source: TransportError::Remote {
                status: 404,
                message: "Asset not found".into(),
            },
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.message(), "failed to initiate transfer: Asset not found");
    }
}
