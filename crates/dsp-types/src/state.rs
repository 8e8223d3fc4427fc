//! Client-side view of the dataspace protocol state machines.
//!
//! The remote protocol engine owns the real state machines. The client only needs to
//! recognise the states it can observe, know which of them are terminal, and render a
//! human-readable label for progress displays.
//!
//! Wire names are the upper-case identifiers used by the protocol engine
//! (for example `REQUESTED`, `FINALIZED`). Parsing is case-insensitive.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a state string does not name a known state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {machine} state: {value}")]
pub struct StateParseError {
    pub machine: &'static str,
    pub value: String,
}

/// Behaviour shared by negotiation and transfer states.
///
/// The polling loop in `dsp-core` is generic over this trait so both drivers get the same
/// terminal-state handling.
pub trait ProtocolState: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Upper-case wire name, e.g. `FINALIZED`.
    fn as_str(&self) -> &'static str;

    /// Display label for step logs. States without a dedicated label use the wire name.
    fn label(&self) -> &'static str;

    /// Terminal states that count as success.
    fn is_success(&self) -> bool;

    /// Terminal states that count as failure.
    fn is_failure(&self) -> bool;

    fn is_terminal(&self) -> bool {
        self.is_success() || self.is_failure()
    }
}

/// Contract negotiation states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationState {
    #[default]
    Idle,
    Initial,
    Requesting,
    Requested,
    Offering,
    Offered,
    Accepting,
    Accepted,
    Agreeing,
    Agreed,
    Verifying,
    Verified,
    Finalizing,
    /// Agreement reached; terminal success.
    Finalized,
    Terminating,
    /// Negotiation failed; terminal failure.
    Terminated,
}

impl NegotiationState {
    pub const ALL: [NegotiationState; 16] = [
        Self::Idle,
        Self::Initial,
        Self::Requesting,
        Self::Requested,
        Self::Offering,
        Self::Offered,
        Self::Accepting,
        Self::Accepted,
        Self::Agreeing,
        Self::Agreed,
        Self::Verifying,
        Self::Verified,
        Self::Finalizing,
        Self::Finalized,
        Self::Terminating,
        Self::Terminated,
    ];
}

impl ProtocolState for NegotiationState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Initial => "INITIAL",
            Self::Requesting => "REQUESTING",
            Self::Requested => "REQUESTED",
            Self::Offering => "OFFERING",
            Self::Offered => "OFFERED",
            Self::Accepting => "ACCEPTING",
            Self::Accepted => "ACCEPTED",
            Self::Agreeing => "AGREEING",
            Self::Agreed => "AGREED",
            Self::Verifying => "VERIFYING",
            Self::Verified => "VERIFIED",
            Self::Finalizing => "FINALIZING",
            Self::Finalized => "FINALIZED",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Initial => "Initializing",
            Self::Requesting => "Requesting Contract",
            Self::Requested => "Contract Requested",
            Self::Offering => "Provider Offering",
            Self::Offered => "Offer Received",
            Self::Accepting => "Accepting Offer",
            Self::Accepted => "Offer Accepted",
            Self::Agreeing => "Finalizing Agreement",
            Self::Agreed => "Agreement Ready",
            Self::Verifying => "Verifying Credentials",
            Self::Verified => "Credentials Verified",
            Self::Finalizing => "Finalizing Contract",
            Self::Finalized => "Contract Finalized",
            Self::Terminated => "Negotiation Failed",
            Self::Idle | Self::Terminating => self.as_str(),
        }
    }

    fn is_success(&self) -> bool {
        matches!(self, Self::Finalized)
    }

    fn is_failure(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// Transfer process states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferState {
    #[default]
    Idle,
    Initial,
    Provisioning,
    Provisioned,
    Requesting,
    Requested,
    Starting,
    Started,
    Suspending,
    Suspended,
    Resuming,
    Completing,
    /// Data transferred; terminal success.
    Completed,
    Deprovisioning,
    /// Resources released. Treated as equivalent to `Completed` for data retrieval.
    Deprovisioned,
    Terminating,
    /// Transfer failed; terminal failure.
    Terminated,
}

impl TransferState {
    pub const ALL: [TransferState; 17] = [
        Self::Idle,
        Self::Initial,
        Self::Provisioning,
        Self::Provisioned,
        Self::Requesting,
        Self::Requested,
        Self::Starting,
        Self::Started,
        Self::Suspending,
        Self::Suspended,
        Self::Resuming,
        Self::Completing,
        Self::Completed,
        Self::Deprovisioning,
        Self::Deprovisioned,
        Self::Terminating,
        Self::Terminated,
    ];
}

impl ProtocolState for TransferState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Initial => "INITIAL",
            Self::Provisioning => "PROVISIONING",
            Self::Provisioned => "PROVISIONED",
            Self::Requesting => "REQUESTING",
            Self::Requested => "REQUESTED",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Suspending => "SUSPENDING",
            Self::Suspended => "SUSPENDED",
            Self::Resuming => "RESUMING",
            Self::Completing => "COMPLETING",
            Self::Completed => "COMPLETED",
            Self::Deprovisioning => "DEPROVISIONING",
            Self::Deprovisioned => "DEPROVISIONED",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Initial => "Initializing Transfer",
            Self::Provisioning => "Provisioning Resources",
            Self::Provisioned => "Resources Ready",
            Self::Requesting => "Requesting Data",
            Self::Requested => "Request Sent",
            Self::Starting => "Starting Transfer",
            Self::Started => "Transfer In Progress",
            Self::Completing => "Completing Transfer",
            Self::Completed => "Transfer Complete",
            Self::Deprovisioning => "Cleaning Up",
            Self::Deprovisioned => "Cleanup Complete",
            Self::Terminated => "Transfer Failed",
            Self::Idle | Self::Suspending | Self::Suspended | Self::Resuming | Self::Terminating => {
                self.as_str()
            }
        }
    }

    fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Deprovisioned)
    }

    fn is_failure(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

fn parse_state<S: ProtocolState>(
    all: &[S],
    machine: &'static str,
    input: &str,
) -> Result<S, StateParseError> {
    let trimmed = input.trim();
    all.iter()
        .copied()
        .find(|state| state.as_str().eq_ignore_ascii_case(trimmed))
        .ok_or_else(|| StateParseError {
            machine,
            value: input.to_owned(),
        })
}

impl FromStr for NegotiationState {
    type Err = StateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_state(&Self::ALL, "negotiation", s)
    }
}

impl FromStr for TransferState {
    type Err = StateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_state(&Self::ALL, "transfer", s)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
