//! # DSP Core
//!
//! Client-side orchestration for the dataspace protocol demo.
//!
//! This crate drives remote protocol state machines to completion:
//! - Mode resolution and client configuration (`config`)
//! - Backend strategies selected once per mode (`backend`) over an HTTP transport (`transport`)
//! - Contract negotiation and transfer drivers with polling, backoff and cancellation
//!   (`negotiation`, `transfer`)
//! - The combined end-to-end flow (`flow`)
//!
//! **No process concerns**: reading `.env` files, installing a tracing subscriber and
//! signal handling belong in the `ehr-dsp-run` binary.

pub mod backend;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod flow;
pub mod negotiation;
pub(crate) mod poller;
pub(crate) mod session;
pub mod step_log;
pub mod transfer;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use backend::{connect, DataspaceApi, HttpBackend, MockBackend};
pub use config::{ClientConfig, OperatingMode, PollSettings};
pub use error::{ConfigError, DriverError, DriverResult, Process, TransportError, TransportResult};
pub use events::{ProtocolEvent, ProtocolEventLog};
pub use flow::{ErrorInfo, FlowOrchestrator, FlowResult, FlowSnapshot, FlowState};
pub use negotiation::{NegotiationDriver, NegotiationHandle, NegotiationStatus};
pub use step_log::{StepEntry, StepLog, StepObserver};
pub use transfer::{TransferDriver, TransferHandle, TransferOutcome, TransferStatus};
pub use transport::TransportClient;

pub use dsp_types::{NegotiationState, ProtocolState, TransferState};
