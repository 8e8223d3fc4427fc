//! End-to-end flow: negotiate a contract, transfer the asset, return the payload.
//!
//! The orchestrator owns one [`NegotiationDriver`] and one [`TransferDriver`] and only talks
//! to them through their public operations. Each driver reports its transitions into its
//! own [`StepLog`], and both share a [`ProtocolEventLog`].
//!
//! Combined state machine:
//!
//! ```text
//! Idle -> Negotiating -> NegotiationComplete -> Transferring -> TransferComplete -> Complete
//!              \                                     \
//!               +-> Error                             +-> Error
//! ```

use crate::backend::{connect, DataspaceApi};
use crate::config::{ClientConfig, PollSettings};
use crate::error::{ConfigError, DriverError, DriverResult, Process};
use crate::events::ProtocolEventLog;
use crate::negotiation::NegotiationDriver;
use crate::session::{race, Session};
use crate::step_log::{StepEntry, StepLog};
use crate::transfer::TransferDriver;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    #[default]
    Idle,
    Negotiating,
    NegotiationComplete,
    Transferring,
    TransferComplete,
    Complete,
    Error,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Complete | FlowState::Error)
    }
}

/// Displayable summary of a [`DriverError`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
    /// HTTP status of the remote failure, when there was one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl From<&DriverError> for ErrorInfo {
    fn from(err: &DriverError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.message(),
            status: err.status(),
        }
    }
}

/// Outcome of one [`FlowOrchestrator::run_full_flow`] call.
///
/// On failure the identifiers obtained before the failing stage are still filled in.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowResult {
    pub ehr_data: Option<Value>,
    pub contract_agreement_id: Option<String>,
    pub transfer_id: Option<String>,
    pub error: Option<ErrorInfo>,
}

impl FlowResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.ehr_data.is_some()
    }
}

/// Observable state of a [`FlowOrchestrator`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlowSnapshot {
    pub flow_state: FlowState,
    pub result: Option<FlowResult>,
}

pub struct FlowOrchestrator {
    negotiation: NegotiationDriver,
    transfer: TransferDriver,
    negotiation_steps: StepLog,
    transfer_steps: StepLog,
    session: Session<FlowSnapshot>,
    events: ProtocolEventLog,
}

impl FlowOrchestrator {
    pub fn new(api: Arc<dyn DataspaceApi>, settings: PollSettings) -> Self {
        Self::with_event_log(api, settings, ProtocolEventLog::new())
    }

    /// Build an orchestrator whose drivers record into `events`.
    pub fn with_event_log(
        api: Arc<dyn DataspaceApi>,
        settings: PollSettings,
        events: ProtocolEventLog,
    ) -> Self {
        let negotiation_steps = StepLog::new();
        let transfer_steps = StepLog::new();

        let negotiation = NegotiationDriver::new(api.clone(), settings)
            .with_observer(Arc::new(negotiation_steps.clone()))
            .with_event_log(events.clone());
        let transfer = TransferDriver::new(api, settings)
            .with_observer(Arc::new(transfer_steps.clone()))
            .with_event_log(events.clone());

        Self {
            negotiation,
            transfer,
            negotiation_steps,
            transfer_steps,
            session: Session::new(Process::Flow),
            events,
        }
    }

    /// Connect to the backend selected by `config` and build an orchestrator for it.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let api = connect(config)?;
        Ok(Self::new(api, config.poll_settings()))
    }

    pub fn status(&self) -> FlowSnapshot {
        self.session.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlowSnapshot> {
        self.session.subscribe()
    }

    pub fn flow_state(&self) -> FlowState {
        self.status().flow_state
    }

    pub fn result(&self) -> Option<FlowResult> {
        self.status().result
    }

    pub fn negotiation_steps(&self) -> Vec<StepEntry> {
        self.negotiation_steps.entries()
    }

    pub fn transfer_steps(&self) -> Vec<StepEntry> {
        self.transfer_steps.entries()
    }

    pub fn negotiation(&self) -> &NegotiationDriver {
        &self.negotiation
    }

    pub fn transfer(&self) -> &TransferDriver {
        &self.transfer
    }

    pub fn events(&self) -> &ProtocolEventLog {
        &self.events
    }

    /// Negotiate access to `asset_id`, transfer it and return the payload.
    ///
    /// `offer_id` defaults to the asset id. Never fails: errors are reported in
    /// [`FlowResult::error`] and the flow halts at the first one, so a failed negotiation
    /// never starts a transfer.
    pub async fn run_full_flow(
        &self,
        asset_id: &str,
        offer_id: Option<&str>,
        policy_id: Option<&str>,
    ) -> FlowResult {
        let token = self.session.begin();
        self.negotiation.reset();
        self.transfer.reset();
        self.negotiation_steps.clear();
        self.transfer_steps.clear();

        let offer_id = offer_id
            .filter(|offer| !offer.trim().is_empty())
            .unwrap_or(asset_id);

        let mut result = FlowResult::default();
        let Err(err) = self
            .drive(&token, &mut result, asset_id, offer_id, policy_id)
            .await
        else {
            tracing::info!(
                asset_id,
                agreement_id = result.contract_agreement_id.as_deref().unwrap_or("-"),
                transfer_id = result.transfer_id.as_deref().unwrap_or("-"),
                "flow complete"
            );
            return result;
        };

        result.ehr_data = None;
        result.error = Some(ErrorInfo::from(&err));

        // A driver cancelled on its own leaves the flow idle. A cancelled or superseded flow
        // token rejects the update and the status belongs to whoever cancelled it.
        let stored = self.session.update(&token, None, |status| {
            if err.is_cancelled() {
                status.flow_state = FlowState::Idle;
            } else {
                status.flow_state = FlowState::Error;
                status.result = Some(result.clone());
            }
        });
        match stored {
            Ok(()) if !err.is_cancelled() => {
                tracing::error!(asset_id, kind = err.kind(), "flow failed: {err}");
            }
            Ok(()) => tracing::debug!(asset_id, "flow cancelled: {err}"),
            Err(_) => tracing::debug!(asset_id, "flow cancelled before it finished: {err}"),
        }
        result
    }

    /// Cancel the flow and whichever driver is running. Safe to call at any time.
    pub fn cancel(&self) {
        self.session
            .cancel(|status| status.flow_state = FlowState::Idle);
        if self.negotiation.is_active() {
            self.negotiation.cancel();
        }
        if self.transfer.is_active() {
            self.transfer.cancel();
        }
    }

    /// Cancel and clear both drivers, both step logs and the last result.
    pub fn reset(&self) {
        self.session.cancel(|status| *status = FlowSnapshot::default());
        self.negotiation.reset();
        self.transfer.reset();
        self.negotiation_steps.clear();
        self.transfer_steps.clear();
    }

    async fn drive(
        &self,
        token: &CancellationToken,
        result: &mut FlowResult,
        asset_id: &str,
        offer_id: &str,
        policy_id: Option<&str>,
    ) -> DriverResult<()> {
        self.session.update(token, None, |status| {
            *status = FlowSnapshot {
                flow_state: FlowState::Negotiating,
                result: None,
            };
        })?;

        // Only the flow token is raced here. The drivers' own runs are cancelled by
        // `cancel` and superseded by the next `run_full_flow`, never by a stale run.
        let handle = race(
            token,
            Process::Flow,
            self.negotiation.initiate(asset_id, offer_id, policy_id),
        )
        .await??;

        let agreement = handle
            .contract_agreement_id
            .ok_or(DriverError::MissingAgreement)?;
        result.contract_agreement_id = Some(agreement.clone());
        self.advance(token, FlowState::NegotiationComplete)?;
        self.advance(token, FlowState::Transferring)?;

        let outcome = match race(
            token,
            Process::Flow,
            self.transfer.initiate(&agreement, asset_id),
        )
        .await?
        {
            Ok(outcome) => outcome,
            Err(err) => {
                result.transfer_id = self.transfer.handle().map(|handle| handle.transfer_id);
                return Err(err);
            }
        };

        result.transfer_id = Some(outcome.handle.transfer_id);
        result.ehr_data = Some(outcome.data);
        self.advance(token, FlowState::TransferComplete)?;
        self.session.update(token, None, |status| {
            status.flow_state = FlowState::Complete;
            status.result = Some(result.clone());
        })
    }

    fn advance(&self, token: &CancellationToken, next: FlowState) -> DriverResult<()> {
        tracing::debug!(?next, "flow state");
        self.session
            .update(token, None, |status| status.flow_state = next)
    }
}
