//! Contract negotiation driver.
//!
//! Drives one remote negotiation at a time from initiation to `FINALIZED` or `TERMINATED`.
//! Progress is published through a `watch` channel ([`NegotiationDriver::subscribe`]) and,
//! optionally, to a [`StepObserver`]. Starting a new negotiation discards whatever the
//! driver was doing before.

use crate::backend::{DataspaceApi, NegotiationRequest, NegotiationResponse};
use crate::config::PollSettings;
use crate::error::{DriverError, DriverResult, Process};
use crate::events::{Direction, EventStatus, ProtocolEvent, ProtocolEventLog};
use crate::poller::{observed_state, poll_until_terminal, termination_message};
use crate::session::{race, Session};
use crate::step_log::{StepEntry, StepObserver};
use dsp_types::{NegotiationState, NonEmptyText, ProtocolState};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Client-side view of a remote negotiation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationHandle {
    pub negotiation_id: String,
    pub current_state: NegotiationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_agreement_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
}

/// Observable state of a [`NegotiationDriver`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NegotiationStatus {
    pub handle: Option<NegotiationHandle>,
    pub state: NegotiationState,
    pub contract_agreement_id: Option<String>,
    pub error: Option<DriverError>,
    pub message: Option<String>,
    pub is_active: bool,
}

pub struct NegotiationDriver {
    api: Arc<dyn DataspaceApi>,
    settings: PollSettings,
    session: Session<NegotiationStatus>,
    events: ProtocolEventLog,
}

impl NegotiationDriver {
    pub fn new(api: Arc<dyn DataspaceApi>, settings: PollSettings) -> Self {
        Self {
            api,
            settings,
            session: Session::new(Process::Negotiation),
            events: ProtocolEventLog::new(),
        }
    }

    /// Report every observed state transition to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn StepObserver>) -> Self {
        self.session.set_observer(observer);
        self
    }

    /// Record protocol events into a shared log instead of a private one.
    pub fn with_event_log(mut self, events: ProtocolEventLog) -> Self {
        self.events = events;
        self
    }

    pub fn status(&self) -> NegotiationStatus {
        self.session.snapshot()
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<NegotiationStatus> {
        self.session.subscribe()
    }

    pub fn state(&self) -> NegotiationState {
        self.status().state
    }

    pub fn contract_agreement_id(&self) -> Option<String> {
        self.status().contract_agreement_id
    }

    pub fn error(&self) -> Option<DriverError> {
        self.status().error
    }

    pub fn message(&self) -> Option<String> {
        self.status().message
    }

    pub fn is_active(&self) -> bool {
        self.status().is_active
    }

    pub fn handle(&self) -> Option<NegotiationHandle> {
        self.status().handle
    }

    pub fn events(&self) -> &ProtocolEventLog {
        &self.events
    }

    /// Start a negotiation for `asset_id` under `offer_id` and drive it to a terminal state.
    ///
    /// Resolves with the final handle once the remote reports `FINALIZED`. A negotiation that
    /// is already finalized in the initiation response is returned without polling.
    ///
    /// # Errors
    ///
    /// - [`DriverError::InvalidInput`] if either identifier is empty
    /// - [`DriverError::Initiation`] if the initiation request fails
    /// - [`DriverError::RemoteTermination`], [`DriverError::PollTimeout`] or
    ///   [`DriverError::PollRetryExhausted`] from polling
    /// - [`DriverError::Cancelled`] if [`cancel`](Self::cancel), [`reset`](Self::reset) or a
    ///   newer `initiate` interrupted this one
    ///
    /// Every error except cancellation is also stored in the driver's status.
    pub async fn initiate(
        &self,
        asset_id: &str,
        offer_id: &str,
        policy_id: Option<&str>,
    ) -> DriverResult<NegotiationHandle> {
        let token = self.session.begin();
        let result = self.run(&token, asset_id, offer_id, policy_id).await;
        if let Err(err) = &result {
            self.fail(&token, err);
        }
        result
    }

    /// Stop polling and mark the driver idle. Safe to call at any time.
    pub fn cancel(&self) {
        self.session.cancel(|status| {
            status.state = NegotiationState::Idle;
            status.is_active = false;
            if let Some(handle) = status.handle.as_mut() {
                handle.current_state = NegotiationState::Idle;
            }
        });
        tracing::debug!("negotiation cancelled");
    }

    /// Cancel and forget the current handle, error and message.
    pub fn reset(&self) {
        self.session.cancel(|status| *status = NegotiationStatus::default());
    }

    async fn run(
        &self,
        token: &CancellationToken,
        asset_id: &str,
        offer_id: &str,
        policy_id: Option<&str>,
    ) -> DriverResult<NegotiationHandle> {
        self.session
            .update(token, None, |status| *status = NegotiationStatus::default())?;

        let asset_id = NonEmptyText::new(asset_id)
            .map_err(|_| DriverError::InvalidInput("asset id must not be empty".into()))?;
        let offer_id = NonEmptyText::new(offer_id)
            .map_err(|_| DriverError::InvalidInput("offer id must not be empty".into()))?;
        let request = NegotiationRequest {
            asset_id: asset_id.into_inner(),
            offer_id: offer_id.into_inner(),
            policy_id: policy_id
                .and_then(|p| NonEmptyText::new(p).ok())
                .map(NonEmptyText::into_inner),
        };

        self.session.update(
            token,
            Some(StepEntry::for_state(NegotiationState::Initial, None)),
            |status| {
                status.state = NegotiationState::Initial;
                status.is_active = true;
            },
        )?;

        tracing::info!(
            asset_id = %request.asset_id,
            offer_id = %request.offer_id,
            mode = %self.api.mode(),
            "initiating contract negotiation"
        );
        self.record(
            "ContractRequestMessage",
            Direction::Outbound,
            EventStatus::Pending,
            Some(format!("asset {}", request.asset_id)),
        );

        let (response, state) = race(
            token,
            Process::Negotiation,
            self.api.initiate_negotiation(&request),
        )
        .await?
        .and_then(|response| observed_state(&response).map(|state| (response, state)))
        .map_err(|source| DriverError::Initiation {
            process: Process::Negotiation,
            source,
        })?;

        self.observe(token, &response, state)?;
        if state.is_success() {
            return self.complete(token, &response);
        }
        if state.is_failure() {
            return Err(DriverError::RemoteTermination {
                process: Process::Negotiation,
                message: termination_message(Process::Negotiation, response.message.as_deref()),
            });
        }

        let negotiation_id = response.negotiation_id;
        let (response, _) = poll_until_terminal(
            token,
            &self.settings,
            Process::Negotiation,
            || self.api.get_negotiation(&negotiation_id),
            |report: &NegotiationResponse, state: NegotiationState| {
                self.observe(token, report, state)
            },
        )
        .await?;

        self.complete(token, &response)
    }

    /// Apply one status response to the handle.
    fn observe(
        &self,
        token: &CancellationToken,
        response: &NegotiationResponse,
        state: NegotiationState,
    ) -> DriverResult<()> {
        tracing::debug!(
            negotiation_id = %response.negotiation_id,
            %state,
            "negotiation status"
        );

        let changed = self.session.snapshot().state != state;
        let step = changed.then(|| StepEntry::for_state(state, response.message.clone()));

        self.session.update(token, step, |status| {
            let agreement = response
                .contract_agreement_id
                .clone()
                .or_else(|| status.contract_agreement_id.clone());
            let last_message = response
                .message
                .clone()
                .or_else(|| status.handle.as_ref().and_then(|h| h.last_message.clone()));

            status.handle = Some(NegotiationHandle {
                negotiation_id: response.negotiation_id.clone(),
                current_state: state,
                contract_agreement_id: agreement.clone(),
                last_message: last_message.clone(),
            });
            status.state = state;
            status.contract_agreement_id = agreement;
            status.message = last_message;
        })?;

        if changed {
            let event_status = if state.is_success() {
                EventStatus::Success
            } else if state.is_failure() {
                EventStatus::Error
            } else {
                EventStatus::InProgress
            };
            self.record(
                state.as_str(),
                Direction::Inbound,
                event_status,
                Some(response.negotiation_id.clone()),
            );
        }
        Ok(())
    }

    fn complete(
        &self,
        token: &CancellationToken,
        response: &NegotiationResponse,
    ) -> DriverResult<NegotiationHandle> {
        let mut finished = None;
        self.session.update(token, None, |status| {
            status.is_active = false;
            finished = status.handle.clone();
        })?;

        let handle = finished.unwrap_or_else(|| NegotiationHandle {
            negotiation_id: response.negotiation_id.clone(),
            current_state: NegotiationState::Finalized,
            contract_agreement_id: response.contract_agreement_id.clone(),
            last_message: response.message.clone(),
        });

        if handle.contract_agreement_id.is_none() {
            tracing::warn!(
                negotiation_id = %handle.negotiation_id,
                "negotiation finalized without a contract agreement id"
            );
        }
        tracing::info!(
            negotiation_id = %handle.negotiation_id,
            agreement_id = handle.contract_agreement_id.as_deref().unwrap_or("-"),
            "contract negotiation finalized"
        );
        Ok(handle)
    }

    fn fail(&self, token: &CancellationToken, err: &DriverError) {
        if err.is_cancelled() {
            return;
        }

        let current = self.session.snapshot().state;
        // TERMINATED has already been recorded as an observed state.
        let step = (!matches!(err, DriverError::RemoteTermination { .. }))
            .then(|| StepEntry::for_error(current, err.message()));

        let applied = self.session.update(token, step, |status| {
            if matches!(
                err,
                DriverError::InvalidInput(_) | DriverError::Initiation { .. }
            ) {
                status.state = NegotiationState::Idle;
            }
            status.error = Some(err.clone());
            status.message = Some(err.message());
            status.is_active = false;
        });

        if applied.is_ok() {
            tracing::error!(kind = err.kind(), "contract negotiation failed: {err}");
            self.record(
                "negotiation failed",
                Direction::Internal,
                EventStatus::Error,
                Some(err.message()),
            );
        }
    }

    fn record(
        &self,
        action: &str,
        direction: Direction,
        status: EventStatus,
        detail: Option<String>,
    ) {
        let mut event = ProtocolEvent::new(
            Process::Negotiation,
            action,
            direction,
            status,
            self.api.mode(),
        );
        if let Some(detail) = detail {
            event = event.with_detail(detail);
        }
        self.events.record(event);
    }
}
