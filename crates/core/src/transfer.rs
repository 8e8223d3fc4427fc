//! Transfer process driver.
//!
//! Mirrors [`NegotiationDriver`](crate::negotiation::NegotiationDriver) for the transfer
//! process. Once the remote reports completion the driver fetches the payload, retrying
//! independently of the status polling because the data plane can lag behind the control
//! plane.

use crate::backend::{DataspaceApi, TransferRequest, TransferResponse};
use crate::config::PollSettings;
use crate::error::{DriverError, DriverResult, Process};
use crate::events::{Direction, EventStatus, ProtocolEvent, ProtocolEventLog};
use crate::poller::{observed_state, poll_until_terminal, termination_message};
use crate::session::{pause, race, Session};
use crate::step_log::{StepEntry, StepObserver};
use dsp_types::{NonEmptyText, ProtocolState, TransferState};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Client-side view of a remote transfer process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferHandle {
    pub transfer_id: String,
    pub current_state: TransferState,
    /// Agreement that authorised this transfer.
    pub contract_agreement_id: String,
}

/// A completed transfer together with its payload.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    pub handle: TransferHandle,
    pub data: Value,
}

/// Observable state of a [`TransferDriver`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransferStatus {
    pub handle: Option<TransferHandle>,
    pub state: TransferState,
    pub data: Option<Value>,
    pub error: Option<DriverError>,
    pub message: Option<String>,
    pub is_active: bool,
}

pub struct TransferDriver {
    api: Arc<dyn DataspaceApi>,
    settings: PollSettings,
    session: Session<TransferStatus>,
    events: ProtocolEventLog,
}

impl TransferDriver {
    pub fn new(api: Arc<dyn DataspaceApi>, settings: PollSettings) -> Self {
        Self {
            api,
            settings,
            session: Session::new(Process::Transfer),
            events: ProtocolEventLog::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StepObserver>) -> Self {
        self.session.set_observer(observer);
        self
    }

    pub fn with_event_log(mut self, events: ProtocolEventLog) -> Self {
        self.events = events;
        self
    }

    pub fn status(&self) -> TransferStatus {
        self.session.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferStatus> {
        self.session.subscribe()
    }

    pub fn state(&self) -> TransferState {
        self.status().state
    }

    pub fn data(&self) -> Option<Value> {
        self.status().data
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

    pub fn handle(&self) -> Option<TransferHandle> {
        self.status().handle
    }

    pub fn events(&self) -> &ProtocolEventLog {
        &self.events
    }

    /// Start a transfer of `asset_id` under `contract_agreement_id`, drive it to completion
    /// and fetch the payload.
    ///
    /// `COMPLETED` and `DEPROVISIONED` both count as completion. Errors follow
    /// [`NegotiationDriver::initiate`](crate::negotiation::NegotiationDriver::initiate), plus
    /// [`DriverError::DataFetch`] when the payload cannot be retrieved after a completed
    /// transfer.
    pub async fn initiate(
        &self,
        contract_agreement_id: &str,
        asset_id: &str,
    ) -> DriverResult<TransferOutcome> {
        let token = self.session.begin();
        let result = self.run(&token, contract_agreement_id, asset_id).await;
        if let Err(err) = &result {
            self.fail(&token, err);
        }
        result
    }

    /// Stop polling or fetching and mark the driver idle. Safe to call at any time.
    pub fn cancel(&self) {
        self.session.cancel(|status| {
            status.state = TransferState::Idle;
            status.is_active = false;
            if let Some(handle) = status.handle.as_mut() {
                handle.current_state = TransferState::Idle;
            }
        });
        tracing::debug!("transfer cancelled");
    }

    pub fn reset(&self) {
        self.session.cancel(|status| *status = TransferStatus::default());
    }

    async fn run(
        &self,
        token: &CancellationToken,
        contract_agreement_id: &str,
        asset_id: &str,
    ) -> DriverResult<TransferOutcome> {
        self.session
            .update(token, None, |status| *status = TransferStatus::default())?;

        let agreement = NonEmptyText::new(contract_agreement_id).map_err(|_| {
            DriverError::InvalidInput("contract agreement id must not be empty".into())
        })?;
        let asset_id = NonEmptyText::new(asset_id)
            .map_err(|_| DriverError::InvalidInput("asset id must not be empty".into()))?;
        let request = TransferRequest {
            contract_agreement_id: agreement.into_inner(),
            asset_id: asset_id.into_inner(),
        };

        self.session.update(
            token,
            Some(StepEntry::for_state(TransferState::Initial, None)),
            |status| {
                status.state = TransferState::Initial;
                status.is_active = true;
            },
        )?;

        tracing::info!(
            agreement_id = %request.contract_agreement_id,
            asset_id = %request.asset_id,
            mode = %self.api.mode(),
            "initiating transfer"
        );
        self.record(
            "TransferRequestMessage",
            Direction::Outbound,
            EventStatus::Pending,
            Some(format!("agreement {}", request.contract_agreement_id)),
        );

        let (response, state) = race(token, Process::Transfer, self.api.initiate_transfer(&request))
            .await?
            .and_then(|response| observed_state(&response).map(|state| (response, state)))
            .map_err(|source| DriverError::Initiation {
                process: Process::Transfer,
                source,
            })?;

        let agreement = request.contract_agreement_id.as_str();
        self.observe(token, agreement, &response, state)?;
        if state.is_failure() {
            return Err(DriverError::RemoteTermination {
                process: Process::Transfer,
                message: termination_message(Process::Transfer, response.detail()),
            });
        }

        let (response, state) = if state.is_success() {
            (response, state)
        } else {
            let transfer_id = response.transfer_id;
            poll_until_terminal(
                token,
                &self.settings,
                Process::Transfer,
                || self.api.get_transfer(&transfer_id),
                |report: &TransferResponse, state: TransferState| {
                    self.observe(token, agreement, report, state)
                },
            )
            .await?
        };

        if state == TransferState::Deprovisioned {
            tracing::warn!(
                transfer_id = %response.transfer_id,
                "transfer reported DEPROVISIONED, treating it as completed"
            );
        }
        tracing::info!(transfer_id = %response.transfer_id, %state, "transfer completed");

        let data = self.fetch_data(token, &response.transfer_id).await?;

        let mut finished = None;
        self.session.update(token, None, |status| {
            status.data = Some(data.clone());
            status.is_active = false;
            finished = status.handle.clone();
        })?;
        self.record(
            "data retrieved",
            Direction::Inbound,
            EventStatus::Success,
            Some(response.transfer_id.clone()),
        );

        let handle = finished.unwrap_or_else(|| TransferHandle {
            transfer_id: response.transfer_id.clone(),
            current_state: state,
            contract_agreement_id: agreement.to_string(),
        });
        Ok(TransferOutcome { handle, data })
    }

    /// Fetch the payload, retrying up to `retry_attempts` times with linear backoff.
    async fn fetch_data(&self, token: &CancellationToken, transfer_id: &str) -> DriverResult<Value> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match race(token, Process::Transfer, self.api.fetch_transfer_data(transfer_id)).await? {
                Ok(data) => {
                    tracing::debug!(transfer_id, attempt, "transfer data retrieved");
                    return Ok(data);
                }
                Err(source) if attempt >= self.settings.retry_attempts => {
                    return Err(DriverError::DataFetch {
                        attempts: attempt,
                        source,
                    });
                }
                Err(source) => {
                    let delay = self.settings.retry_delay_for(attempt);
                    tracing::warn!(
                        transfer_id,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "transfer data not available yet: {source}"
                    );
                    pause(token, Process::Transfer, delay).await?;
                }
            }
        }
    }

    fn observe(
        &self,
        token: &CancellationToken,
        contract_agreement_id: &str,
        response: &TransferResponse,
        state: TransferState,
    ) -> DriverResult<()> {
        tracing::debug!(transfer_id = %response.transfer_id, %state, "transfer status");

        let detail = response.detail().map(str::to_string);
        let changed = self.session.snapshot().state != state;
        let step = changed.then(|| StepEntry::for_state(state, detail.clone()));

        self.session.update(token, step, |status| {
            status.handle = Some(TransferHandle {
                transfer_id: response.transfer_id.clone(),
                current_state: state,
                contract_agreement_id: contract_agreement_id.to_string(),
            });
            status.state = state;
            if detail.is_some() {
                status.message = detail.clone();
            }
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
                Some(response.transfer_id.clone()),
            );
        }
        Ok(())
    }

    fn fail(&self, token: &CancellationToken, err: &DriverError) {
        if err.is_cancelled() {
            return;
        }

        let current = self.session.snapshot().state;
        let step = (!matches!(err, DriverError::RemoteTermination { .. }))
            .then(|| StepEntry::for_error(current, err.message()));

        let applied = self.session.update(token, step, |status| {
            if matches!(
                err,
                DriverError::InvalidInput(_) | DriverError::Initiation { .. }
            ) {
                status.state = TransferState::Idle;
            }
            status.error = Some(err.clone());
            status.message = Some(err.message());
            status.is_active = false;
        });

        if applied.is_ok() {
            tracing::error!(kind = err.kind(), "transfer failed: {err}");
            self.record(
                "transfer failed",
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
        let mut event =
            ProtocolEvent::new(Process::Transfer, action, direction, status, self.api.mode());
        if let Some(detail) = detail {
            event = event.with_detail(detail);
        }
        self.events.record(event);
    }
}
