//! Shared polling loop for the negotiation and transfer drivers.

use crate::backend::{NegotiationResponse, TransferResponse};
use crate::config::PollSettings;
use crate::constants::{
    FLOW_TERMINATED_MESSAGE, NEGOTIATION_TERMINATED_MESSAGE, TRANSFER_TERMINATED_MESSAGE,
};
use crate::error::{DriverError, DriverResult, Process, TransportError, TransportResult};
use crate::session::{pause, race};
use dsp_types::{NegotiationState, ProtocolState, StateParseError, TransferState};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A status response carrying a remote state machine position.
pub(crate) trait StatusReport {
    type State: ProtocolState + FromStr<Err = StateParseError>;

    fn raw_state(&self) -> &str;
    fn detail(&self) -> Option<&str>;
}

impl StatusReport for NegotiationResponse {
    type State = NegotiationState;

    fn raw_state(&self) -> &str {
        &self.state
    }

    fn detail(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl StatusReport for TransferResponse {
    type State = TransferState;

    fn raw_state(&self) -> &str {
        &self.state
    }

    fn detail(&self) -> Option<&str> {
        TransferResponse::detail(self)
    }
}

/// Parse the reported state. An unknown state name counts as an undecodable response.
pub(crate) fn observed_state<R: StatusReport>(report: &R) -> TransportResult<R::State> {
    report
        .raw_state()
        .parse()
        .map_err(|e: StateParseError| TransportError::Decode(e.to_string()))
}

pub(crate) fn termination_message(process: Process, detail: Option<&str>) -> String {
    match detail {
        Some(detail) if !detail.trim().is_empty() => detail.to_string(),
        _ => match process {
            Process::Negotiation => NEGOTIATION_TERMINATED_MESSAGE.to_string(),
            Process::Transfer => TRANSFER_TERMINATED_MESSAGE.to_string(),
            Process::Flow => FLOW_TERMINATED_MESSAGE.to_string(),
        },
    }
}

/// Poll `fetch` until the remote reports a terminal state.
///
/// The first request is sent after one `poll_interval`. Each successful response is passed
/// to `on_observed` before it is classified. Failed requests are retried with a linearly
/// growing delay; the failure counter tracks consecutive failures and a successful response
/// resets it. Only successful responses count towards `max_poll_attempts`.
pub(crate) async fn poll_until_terminal<R, F, Fut, O>(
    token: &CancellationToken,
    settings: &PollSettings,
    process: Process,
    mut fetch: F,
    mut on_observed: O,
) -> DriverResult<(R, R::State)>
where
    R: StatusReport,
    F: FnMut() -> Fut,
    Fut: Future<Output = TransportResult<R>>,
    O: FnMut(&R, R::State) -> DriverResult<()>,
{
    let mut polls: u32 = 0;
    let mut failures: u32 = 0;
    let mut delay: Duration = settings.poll_interval;

    loop {
        pause(token, process, delay).await?;

        let outcome = race(token, process, fetch())
            .await?
            .and_then(|report| observed_state(&report).map(|state| (report, state)));

        match outcome {
            Ok((report, state)) => {
                failures = 0;
                on_observed(&report, state)?;

                if state.is_success() {
                    return Ok((report, state));
                }
                if state.is_failure() {
                    return Err(DriverError::RemoteTermination {
                        process,
                        message: termination_message(process, report.detail()),
                    });
                }

                polls += 1;
                if polls >= settings.max_poll_attempts {
                    return Err(DriverError::PollTimeout {
                        process,
                        attempts: polls,
                    });
                }
                delay = settings.poll_interval;
            }
            Err(source) => {
                failures += 1;
                if failures >= settings.retry_attempts {
                    return Err(DriverError::PollRetryExhausted {
                        process,
                        attempts: failures,
                        source,
                    });
                }
                delay = settings.retry_delay_for(failures);
                tracing::warn!(
                    %process,
                    attempt = failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "status request failed: {source}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn settings() -> PollSettings {
        PollSettings {
            poll_interval: Duration::from_millis(2000),
            max_poll_attempts: 5,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }

    fn response(state: &str) -> TransportResult<NegotiationResponse> {
        Ok(NegotiationResponse {
            negotiation_id: "neg-1".into(),
            state: state.into(),
            contract_agreement_id: None,
            message: None,
        })
    }

    fn network() -> TransportResult<NegotiationResponse> {
        Err(TransportError::Network("connection refused".into()))
    }

    async fn run(
        script: Vec<TransportResult<NegotiationResponse>>,
        settings: PollSettings,
    ) -> (DriverResult<NegotiationState>, usize, Vec<NegotiationState>) {
        let script = Arc::new(Mutex::new(VecDeque::from(script)));
        let calls = Arc::new(Mutex::new(0usize));
        let mut seen = Vec::new();
        let token = CancellationToken::new();

        let result = poll_until_terminal(
            &token,
            &settings,
            Process::Negotiation,
            || {
                let script = script.clone();
                let calls = calls.clone();
                async move {
                    *calls.lock().unwrap() += 1;
                    script.lock().unwrap().pop_front().unwrap_or_else(network)
                }
            },
            |_: &NegotiationResponse, state: NegotiationState| {
                seen.push(state);
                Ok(())
            },
        )
        .await
        .map(|(_, state)| state);

        let calls = *calls.lock().unwrap();
        (result, calls, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_first_terminal_state() {
        let (result, calls, seen) = run(
            vec![response("REQUESTED"), response("OFFERED"), response("FINALIZED")],
            settings(),
        )
        .await;

        assert_eq!(result, Ok(NegotiationState::Finalized));
        assert_eq!(calls, 3);
        assert_eq!(
            seen,
            vec![
                NegotiationState::Requested,
                NegotiationState::Offered,
                NegotiationState::Finalized
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_retried_with_linear_backoff() {
        let started = tokio::time::Instant::now();
        let (result, calls, _) = run(vec![network(), network(), response("FINALIZED")], settings()).await;

        assert_eq!(result, Ok(NegotiationState::Finalized));
        assert_eq!(calls, 3);
        // 2000 (first interval) + 1000 + 2000
        assert_eq!(started.elapsed(), Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_failures_exhaust_the_retry_budget() {
        let (result, calls, _) = run(vec![], settings()).await;

        assert_eq!(calls, 3);
        assert!(matches!(
            result,
            Err(DriverError::PollRetryExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_failure_counter() {
        let (result, calls, _) = run(
            vec![
                network(),
                network(),
                response("REQUESTED"),
                network(),
                network(),
                response("FINALIZED"),
            ],
            settings(),
        )
        .await;

        assert_eq!(result, Ok(NegotiationState::Finalized));
        assert_eq!(calls, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_max_non_terminal_polls() {
        let mut settings = settings();
        settings.max_poll_attempts = 2;
        let (result, calls, _) = run(
            vec![response("REQUESTED"), response("REQUESTED"), response("FINALIZED")],
            settings,
        )
        .await;

        assert_eq!(calls, 2);
        let err = result.unwrap_err();
        assert_eq!(
            err.message(),
            "negotiation polling timeout - maximum attempts (2) reached"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn termination_uses_remote_message_or_default() {
        let terminated = Ok(NegotiationResponse {
            negotiation_id: "neg-1".into(),
            state: "TERMINATED".into(),
            contract_agreement_id: None,
            message: Some("Policy not satisfied".into()),
        });
        let (result, _, _) = run(vec![terminated], settings()).await;
        assert_eq!(result.unwrap_err().message(), "Policy not satisfied");

        let (result, _, _) = run(vec![response("TERMINATED")], settings()).await;
        assert_eq!(result.unwrap_err().message(), NEGOTIATION_TERMINATED_MESSAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_state_counts_as_failed_request() {
        let (result, calls, _) = run(vec![response("BOGUS"), response("FINALIZED")], settings()).await;
        assert_eq!(result, Ok(NegotiationState::Finalized));
        assert_eq!(calls, 2);
    }
}
