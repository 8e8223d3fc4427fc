//! Scripted backend used by the driver and orchestrator tests.

use crate::backend::{
    DataspaceApi, HealthStatus, ModeInfo, NegotiationRequest, NegotiationResponse,
    TransferRequest, TransferResponse,
};
use crate::config::{OperatingMode, PollSettings};
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Production polling defaults, spelled out so timing assertions stay readable.
pub(crate) fn settings() -> PollSettings {
    PollSettings {
        poll_interval: Duration::from_millis(2000),
        max_poll_attempts: 30,
        retry_attempts: 3,
        retry_delay: Duration::from_millis(1000),
    }
}

pub(crate) fn negotiation(state: &str) -> TransportResult<NegotiationResponse> {
    Ok(NegotiationResponse {
        negotiation_id: "neg-1".into(),
        state: state.into(),
        contract_agreement_id: None,
        message: None,
    })
}

pub(crate) fn finalized(agreement: &str) -> TransportResult<NegotiationResponse> {
    Ok(NegotiationResponse {
        negotiation_id: "neg-1".into(),
        state: "FINALIZED".into(),
        contract_agreement_id: Some(agreement.into()),
        message: None,
    })
}

pub(crate) fn transfer(state: &str) -> TransportResult<TransferResponse> {
    Ok(TransferResponse {
        transfer_id: "tp-1".into(),
        state: state.into(),
        contract_agreement_id: Some("agreement-1".into()),
        message: None,
        error_detail: None,
    })
}

pub(crate) fn network<T>() -> TransportResult<T> {
    Err(TransportError::Network("connection refused".into()))
}

pub(crate) fn remote<T>(status: u16, message: &str) -> TransportResult<T> {
    Err(TransportError::Remote {
        status,
        message: message.into(),
    })
}

pub(crate) fn ehr_record() -> Value {
    json!({"credentialSubject": {"ehrId": "EHR001"}})
}

#[derive(Default)]
struct Scripts {
    initiate_negotiation: VecDeque<TransportResult<NegotiationResponse>>,
    get_negotiation: VecDeque<TransportResult<NegotiationResponse>>,
    initiate_transfer: VecDeque<TransportResult<TransferResponse>>,
    get_transfer: VecDeque<TransportResult<TransferResponse>>,
    fetch_data: VecDeque<TransportResult<Value>>,
}

/// Backend that replays scripted responses in order and counts calls per operation.
/// An exhausted script answers with a network error.
#[derive(Default)]
pub(crate) struct ScriptedApi {
    scripts: Mutex<Scripts>,
    calls: Mutex<HashMap<&'static str, usize>>,
    total: AtomicUsize,
    last_negotiation: Mutex<Option<NegotiationRequest>>,
}

impl ScriptedApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_initiate_negotiation(
        self,
        responses: impl IntoIterator<Item = TransportResult<NegotiationResponse>>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .initiate_negotiation
            .extend(responses);
        self
    }

    pub(crate) fn on_get_negotiation(
        self,
        responses: impl IntoIterator<Item = TransportResult<NegotiationResponse>>,
    ) -> Self {
        self.scripts.lock().unwrap().get_negotiation.extend(responses);
        self
    }

    pub(crate) fn on_initiate_transfer(
        self,
        responses: impl IntoIterator<Item = TransportResult<TransferResponse>>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .initiate_transfer
            .extend(responses);
        self
    }

    pub(crate) fn on_get_transfer(
        self,
        responses: impl IntoIterator<Item = TransportResult<TransferResponse>>,
    ) -> Self {
        self.scripts.lock().unwrap().get_transfer.extend(responses);
        self
    }

    pub(crate) fn on_fetch_data(
        self,
        responses: impl IntoIterator<Item = TransportResult<Value>>,
    ) -> Self {
        self.scripts.lock().unwrap().fetch_data.extend(responses);
        self
    }

    pub(crate) fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn last_negotiation_request(&self) -> Option<NegotiationRequest> {
        self.last_negotiation.lock().unwrap().clone()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn hit(&self, operation: &'static str) {
        *self.calls.lock().unwrap().entry(operation).or_default() += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataspaceApi for ScriptedApi {
    fn mode(&self) -> OperatingMode {
        OperatingMode::FullProtocol
    }

    async fn initiate_negotiation(
        &self,
        request: &NegotiationRequest,
    ) -> TransportResult<NegotiationResponse> {
        self.hit("initiate_negotiation");
        *self.last_negotiation.lock().unwrap() = Some(request.clone());
        let next = self.scripts.lock().unwrap().initiate_negotiation.pop_front();
        next.unwrap_or_else(network)
    }

    async fn get_negotiation(&self, _negotiation_id: &str) -> TransportResult<NegotiationResponse> {
        self.hit("get_negotiation");
        let next = self.scripts.lock().unwrap().get_negotiation.pop_front();
        next.unwrap_or_else(network)
    }

    async fn initiate_transfer(
        &self,
        _request: &TransferRequest,
    ) -> TransportResult<TransferResponse> {
        self.hit("initiate_transfer");
        let next = self.scripts.lock().unwrap().initiate_transfer.pop_front();
        next.unwrap_or_else(network)
    }

    async fn get_transfer(&self, _transfer_id: &str) -> TransportResult<TransferResponse> {
        self.hit("get_transfer");
        let next = self.scripts.lock().unwrap().get_transfer.pop_front();
        next.unwrap_or_else(network)
    }

    async fn fetch_transfer_data(&self, _transfer_id: &str) -> TransportResult<Value> {
        self.hit("fetch_transfer_data");
        let next = self.scripts.lock().unwrap().fetch_data.pop_front();
        next.unwrap_or_else(network)
    }

    async fn health(&self) -> TransportResult<HealthStatus> {
        Ok(HealthStatus {
            status: "healthy".into(),
            mode: Some(OperatingMode::FullProtocol.as_str().into()),
        })
    }

    async fn mode_info(&self) -> TransportResult<ModeInfo> {
        Ok(ModeInfo {
            mode: OperatingMode::FullProtocol.as_str().into(),
            description: OperatingMode::FullProtocol.description().into(),
            endpoints: HashMap::new(),
        })
    }
}
