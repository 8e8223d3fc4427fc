//! Backend strategies.
//!
//! The drivers talk to the protocol engine only through [`DataspaceApi`]. The strategy is
//! chosen once, from the operating mode, when the client is built:
//! - [`MockBackend`] for direct-mock mode, which answers every call locally with already
//!   terminal states and synthesised payloads
//! - [`HttpBackend`] for hybrid and full-protocol modes, which forwards to the backend API
//!   through [`TransportClient`]
//!
//! Keeping the mode decision here means the drivers never branch on the mode themselves.

use crate::config::{ClientConfig, OperatingMode};
use crate::constants::{
    API_SEGMENT, DATA_SEGMENT, HEALTH_SEGMENT, MODE_SEGMENT, NEGOTIATIONS_SEGMENT,
    TRANSFERS_SEGMENT,
};
use crate::error::{ConfigError, TransportResult};
use crate::transport::TransportClient;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Body of `POST /api/negotiations`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationRequest {
    pub asset_id: String,
    pub offer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
}

/// Negotiation status as reported by the backend.
///
/// `state` is kept as the raw wire string; the driver parses it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationResponse {
    pub negotiation_id: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_agreement_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body of `POST /api/transfers`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub contract_agreement_id: String,
    pub asset_id: String,
}

/// Transfer status as reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub transfer_id: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_agreement_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Some backends report failures in `errorDetail` rather than `message`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl TransferResponse {
    pub fn detail(&self) -> Option<&str> {
        self.message.as_deref().or(self.error_detail.as_deref())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeInfo {
    pub mode: String,
    pub description: String,
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
}

/// Request/response interface to the protocol engine as seen by the drivers.
#[async_trait]
pub trait DataspaceApi: Send + Sync {
    fn mode(&self) -> OperatingMode;

    async fn initiate_negotiation(
        &self,
        request: &NegotiationRequest,
    ) -> TransportResult<NegotiationResponse>;

    async fn get_negotiation(&self, negotiation_id: &str) -> TransportResult<NegotiationResponse>;

    async fn initiate_transfer(&self, request: &TransferRequest)
        -> TransportResult<TransferResponse>;

    async fn get_transfer(&self, transfer_id: &str) -> TransportResult<TransferResponse>;

    /// Retrieve the payload of a completed transfer.
    async fn fetch_transfer_data(&self, transfer_id: &str) -> TransportResult<Value>;

    async fn health(&self) -> TransportResult<HealthStatus>;

    async fn mode_info(&self) -> TransportResult<ModeInfo>;
}

/// Build the strategy for the configured mode.
pub fn connect(config: &ClientConfig) -> Result<Arc<dyn DataspaceApi>, ConfigError> {
    config.poll_settings().validate()?;
    match config.mode() {
        OperatingMode::DirectMock => Ok(Arc::new(MockBackend::new())),
        mode @ (OperatingMode::Hybrid | OperatingMode::FullProtocol) => {
            let transport = TransportClient::new(config.base_url(), config.request_timeout())?;
            Ok(Arc::new(HttpBackend::new(mode, transport)))
        }
    }
}

// ============================================================================
// Direct-mock strategy
// ============================================================================

/// Answers every call locally. Negotiations are finalized and transfers completed on
/// initiation, so the drivers never poll in this mode.
#[derive(Debug, Default)]
pub struct MockBackend {
    /// transfer id -> asset id, so the synthesised payload names the right record.
    transfers: Mutex<HashMap<String, String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn mock_id(prefix: &str) -> String {
        format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
    }

    fn asset_for(&self, transfer_id: &str) -> Option<String> {
        self.transfers
            .lock()
            .ok()
            .and_then(|map| map.get(transfer_id).cloned())
    }
}

/// `asset:ehr:EHR001` and `ehr:EHR001` both name record `EHR001`.
pub(crate) fn ehr_id_from_asset(asset_id: &str) -> &str {
    asset_id
        .strip_prefix("asset:ehr:")
        .or_else(|| asset_id.strip_prefix("ehr:"))
        .unwrap_or(asset_id)
}

#[async_trait]
impl DataspaceApi for MockBackend {
    fn mode(&self) -> OperatingMode {
        OperatingMode::DirectMock
    }

    async fn initiate_negotiation(
        &self,
        _request: &NegotiationRequest,
    ) -> TransportResult<NegotiationResponse> {
        Ok(NegotiationResponse {
            negotiation_id: Self::mock_id("mock-neg"),
            state: "FINALIZED".into(),
            contract_agreement_id: Some(Self::mock_id("mock-agreement")),
            message: Some("Mock negotiation completed instantly".into()),
        })
    }

    async fn get_negotiation(&self, negotiation_id: &str) -> TransportResult<NegotiationResponse> {
        Ok(NegotiationResponse {
            negotiation_id: negotiation_id.to_string(),
            state: "FINALIZED".into(),
            contract_agreement_id: Some(format!("mock-agreement-{negotiation_id}")),
            message: None,
        })
    }

    async fn initiate_transfer(
        &self,
        request: &TransferRequest,
    ) -> TransportResult<TransferResponse> {
        let transfer_id = Self::mock_id("mock-transfer");
        if let Ok(mut map) = self.transfers.lock() {
            map.insert(transfer_id.clone(), request.asset_id.clone());
        }
        Ok(TransferResponse {
            transfer_id,
            state: "COMPLETED".into(),
            contract_agreement_id: Some(request.contract_agreement_id.clone()),
            message: Some("Mock transfer completed instantly".into()),
            error_detail: None,
        })
    }

    async fn get_transfer(&self, transfer_id: &str) -> TransportResult<TransferResponse> {
        Ok(TransferResponse {
            transfer_id: transfer_id.to_string(),
            state: "COMPLETED".into(),
            contract_agreement_id: None,
            message: None,
            error_detail: None,
        })
    }

    async fn fetch_transfer_data(&self, transfer_id: &str) -> TransportResult<Value> {
        let asset_id = self.asset_for(transfer_id).unwrap_or_default();
        let ehr_id = ehr_id_from_asset(&asset_id);
        Ok(json!({
            "credentialSubject": {
                "ehrId": ehr_id,
            },
            "_meta": {
                "source": "mock",
                "mode": OperatingMode::DirectMock.as_str(),
                "transferId": transfer_id,
                "fetchedAt": Utc::now().to_rfc3339(),
            }
        }))
    }

    async fn health(&self) -> TransportResult<HealthStatus> {
        Ok(HealthStatus {
            status: "healthy".into(),
            mode: Some(OperatingMode::DirectMock.as_str().into()),
        })
    }

    async fn mode_info(&self) -> TransportResult<ModeInfo> {
        Ok(ModeInfo {
            mode: OperatingMode::DirectMock.as_str().into(),
            description: OperatingMode::DirectMock.description().into(),
            endpoints: HashMap::new(),
        })
    }
}

// ============================================================================
// Live strategy (hybrid and full-protocol)
// ============================================================================

/// Forwards every call to the backend API.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    mode: OperatingMode,
    transport: TransportClient,
}

impl HttpBackend {
    pub fn new(mode: OperatingMode, transport: TransportClient) -> Self {
        Self { mode, transport }
    }
}

#[async_trait]
impl DataspaceApi for HttpBackend {
    fn mode(&self) -> OperatingMode {
        self.mode
    }

    async fn initiate_negotiation(
        &self,
        request: &NegotiationRequest,
    ) -> TransportResult<NegotiationResponse> {
        self.transport
            .post(&[API_SEGMENT, NEGOTIATIONS_SEGMENT], request)
            .await
    }

    async fn get_negotiation(&self, negotiation_id: &str) -> TransportResult<NegotiationResponse> {
        self.transport
            .get(&[API_SEGMENT, NEGOTIATIONS_SEGMENT, negotiation_id])
            .await
    }

    async fn initiate_transfer(
        &self,
        request: &TransferRequest,
    ) -> TransportResult<TransferResponse> {
        self.transport
            .post(&[API_SEGMENT, TRANSFERS_SEGMENT], request)
            .await
    }

    async fn get_transfer(&self, transfer_id: &str) -> TransportResult<TransferResponse> {
        self.transport
            .get(&[API_SEGMENT, TRANSFERS_SEGMENT, transfer_id])
            .await
    }

    async fn fetch_transfer_data(&self, transfer_id: &str) -> TransportResult<Value> {
        let body: Value = self
            .transport
            .get(&[API_SEGMENT, TRANSFERS_SEGMENT, transfer_id, DATA_SEGMENT])
            .await?;
        Ok(unwrap_data_envelope(body))
    }

    async fn health(&self) -> TransportResult<HealthStatus> {
        self.transport.get(&[HEALTH_SEGMENT]).await
    }

    async fn mode_info(&self) -> TransportResult<ModeInfo> {
        self.transport.get(&[API_SEGMENT, MODE_SEGMENT]).await
    }
}

/// The data endpoint may wrap the payload as `{transferId, data, fetchedAt, source}`.
fn unwrap_data_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("transferId") && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}
