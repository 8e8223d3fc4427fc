//! JSON request executor used by the live backend.
//!
//! Every request goes to `<base URL>/<segments...>` with JSON in and JSON out. Failures are
//! normalised into [`TransportError`]:
//! - connection problems and timeouts become `Network`
//! - non-2xx responses become `Remote`, with the message taken from the body's `message`
//!   field, then its `error` field, and otherwise `HTTP <status>`
//! - 2xx bodies that do not decode into the expected type become `Decode`
//!
//! Request and response bodies are never logged.

use crate::error::{ConfigError, TransportError, TransportResult};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct TransportClient {
    http: Client,
    base_url: Url,
}

impl TransportClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let http = Client::builder().timeout(timeout).build()?;
        Self::with_client(http, base_url)
    }

    /// Wrap an existing HTTP client, e.g. one with custom default headers.
    pub fn with_client(http: Client, base_url: &str) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url).map_err(|source| ConfigError::BaseUrl {
            url: base_url.to_string(),
            source,
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::Invalid(format!(
                "base URL {base_url} cannot carry a path"
            )));
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build the absolute URL for a resource. Segments are percent-encoded individually, so
    /// opaque identifiers containing `/` or `:` stay within their own segment.
    pub fn url_for(&self, segments: &[&str]) -> TransportResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Issue a request and decode the JSON response.
    pub async fn request<T>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&serde_json::Value>,
    ) -> TransportResult<T>
    where
        T: DeserializeOwned,
    {
        let url = self.url_for(segments)?;
        tracing::debug!(%method, %url, "dispatching request");

        let mut builder = self.http.request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(remote_error(status, &bytes));
        }

        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }

    pub async fn get<T>(&self, segments: &[&str]) -> TransportResult<T>
    where
        T: DeserializeOwned,
    {
        self.request(Method::GET, segments, None).await
    }

    pub async fn post<T, B>(&self, segments: &[&str], body: &B) -> TransportResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body).map_err(|e| TransportError::Decode(e.to_string()))?;
        self.request(Method::POST, segments, Some(&body)).await
    }
}

/// Turn a non-2xx response into a `Remote` error with the most specific message available.
fn remote_error(status: StatusCode, body: &[u8]) -> TransportError {
    let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();
    let field = |name: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };

    let message = field("message")
        .or_else(|| field("error"))
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    TransportError::Remote {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client(server: &Server) -> TransportClient {
        TransportClient::new(&server.url(), Duration::from_secs(5)).expect("client")
    }

    #[test]
    fn url_for_encodes_each_segment() {
        let transport =
            TransportClient::new("http://localhost:3002", Duration::from_secs(1)).unwrap();
        let url = transport.url_for(&["api", "negotiations", "neg/1 a"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3002/api/negotiations/neg%2F1%20a");
    }

    #[test]
    fn url_for_keeps_base_path_prefix() {
        let transport =
            TransportClient::new("http://gateway/edc/", Duration::from_secs(1)).unwrap();
        let url = transport.url_for(&["api", "transfers"]).unwrap();
        assert_eq!(url.as_str(), "http://gateway/edc/api/transfers");
    }

    #[test]
    fn rejects_unparsable_base_url() {
        let err = TransportClient::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ConfigError::BaseUrl { .. }));
    }

    #[tokio::test]
    async fn post_sends_json_and_decodes_response() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/negotiations")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(json!({"assetId": "ehr:EHR001"})))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"negotiationId":"neg-1","state":"REQUESTING"}"#)
            .create_async()
            .await;

        let value: serde_json::Value = client(&server)
            .post(&["api", "negotiations"], &json!({"assetId": "ehr:EHR001"}))
            .await
            .expect("request succeeds");

        assert_eq!(value["negotiationId"], "neg-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn remote_error_prefers_message_then_error_field() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/a")
            .with_status(400)
            .with_body(r#"{"error":"Negotiation failed","message":"Asset not found"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/b")
            .with_status(502)
            .with_body(r#"{"error":"Bad gateway"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/c")
            .with_status(503)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        let transport = client(&server);
        let a = transport.get::<serde_json::Value>(&["a"]).await.unwrap_err();
        let b = transport.get::<serde_json::Value>(&["b"]).await.unwrap_err();
        let c = transport.get::<serde_json::Value>(&["c"]).await.unwrap_err();

        assert_eq!(
            a,
            TransportError::Remote {
                status: 400,
                message: "Asset not found".into()
            }
        );
        assert_eq!(b.to_string(), "Bad gateway");
        assert_eq!(c.to_string(), "HTTP 503");
        assert_eq!(c.status(), Some(503));
    }

    #[tokio::test]
    async fn invalid_json_is_a_decode_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let err = client(&server)
            .get::<serde_json::Value>(&["health"])
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        // Port 9 (discard) is closed on loopback in test environments.
        let transport =
            TransportClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = transport
            .get::<serde_json::Value>(&["health"])
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
    }
}
