//! HTTP transport to the upstream chat-completion API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::json;
use thiserror::Error;

/// Status and raw body as returned by upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

impl UpstreamResponse {
    /// Synthesized `502` for failures where no HTTP response arrived.
    pub fn transport_failure(err: &TransportError) -> Self {
        Self {
            status: 502,
            body: json!({"error": "upstream_error", "message": err.to_string()}).to_string(),
        }
    }
}

/// DNS, connect, timeout or similar failure below HTTP.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self(e.to_string())
    }
}

/// Sends one POST to upstream. Retrying is the caller's job.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        api_key: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<UpstreamResponse, TransportError>;
}

/// Transport backed by a shared `reqwest::Client`.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UpstreamTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        api_key: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<UpstreamResponse, TransportError> {
        let resp = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        match resp.text().await {
            Ok(body) => Ok(UpstreamResponse {
                status: status.as_u16(),
                body,
            }),
            Err(_) if !status.is_success() => Ok(UpstreamResponse {
                status: status.as_u16(),
                body: json!({"error": "upstream_http_error", "status": status.as_u16()})
                    .to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
