//! Subscription entitlement lookups.
//!
//! Asks the App Store Server API whether a subscription is still in an
//! access-granting state. Every failure, including missing configuration,
//! answers "not entitled".

pub mod service_token;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AppStoreCredentials;
use crate::time::now_epoch_secs;

/// The lookup must not eat into the caller's budget for long.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(6);

/// Decides whether a subscription grants the chat capability.
#[async_trait]
pub trait EntitlementCheck: Send + Sync {
    /// Never fails: errors are reported as `false`.
    async fn is_active(&self, subscription_id: &str) -> bool;
}

/// App Store subscription status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Expired,
    InGracePeriod,
    InBillingRetry,
    Revoked,
}

impl SubscriptionStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Active),
            2 => Some(Self::Expired),
            3 => Some(Self::InGracePeriod),
            4 => Some(Self::InBillingRetry),
            5 => Some(Self::Revoked),
            _ => None,
        }
    }

    /// States in which the subscriber keeps access.
    pub fn is_active_like(self) -> bool {
        matches!(
            self,
            Self::Active | Self::InGracePeriod | Self::InBillingRetry
        )
    }
}

#[derive(Debug, Error)]
enum LookupError {
    #[error("App Store credentials not configured")]
    NotConfigured,

    #[error("sign service token: {0}")]
    ServiceToken(#[from] jsonwebtoken::errors::Error),

    #[error("invalid App Store base URL: {0}")]
    BaseUrl(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    data: Vec<SubscriptionGroup>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionGroup {
    #[serde(default, rename = "lastTransactions")]
    last_transactions: Vec<LastTransaction>,
}

#[derive(Debug, Deserialize)]
struct LastTransaction {
    #[serde(default)]
    status: i64,
}

impl StatusResponse {
    fn any_active_like(&self) -> bool {
        self.data
            .iter()
            .flat_map(|group| &group.last_transactions)
            .filter_map(|tx| SubscriptionStatus::from_code(tx.status))
            .any(SubscriptionStatus::is_active_like)
    }
}

/// Entitlement checker backed by the App Store Server API.
#[derive(Clone)]
pub struct AppStoreEntitlements {
    client: Client,
    credentials: Option<AppStoreCredentials>,
    timeout: Duration,
}

impl AppStoreEntitlements {
    pub fn new(client: Client, credentials: Option<AppStoreCredentials>) -> Self {
        Self {
            client,
            credentials,
            timeout: LOOKUP_TIMEOUT,
        }
    }

    /// Override the lookup timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn lookup(&self, subscription_id: &str) -> Result<bool, LookupError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(LookupError::NotConfigured)?;
        let token = service_token::sign_service_token(credentials, now_epoch_secs())?;

        let mut url = url::Url::parse(credentials.base_url())
            .map_err(|e| LookupError::BaseUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| LookupError::BaseUrl(credentials.base_url().to_string()))?
            .pop_if_empty()
            .extend(["inApps", "v1", "subscriptions", subscription_id]);

        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(LookupError::Status(resp.status().as_u16()));
        }
        let body: StatusResponse = resp.json().await?;
        Ok(body.any_active_like())
    }
}

#[async_trait]
impl EntitlementCheck for AppStoreEntitlements {
    async fn is_active(&self, subscription_id: &str) -> bool {
        match self.lookup(subscription_id).await {
            Ok(active) => {
                debug!(active, "subscription status resolved");
                active
            }
            Err(LookupError::NotConfigured) => {
                debug!("subscription lookup skipped: App Store credentials not configured");
                false
            }
            Err(e) => {
                warn!(error = %e, "subscription status lookup failed");
                false
            }
        }
    }
}
