//! Access token issuance.
//!
//! Every caller gets a token. Only entitled callers (or every caller, when
//! the premium bypass is switched on) get one carrying [`CHAT_SCOPE`].

use std::collections::BTreeSet;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::entitlement::EntitlementCheck;
use crate::token::{self, CHAT_SCOPE, Claims, SignError, TokenHeader};

/// Token issuance errors.
#[derive(Debug, Error)]
pub enum IssueError {
    #[error("JWT_SECRET is not configured")]
    MissingSecret,

    #[error("token signing failed: {0}")]
    Signing(#[from] SignError),
}

/// Body of an issue-token request. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueTokenRequest {
    pub original_transaction_id: Option<String>,
}

impl IssueTokenRequest {
    /// Lenient parse: invalid JSON or wrongly typed fields count as absent.
    pub fn parse(body: Option<&str>) -> Self {
        let value: Value = body
            .and_then(|b| serde_json::from_str(b).ok())
            .unwrap_or(Value::Null);
        let original_transaction_id = value
            .get("originalTransactionId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from);
        Self {
            original_transaction_id,
        }
    }
}

/// How the scope of an issued token was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    /// Premium bypass is on; no entitlement was consulted.
    Bypass,
    /// The subscription was confirmed active-like.
    Entitled,
    /// No chat scope granted.
    Unentitled,
}

/// A freshly signed access token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
    pub claims: Claims,
    pub grant: Grant,
}

/// Issues access tokens, consulting entitlements when needed.
pub struct TokenIssuer<'a> {
    config: &'a GatewayConfig,
    entitlements: &'a dyn EntitlementCheck,
}

impl<'a> TokenIssuer<'a> {
    pub fn new(config: &'a GatewayConfig, entitlements: &'a dyn EntitlementCheck) -> Self {
        Self {
            config,
            entitlements,
        }
    }

    /// Issue a token at time `now`.
    ///
    /// The secret is checked first so a misconfigured deployment never
    /// reaches the subscription API.
    pub async fn issue(
        &self,
        request: &IssueTokenRequest,
        now: i64,
    ) -> Result<IssuedToken, IssueError> {
        let secret = self
            .config
            .jwt_secret
            .as_deref()
            .ok_or(IssueError::MissingSecret)?;

        let grant = self.decide_grant(request).await;
        let scope = match grant {
            Grant::Bypass | Grant::Entitled => BTreeSet::from([CHAT_SCOPE.to_string()]),
            Grant::Unentitled => BTreeSet::new(),
        };

        let claims = Claims::anonymous(now, scope);
        let token = token::sign(&TokenHeader::default(), &claims, secret.as_bytes())?;
        Ok(IssuedToken {
            token,
            expires_at: claims.expires_at,
            claims,
            grant,
        })
    }

    async fn decide_grant(&self, request: &IssueTokenRequest) -> Grant {
        if self.config.bypass_premium {
            warn!("premium bypass enabled: granting {CHAT_SCOPE} without entitlement check");
            return Grant::Bypass;
        }
        match request.original_transaction_id.as_deref() {
            Some(id) if self.entitlements.is_active(id).await => {
                info!("subscription entitled: granting {CHAT_SCOPE}");
                Grant::Entitled
            }
            Some(_) => {
                info!("subscription not entitled: issuing token without scope");
                Grant::Unentitled
            }
            None => Grant::Unentitled,
        }
    }
}
