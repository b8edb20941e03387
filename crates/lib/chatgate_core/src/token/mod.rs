//! User access tokens.
//!
//! Compact three-segment tokens signed with HMAC-SHA-256 over a shared
//! secret. Tokens are self-contained: nothing is stored server side and there
//! is no revocation list, a token simply stops verifying once it expires.

pub mod hs256;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use hs256::{SignError, sign, verify};

/// Scope that unlocks the chat-proxy endpoint.
pub const CHAT_SCOPE: &str = "ai:chat";

/// Subject carried by every issued token. No per-user identity is modelled.
pub const ANONYMOUS_SUBJECT: &str = "anonymous";

/// Access token lifetime: 15 minutes.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;

/// How far in the future `iat` may lie before a token is refused.
pub const MAX_FUTURE_SKEW_SECS: i64 = 120;

/// Token header. Serialized first, so field order is wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
}

impl Default for TokenHeader {
    fn default() -> Self {
        Self {
            alg: hs256::ALG.into(),
            typ: "JWT".into(),
        }
    }
}

/// Claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claims {
    /// Issued at (unix timestamp).
    #[serde(rename = "iat")]
    pub issued_at: i64,
    /// Expiry (unix timestamp).
    #[serde(rename = "exp")]
    pub expires_at: i64,
    /// Granted capabilities. A set: order is irrelevant and duplicates collapse.
    pub scope: BTreeSet<String>,
    #[serde(rename = "sub")]
    pub subject: String,
}

impl Claims {
    /// Fresh anonymous claims valid for [`ACCESS_TOKEN_TTL_SECS`] from `now`.
    pub fn anonymous(now: i64, scope: BTreeSet<String>) -> Self {
        Self {
            issued_at: now,
            expires_at: now + ACCESS_TOKEN_TTL_SECS,
            scope,
            subject: ANONYMOUS_SUBJECT.into(),
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.contains(scope)
    }
}
