//! Bearer token authorization for inbound requests.

use http::HeaderMap;
use http::header::AUTHORIZATION;
use thiserror::Error;

use crate::token::{Claims, verify};

/// Authorization failures.
///
/// A missing header and a bad token both map to `NotAuthenticated` so the
/// caller cannot probe which check failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("not authenticated: {0}")]
    NotAuthenticated(&'static str),

    #[error("missing {0} scope")]
    Forbidden(String),
}

/// Extract and verify the bearer token, then check `required_scope`.
///
/// A token whose scope set is empty skips the scope check entirely and is
/// accepted for any endpoint. Tokens that carry scopes must carry the
/// required one.
pub fn authorize(
    headers: &HeaderMap,
    required_scope: &str,
    secret: &[u8],
    now: i64,
) -> Result<Claims, AuthError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AuthError::NotAuthenticated("missing bearer token"))?;

    let claims = verify(token, secret, now)
        .ok_or(AuthError::NotAuthenticated("invalid or expired token"))?;

    if !required_scope.is_empty() && !claims.scope.is_empty() && !claims.has_scope(required_scope)
    {
        return Err(AuthError::Forbidden(required_scope.to_string()));
    }
    Ok(claims)
}
