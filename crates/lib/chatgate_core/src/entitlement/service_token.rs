//! ES256 service token for the App Store Server API.
//!
//! Signed with the App Store private key, never with the HS256 user-token
//! secret. The two schemes share no types.

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::Serialize;

use crate::config::AppStoreCredentials;

/// Service token lifetime: 5 minutes.
pub const SERVICE_TOKEN_TTL_SECS: i64 = 5 * 60;

/// Audience expected by the App Store Server API.
pub const APP_STORE_AUDIENCE: &str = "appstoreconnect-v1";

#[derive(Debug, Serialize)]
struct ServiceClaims<'a> {
    iss: &'a str,
    iat: i64,
    exp: i64,
    aud: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    bid: Option<&'a str>,
}

/// Sign a short-lived ES256 token identifying this service to the App Store.
pub fn sign_service_token(
    credentials: &AppStoreCredentials,
    now: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(credentials.key_id.clone());

    let claims = ServiceClaims {
        iss: &credentials.issuer_id,
        iat: now,
        exp: now + SERVICE_TOKEN_TTL_SECS,
        aud: APP_STORE_AUDIENCE,
        bid: credentials.bundle_id.as_deref(),
    };

    let key = EncodingKey::from_ec_pem(credentials.private_key_pem.as_bytes())?;
    encode(&header, &claims, &key)
}
