//! HS256 signing and verification.
//!
//! Verification is total: any input, however malformed, yields either claims
//! or `None`. Callers cannot tell which check failed.

use std::collections::BTreeSet;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use super::{Claims, MAX_FUTURE_SKEW_SECS, TokenHeader};
use crate::codec::{b64url_decode, b64url_encode};

type HmacSha256 = Hmac<Sha256>;

/// The only accepted `alg` header value.
pub const ALG: &str = "HS256";

/// Token signing errors.
#[derive(Debug, Error)]
pub enum SignError {
    #[error("serialize token segment: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("HMAC key rejected")]
    Key,
}

/// Sign `claims` under `header` with `secret`, returning `header.payload.signature`.
pub fn sign(header: &TokenHeader, claims: &Claims, secret: &[u8]) -> Result<String, SignError> {
    let header_b64 = b64url_encode(serde_json::to_vec(header)?);
    let payload_b64 = b64url_encode(serde_json::to_vec(claims)?);
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignError::Key)?;
    mac.update(signing_input(&header_b64, &payload_b64).as_bytes());
    let signature = b64url_encode(mac.finalize().into_bytes());
    Ok(format!("{header_b64}.{payload_b64}.{signature}"))
}

/// Verify a token against `secret` at time `now`, returning its claims.
pub fn verify(token: &str, secret: &[u8], now: i64) -> Option<Claims> {
    let mut segments = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };

    let header: Value = serde_json::from_slice(&b64url_decode(header_b64)?).ok()?;
    if header.get("alg").and_then(Value::as_str) != Some(ALG) {
        return None;
    }

    // verify_slice compares in constant time
    let signature = b64url_decode(signature_b64)?;
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(signing_input(header_b64, payload_b64).as_bytes());
    mac.verify_slice(&signature).ok()?;

    let payload: Value = serde_json::from_slice(&b64url_decode(payload_b64)?).ok()?;
    if !payload.is_object() {
        return None;
    }
    let claims = serde_json::from_value::<WireClaims>(payload)
        .ok()?
        .into_claims(now)?;

    if claims.expires_at < now {
        return None;
    }
    if claims.issued_at.saturating_sub(now) > MAX_FUTURE_SKEW_SECS {
        return None;
    }
    Some(claims)
}

fn signing_input(header_b64: &str, payload_b64: &str) -> String {
    format!("{header_b64}.{payload_b64}")
}

/// Claims as they may appear on the wire from older or foreign issuers.
#[derive(Deserialize)]
struct WireClaims {
    #[serde(default)]
    iat: Value,
    #[serde(default)]
    exp: Value,
    #[serde(default)]
    scope: Value,
    #[serde(default)]
    scopes: Value,
    #[serde(default)]
    sub: Value,
}

impl WireClaims {
    /// `exp` is mandatory; a missing `iat` counts as issued now.
    fn into_claims(self, now: i64) -> Option<Claims> {
        let issued_at = match self.iat {
            Value::Null => now,
            iat => epoch_secs(&iat)?,
        };
        let scope = if is_falsy(&self.scope) {
            self.scopes
        } else {
            self.scope
        };
        Some(Claims {
            issued_at,
            expires_at: epoch_secs(&self.exp)?,
            scope: scope_set(scope),
            subject: match self.sub {
                Value::String(s) => s,
                _ => String::new(),
            },
        })
    }
}

/// Integers, floats (truncated) and numeric strings.
fn epoch_secs(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Accepts a single scope string or an array of them.
///
/// Any other non-empty value is kept as its JSON text. It can never equal a
/// real scope, and it keeps the set non-empty so the token cannot pass as
/// unscoped.
fn scope_set(value: Value) -> BTreeSet<String> {
    if is_falsy(&value) {
        return BTreeSet::new();
    }
    match value {
        Value::String(s) => BTreeSet::from([s]),
        Value::Array(items) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        other => BTreeSet::from([other.to_string()]),
    }
}

/// Sign arbitrary header and payload text, for tests that need tokens this
/// crate would never issue.
#[cfg(test)]
pub(crate) fn sign_raw(header: &str, payload: &str, secret: &[u8]) -> String {
    let h = b64url_encode(header);
    let p = b64url_encode(payload);
    let mut mac = HmacSha256::new_from_slice(secret).expect("any key length is accepted");
    mac.update(signing_input(&h, &p).as_bytes());
    format!("{h}.{p}.{}", b64url_encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{ANONYMOUS_SUBJECT, CHAT_SCOPE};

    const SECRET: &[u8] = b"test-secret";
    const NOW: i64 = 1_700_000_000;

    fn claims(iat: i64, exp: i64) -> Claims {
        Claims {
            issued_at: iat,
            expires_at: exp,
            scope: BTreeSet::from([CHAT_SCOPE.to_string()]),
            subject: ANONYMOUS_SUBJECT.into(),
        }
    }

    fn sign_default(c: &Claims, secret: &[u8]) -> String {
        sign(&TokenHeader::default(), c, secret).unwrap()
    }

    /// Sign an arbitrary JSON payload, bypassing the typed claims.
    #[test]
    fn sign_then_verify_round_trips() {
        let c = claims(NOW, NOW + 900);
        assert_eq!(verify(&sign_default(&c, SECRET), SECRET, NOW), Some(c));
    }

    #[test]
    fn token_has_three_unpadded_segments_and_compact_header() {
        let token = sign_default(&claims(NOW, NOW + 900), SECRET);
        let segments: Vec<&str> = token.split('.').collect();
        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|s| !s.contains('=')));
        let header = b64url_decode(segments[0]).unwrap();
        assert_eq!(header, br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = b64url_decode(segments[1]).unwrap();
        assert_eq!(
            String::from_utf8(payload).unwrap(),
            format!(
                r#"{{"iat":{NOW},"exp":{},"scope":["ai:chat"],"sub":"anonymous"}}"#,
                NOW + 900
            )
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = sign_default(&claims(NOW, NOW + 900), b"secret-one");
        assert!(verify(&token, b"secret-two", NOW).is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = sign_default(&claims(NOW - 900, NOW - 1), SECRET);
        assert!(verify(&token, SECRET, NOW).is_none());
    }

    #[test]
    fn token_expiring_now_is_still_valid() {
        let token = sign_default(&claims(NOW - 900, NOW), SECRET);
        assert!(verify(&token, SECRET, NOW).is_some());
    }

    #[test]
    fn future_issued_at_beyond_skew_is_rejected() {
        let token = sign_default(&claims(NOW + 121, NOW + 1000), SECRET);
        assert!(verify(&token, SECRET, NOW).is_none());

        let token = sign_default(&claims(NOW + 120, NOW + 1000), SECRET);
        assert!(verify(&token, SECRET, NOW).is_some());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let token = sign_default(&claims(NOW, NOW + 900), SECRET);
        let forged = b64url_encode(
            br#"{"iat":1700000000,"exp":9999999999,"scope":["ai:chat","admin"],"sub":"anonymous"}"#,
        );
        let segments: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.{}", segments[0], forged, segments[2]);
        assert!(verify(&tampered, SECRET, NOW).is_none());
    }

    #[test]
    fn single_bit_flip_in_header_is_rejected() {
        let token = sign_default(&claims(NOW, NOW + 900), SECRET);
        let segments: Vec<&str> = token.split('.').collect();
        let mut header = b64url_decode(segments[0]).unwrap();
        // flip a bit inside the "typ" value so the header stays valid JSON
        let idx = header.len() - 3;
        header[idx] ^= 0x01;
        let tampered = format!("{}.{}.{}", b64url_encode(header), segments[1], segments[2]);
        assert!(verify(&tampered, SECRET, NOW).is_none());
    }

    #[test]
    fn non_hs256_algorithm_is_rejected() {
        let payload = format!(r#"{{"iat":{NOW},"exp":{}}}"#, NOW + 900);
        let token = sign_raw(r#"{"alg":"none","typ":"JWT"}"#, &payload, SECRET);
        assert!(verify(&token, SECRET, NOW).is_none());
        let token = sign_raw(r#"{"typ":"JWT"}"#, &payload, SECRET);
        assert!(verify(&token, SECRET, NOW).is_none());
    }

    #[test]
    fn wrong_segment_count_is_rejected() {
        let token = sign_default(&claims(NOW, NOW + 900), SECRET);
        assert!(verify(&format!("{token}.extra"), SECRET, NOW).is_none());
        let two: Vec<&str> = token.split('.').take(2).collect();
        assert!(verify(&two.join("."), SECRET, NOW).is_none());
    }

    #[test]
    fn arbitrary_garbage_is_rejected_without_panicking() {
        for input in ["", ".", "..", "...", "a.b.c", "!!.??.**", "\u{0}.\u{1}.\u{2}", "éé.éé.éé"] {
            assert!(verify(input, SECRET, NOW).is_none(), "{input:?}");
        }
    }

    #[test]
    fn missing_exp_is_rejected() {
        let token = sign_raw(
            r#"{"alg":"HS256","typ":"JWT"}"#,
            &format!(r#"{{"iat":{NOW}}}"#),
            SECRET,
        );
        assert!(verify(&token, SECRET, NOW).is_none());
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let token = sign_raw(r#"{"alg":"HS256"}"#, "[1700000000,9999999999]", SECRET);
        assert!(verify(&token, SECRET, NOW).is_none());
    }

    #[test]
    fn missing_iat_counts_as_now() {
        let token = sign_raw(
            r#"{"alg":"HS256"}"#,
            &format!(r#"{{"exp":{}}}"#, NOW + 60),
            SECRET,
        );
        let c = verify(&token, SECRET, NOW).unwrap();
        assert_eq!(c.issued_at, NOW);
        assert!(c.scope.is_empty());
        assert_eq!(c.subject, "");
    }

    #[test]
    fn scope_accepts_string_and_scopes_alias() {
        let token = sign_raw(
            r#"{"alg":"HS256"}"#,
            &format!(r#"{{"iat":{NOW},"exp":{},"scope":"ai:chat"}}"#, NOW + 60),
            SECRET,
        );
        assert!(verify(&token, SECRET, NOW).unwrap().has_scope(CHAT_SCOPE));

        let token = sign_raw(
            r#"{"alg":"HS256"}"#,
            &format!(
                r#"{{"iat":{NOW},"exp":{},"scope":[],"scopes":["ai:chat","ai:chat"]}}"#,
                NOW + 60
            ),
            SECRET,
        );
        let c = verify(&token, SECRET, NOW).unwrap();
        assert_eq!(c.scope.len(), 1);
        assert!(c.has_scope(CHAT_SCOPE));
    }

    #[test]
    fn padded_segments_still_verify() {
        let token = sign_default(&claims(NOW, NOW + 900), SECRET);
        let segments: Vec<&str> = token.split('.').collect();
        let pad = |s: &str| format!("{s}{}", "=".repeat((4 - s.len() % 4) % 4));
        let padded = format!("{}.{}.{}", pad(segments[0]), pad(segments[1]), pad(segments[2]));
        // padding changes the signing input, so the signature no longer matches
        assert!(verify(&padded, SECRET, NOW).is_none());
        // but a padded signature segment alone is decoded leniently
        let sig_padded = format!("{}.{}.{}", segments[0], segments[1], pad(segments[2]));
        assert!(verify(&sig_padded, SECRET, NOW).is_some());
    }

    #[test]
    fn non_string_scope_values_never_read_as_unscoped() {
        for scope in [r#"[1]"#, r#"5"#, r#"{"x":1}"#, r#"[""]"#, r#"true"#] {
            let token = sign_raw(
                r#"{"alg":"HS256"}"#,
                &format!(r#"{{"iat":{NOW},"exp":{},"scope":{scope}}}"#, NOW + 60),
                SECRET,
            );
            let c = verify(&token, SECRET, NOW).unwrap();
            assert!(!c.scope.is_empty(), "scope {scope}");
            assert!(!c.has_scope(CHAT_SCOPE), "scope {scope}");
        }
    }

    #[test]
    fn falsy_scope_falls_back_to_scopes_alias() {
        for scope in ["null", "0", "false", "{}", r#""""#] {
            let token = sign_raw(
                r#"{"alg":"HS256"}"#,
                &format!(
                    r#"{{"iat":{NOW},"exp":{},"scope":{scope},"scopes":["ai:chat"]}}"#,
                    NOW + 60
                ),
                SECRET,
            );
            assert!(verify(&token, SECRET, NOW).unwrap().has_scope(CHAT_SCOPE), "scope {scope}");
        }
    }

    #[test]
    fn float_timestamps_and_foreign_subject_are_tolerated() {
        let token = sign_raw(
            r#"{"alg":"HS256"}"#,
            &format!(r#"{{"iat":{NOW}.7,"exp":{}.0,"sub":42}}"#, NOW + 60),
            SECRET,
        );
        let c = verify(&token, SECRET, NOW).unwrap();
        assert_eq!(c.issued_at, NOW);
        assert_eq!(c.expires_at, NOW + 60);
        assert_eq!(c.subject, "");

        let token = sign_raw(
            r#"{"alg":"HS256"}"#,
            &format!(r#"{{"iat":{NOW},"exp":"soon"}}"#),
            SECRET,
        );
        assert!(verify(&token, SECRET, NOW).is_none());
    }
}
