//! Host-neutral invocation records.
//!
//! Handlers see a request as headers plus an optional, possibly base64
//! encoded body, together with a context carrying the request id and the
//! invocation deadline. They answer with a status, headers and a JSON body.

use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chatgate_core::config::ServiceIdentity;
use uuid::Uuid;

/// Remaining budget assumed when the host reports no deadline.
pub const DEFAULT_REMAINING_MILLIS: i64 = 30_000;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_SVC_NAME: HeaderName = HeaderName::from_static("x-svc-name");
pub const X_SVC_STAGE: HeaderName = HeaderName::from_static("x-svc-stage");
pub const X_FUNC_NAME: HeaderName = HeaderName::from_static("x-func-name");

/// The body was flagged as base64 but did not decode to UTF-8 text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyDecodeError;

/// An inbound request as delivered by the host.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub headers: HeaderMap,
    pub body: Option<String>,
    pub is_base64_encoded: bool,
}

impl InboundRequest {
    /// Wrap raw HTTP parts. Bodies that are not UTF-8 are carried as base64.
    pub fn from_http(headers: HeaderMap, body: Bytes) -> Self {
        if body.is_empty() {
            return Self {
                headers,
                body: None,
                is_base64_encoded: false,
            };
        }
        match String::from_utf8(body.to_vec()) {
            Ok(text) => Self {
                headers,
                body: Some(text),
                is_base64_encoded: false,
            },
            Err(_) => Self {
                headers,
                body: Some(STANDARD.encode(&body)),
                is_base64_encoded: true,
            },
        }
    }

    /// Body text with base64 undone. A missing or empty body reads as `{}`.
    pub fn decoded_body(&self) -> Result<String, BodyDecodeError> {
        let raw = match self.body.as_deref() {
            None | Some("") => return Ok("{}".to_string()),
            Some(raw) => raw,
        };
        if !self.is_base64_encoded {
            return Ok(raw.to_string());
        }
        let bytes = STANDARD.decode(raw).map_err(|_| BodyDecodeError)?;
        String::from_utf8(bytes).map_err(|_| BodyDecodeError)
    }
}

/// Per-invocation facts supplied by the host.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub request_id: String,
    pub deadline: Option<Instant>,
}

impl InvocationContext {
    /// Fresh context with a random request id and a deadline `budget` from now.
    pub fn start(budget: Duration) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            deadline: Instant::now().checked_add(budget),
        }
    }

    pub fn remaining_millis(&self) -> i64 {
        match self.deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                i64::try_from(left.as_millis()).unwrap_or(i64::MAX)
            }
            None => DEFAULT_REMAINING_MILLIS,
        }
    }
}

/// A response ready to hand back to the host.
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status_code: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl OutboundResponse {
    /// JSON response carrying the request id and configured diagnostic headers.
    pub fn json(
        status_code: u16,
        body: String,
        ctx: &InvocationContext,
        service: &ServiceIdentity,
    ) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        insert_header(&mut headers, X_REQUEST_ID, Some(&ctx.request_id));
        insert_header(&mut headers, X_SVC_NAME, service.name.as_deref());
        insert_header(&mut headers, X_SVC_STAGE, service.stage.as_deref());
        insert_header(&mut headers, X_FUNC_NAME, service.function_name.as_deref());
        Self {
            status_code,
            headers,
            body,
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: Option<&str>) {
    // values that are not valid header text are left out
    if let Some(value) = value.and_then(|v| HeaderValue::from_str(v).ok()) {
        headers.insert(name, value);
    }
}

impl IntoResponse for OutboundResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
        *response.headers_mut() = self.headers;
        response
    }
}
