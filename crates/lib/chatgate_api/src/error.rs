//! Application error types.

use axum::http::StatusCode;
use chatgate_core::authorizer::AuthError;
use chatgate_core::config::ServiceIdentity;
use chatgate_core::issuer::IssueError;
use chatgate_core::sanitize::SanitizeError;
use chatgate_core::upstream::ProxyError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::invocation::{InvocationContext, OutboundResponse};

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Server misconfigured: {0}")]
    Misconfiguration(String),

    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Model not allowed: {0}")]
    ModelNotAllowed(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal server error")]
    Internal(String),
}

/// Uniform error envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub request_id: String,
}

impl AppError {
    /// Status, machine code and caller-facing message.
    pub fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Misconfiguration(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_misconfigured",
                m.as_str(),
            ),
            AppError::NotAuthenticated(m) => {
                (StatusCode::UNAUTHORIZED, "not_authenticated", m.as_str())
            }
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.as_str()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m.as_str()),
            AppError::ModelNotAllowed(m) => {
                (StatusCode::BAD_REQUEST, "model_not_allowed", m.as_str())
            }
            AppError::PayloadTooLarge(m) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", m.as_str())
            }
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error",
            ),
        }
    }

    /// Log the failure and render it as an envelope response.
    pub fn into_outbound(self, ctx: &InvocationContext, service: &ServiceIdentity) -> OutboundResponse {
        let (status, code, message) = self.parts();
        match &self {
            AppError::Internal(detail) => {
                error!(request_id = %ctx.request_id, code, detail = %detail, "request failed")
            }
            _ => warn!(
                request_id = %ctx.request_id,
                code,
                status = status.as_u16(),
                reason = message,
                "request rejected"
            ),
        }
        let body = ErrorResponse {
            error: code.to_string(),
            message: message.to_string(),
            request_id: ctx.request_id.clone(),
        };
        let body = serde_json::to_string(&body)
            .unwrap_or_else(|_| format!(r#"{{"error":"{code}"}}"#));
        OutboundResponse::json(status.as_u16(), body, ctx, service)
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            // the specific cause stays in the logs
            AuthError::NotAuthenticated(cause) => {
                tracing::debug!(cause, "bearer token rejected");
                AppError::NotAuthenticated("Missing or invalid bearer token".into())
            }
            AuthError::Forbidden(scope) => AppError::Forbidden(format!("Missing {scope} scope")),
        }
    }
}

impl From<SanitizeError> for AppError {
    fn from(e: SanitizeError) -> Self {
        match e {
            SanitizeError::BadRequest(msg) => AppError::BadRequest(msg.into()),
            SanitizeError::ModelNotAllowed(_) => AppError::ModelNotAllowed(e.to_string()),
        }
    }
}

impl From<ProxyError> for AppError {
    fn from(e: ProxyError) -> Self {
        match e {
            ProxyError::PayloadTooLarge { size, limit } => {
                tracing::debug!(size, limit, "upstream payload over limit");
                AppError::PayloadTooLarge("Request body too large".into())
            }
            ProxyError::Serialize(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<IssueError> for AppError {
    fn from(e: IssueError) -> Self {
        match e {
            IssueError::MissingSecret => AppError::Misconfiguration("missing JWT_SECRET".into()),
            IssueError::Signing(e) => AppError::Internal(e.to_string()),
        }
    }
}
