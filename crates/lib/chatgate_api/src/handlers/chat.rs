//! Chat-proxy handler.
//!
//! Authorizes the bearer token, sanitizes the body and forwards it upstream.
//! Upstream status and body are passed through unchanged.

use chatgate_core::authorizer::authorize;
use chatgate_core::sanitize;
use chatgate_core::time::now_epoch_secs;
use chatgate_core::token::CHAT_SCOPE;
use chatgate_core::upstream::UpstreamProxy;
use tracing::{debug, info};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::invocation::{InboundRequest, InvocationContext, OutboundResponse};

/// `POST /ai/chat`: proxy a chat completion for an authorized caller.
pub async fn chat_proxy(
    state: &AppState,
    request: &InboundRequest,
    ctx: &InvocationContext,
) -> OutboundResponse {
    match proxy(state, request, ctx).await {
        Ok(resp) => resp,
        Err(e) => e.into_outbound(ctx, &state.config.service),
    }
}

async fn proxy(
    state: &AppState,
    request: &InboundRequest,
    ctx: &InvocationContext,
) -> AppResult<OutboundResponse> {
    let config = &state.config;
    let secret = config
        .jwt_secret
        .as_deref()
        .ok_or_else(|| AppError::Misconfiguration("missing JWT_SECRET".into()))?;

    let claims = authorize(&request.headers, CHAT_SCOPE, secret.as_bytes(), now_epoch_secs())?;
    debug!(request_id = %ctx.request_id, scope = ?claims.scope, "bearer token accepted");

    let body = request
        .decoded_body()
        .map_err(|_| AppError::BadRequest("Invalid JSON".into()))?;
    let raw = sanitize::parse_body(&body)?;
    // a disallowed model is the caller's fault even when the key is missing
    sanitize::resolve_model(&raw, &config.limits)?;

    let api_key = config
        .upstream
        .api_key
        .as_deref()
        .ok_or_else(|| AppError::Misconfiguration("missing OPENAI_API_KEY".into()))?;

    let payload = sanitize::sanitize(&raw, &config.limits)?;

    let proxy = UpstreamProxy::new(
        &config.upstream,
        api_key,
        state.transport.as_ref(),
        state.sleeper.as_ref(),
    );
    let upstream = proxy
        .send(&payload, ctx.remaining_millis(), config.upstream.max_retries)
        .await?;
    info!(
        request_id = %ctx.request_id,
        status = upstream.status,
        model = %payload.model,
        messages = payload.messages.len(),
        "chat proxied"
    );

    Ok(OutboundResponse::json(
        upstream.status,
        upstream.body,
        ctx,
        &config.service,
    ))
}
