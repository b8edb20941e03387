//! Issue-token handler.

use chatgate_core::issuer::{IssueTokenRequest, TokenIssuer};
use chatgate_core::time::now_epoch_secs;
use serde::Serialize;
use tracing::info;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::invocation::{InboundRequest, InvocationContext, OutboundResponse};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: i64,
    pub request_id: String,
}

/// `POST /auth/refresh`: issue a short-lived access token.
///
/// The body may carry `originalTransactionId`; an unreadable body is treated
/// as empty.
pub async fn issue_token(
    state: &AppState,
    request: &InboundRequest,
    ctx: &InvocationContext,
) -> OutboundResponse {
    match issue(state, request, ctx).await {
        Ok(resp) => resp,
        Err(e) => e.into_outbound(ctx, &state.config.service),
    }
}

async fn issue(
    state: &AppState,
    request: &InboundRequest,
    ctx: &InvocationContext,
) -> AppResult<OutboundResponse> {
    let body = request.decoded_body().ok();
    let req = IssueTokenRequest::parse(body.as_deref());

    let issuer = TokenIssuer::new(&state.config, state.entitlements.as_ref());
    let issued = issuer.issue(&req, now_epoch_secs()).await?;
    info!(
        request_id = %ctx.request_id,
        grant = ?issued.grant,
        expires_at = issued.expires_at,
        "issued access token"
    );

    let body = serde_json::to_string(&TokenResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        request_id: ctx.request_id.clone(),
    })
    .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(OutboundResponse::json(200, body, ctx, &state.config.service))
}
