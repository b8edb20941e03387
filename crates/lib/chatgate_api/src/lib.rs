//! # chatgate_api
//!
//! Invocation handlers and HTTP router for Chatgate.

pub mod error;
pub mod handlers;
pub mod invocation;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use chatgate_core::config::GatewayConfig;
use chatgate_core::entitlement::{AppStoreEntitlements, EntitlementCheck};
use chatgate_core::time::{Sleeper, TokioSleeper};
use chatgate_core::upstream::{ReqwestTransport, UpstreamTransport};
use tower_http::cors::{Any, CorsLayer};

use crate::handlers::{chat, issue_token};
use crate::invocation::{InboundRequest, InvocationContext};

/// Route paths.
pub mod routes {
    pub const POST_AUTH_REFRESH: &str = "/auth/refresh";
    pub const POST_AI_CHAT: &str = "/ai/chat";
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Gateway configuration, read once at startup.
    pub config: Arc<GatewayConfig>,
    pub entitlements: Arc<dyn EntitlementCheck>,
    pub transport: Arc<dyn UpstreamTransport>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl AppState {
    /// Production wiring: App Store lookups and upstream calls share one
    /// `reqwest::Client`.
    pub fn new(config: GatewayConfig) -> Self {
        let client = reqwest::Client::new();
        let entitlements = AppStoreEntitlements::new(client.clone(), config.app_store.clone());
        Self {
            config: Arc::new(config),
            entitlements: Arc::new(entitlements),
            transport: Arc::new(ReqwestTransport::new(client)),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    fn start_invocation(&self) -> InvocationContext {
        InvocationContext::start(Duration::from_millis(self.config.invocation_timeout_ms))
    }
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(routes::POST_AUTH_REFRESH, post(issue_token_route))
        .route(routes::POST_AI_CHAT, post(chat_route))
        .layer(cors)
        .with_state(state)
}

async fn issue_token_route(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ctx = state.start_invocation();
    let request = InboundRequest::from_http(headers, body);
    issue_token::issue_token(&state, &request, &ctx)
        .await
        .into_response()
}

async fn chat_route(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let ctx = state.start_invocation();
    let request = InboundRequest::from_http(headers, body);
    chat::chat_proxy(&state, &request, &ctx).await.into_response()
}
