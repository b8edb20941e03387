//! Chatgate HTTP server binary.
//!
//! Reads gateway configuration from the environment (a `.env` file is
//! honoured) and serves the token and chat endpoints.

use clap::Parser;
use chatgate_core::config::GatewayConfig;
use tracing::{info, warn};

/// CLI arguments for the gateway server.
#[derive(Parser, Debug)]
#[command(name = "chatgate_server", about = "Chatgate token gateway server")]
struct Args {
    /// Address to bind.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on (0 = ephemeral).
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,chatgate_api=debug,chatgate_core=debug")
            }),
        )
        .init();

    let args = Args::parse();
    let config = GatewayConfig::from_env()?;

    if config.jwt_secret.is_none() {
        warn!("JWT_SECRET is not set; every request will fail as misconfigured");
    }
    if config.upstream.api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; chat requests will fail as misconfigured");
    }
    if config.bypass_premium {
        warn!("BYPASS_PREMIUM is on: every issued token carries the chat scope");
    }
    info!(
        upstream = %config.upstream.url,
        max_retries = config.upstream.max_retries,
        app_store = config.app_store.is_some(),
        version = chatgate_core::version(),
        "starting chatgate_server"
    );

    let app = chatgate_api::router(chatgate_api::AppState::new(config));

    let listener = tokio::net::TcpListener::bind((args.bind.as_str(), args.port)).await?;
    info!(addr = %listener.local_addr()?, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
