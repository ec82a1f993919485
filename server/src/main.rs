//! On-demand adaptive-bitrate HLS streaming gateway.
//!
//! Serves segments transcoded on first request and reused for every
//! subsequent one, coordinated by `hls_gateway_core::Orchestrator`.

#![allow(dead_code)]

mod config;
mod encoder_planner_ffmpeg;
mod error;
mod http;
mod limits;
mod master_playlist;
mod metrics;
mod prober;
mod sources;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::http::create_router;
use crate::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_NAME: &str = "hls-gateway-server";

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    tracing::info!("{} v{} starting", APP_NAME, VERSION);

    let config = ServerConfig::from_env();
    tracing::info!("configuration loaded: {:?}", config);

    let state = Arc::new(AppState::new(config.clone()));
    state.spawn_janitor();

    let app = create_router(state.clone());

    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| crate::error::ServerError::Config(format!("invalid bind address: {}", e)))?;
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(crate::error::ServerError::Io)?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| crate::error::ServerError::Internal(e.to_string()))?;

    Ok(())
}

/// Grounded on `hls-vod-server`'s `init_logging`, widened to the new crate
/// names.
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hls_gateway_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
