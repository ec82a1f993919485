//! Router assembly for the fixed path table of spec §6.
//!
//! Grounded on `hls-vod-server/src/http/mod.rs`'s `create_router` shape:
//! one route group per resource kind, CORS and request-logging layered on
//! top via `tower-http`, with the rate/connection limiters from
//! `crate::limits` wrapped around the whole router rather than per-route.

pub mod handlers;
pub mod middleware;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request};
use axum::middleware::{from_fn, from_fn_with_state, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::limits::{connection_limit_middleware, rate_limit_middleware};
use crate::metrics::metrics_handler;
use crate::state::AppState;

/// `rate_limit_middleware`/`connection_limit_middleware` key off a bare
/// `SocketAddr` request extension; axum's connect-info service only ever
/// inserts the wrapped `ConnectInfo<SocketAddr>`, so this unwraps it once at
/// the edge of the stack.
async fn insert_peer_addr(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    request.extensions_mut().insert(addr);
    next.run(request).await
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let video_routes = Router::new()
        .route("/api/stream/{id}/master.m3u8", get(handlers::master_playlist))
        .route(
            "/api/stream/{id}/{variant}/playlist.m3u8",
            get(handlers::variant_playlist),
        )
        .route(
            "/api/stream/{id}/{variant}/iframe_playlist.m3u8",
            get(handlers::iframe_playlist),
        )
        .route(
            "/api/stream/{id}/{variant}/{segment}",
            get(handlers::variant_segment),
        )
        .route(
            "/api/stream/{id}/audio/{track}/playlist.m3u8",
            get(handlers::audio_playlist),
        )
        .route(
            "/api/stream/{id}/audio/{track}/{segment}",
            get(handlers::audio_segment),
        );

    let system_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/version", get(handlers::version_check))
        .route("/metrics", get(metrics_handler).with_state(state.metrics.clone()));

    video_routes
        .merge(system_routes)
        .route_layer(from_fn_with_state(
            state.connection_limiter.clone(),
            connection_limit_middleware,
        ))
        .route_layer(from_fn_with_state(state.rate_limiter.clone(), rate_limit_middleware))
        .route_layer(from_fn(insert_peer_addr))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(from_fn(middleware::request_logger))
        .with_state(state)
}
