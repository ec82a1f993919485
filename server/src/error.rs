//! Server-specific error types, wrapping `hls_gateway_core::CoreError` the
//! way `hls-vod-server/src/error.rs` wraps `HlsError` (spec §9a).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hls_gateway_core::{CoreError, ErrorKind};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("orchestration error: {0}")]
    Core(#[from] CoreError),

    #[error("unknown video: {0}")]
    UnknownVideo(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Status code per the boundary taxonomy of spec §7. `ResourceExhausted`
    /// and `SupervisorFailure` are internal-only (spec §7) and degrade
    /// silently inside the core, so they only reach here as a generic 500.
    fn status(&self) -> StatusCode {
        match self {
            ServerError::Core(e) => match e.kind() {
                ErrorKind::NotReady => StatusCode::ACCEPTED,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Transient => StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::ResourceExhausted | ErrorKind::SupervisorFailure => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ServerError::UnknownVideo(_) => StatusCode::NOT_FOUND,
            ServerError::Config(_) | ServerError::Internal(_) | ServerError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Short, path-free body text (spec §7: "do not leak paths").
        let body = match &self {
            ServerError::Core(e) => e.kind_message(),
            ServerError::UnknownVideo(_) => "unknown video".to_string(),
            _ => "internal server error".to_string(),
        };
        (status, body).into_response()
    }
}

trait KindMessage {
    fn kind_message(&self) -> String;
}

impl KindMessage for CoreError {
    fn kind_message(&self) -> String {
        match self.kind() {
            ErrorKind::NotReady => "not ready, retry shortly".to_string(),
            ErrorKind::NotFound => "not found".to_string(),
            _ => "internal server error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_maps_to_202() {
        let err = ServerError::Core(CoreError::not_ready("x"));
        assert_eq!(err.status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = ServerError::Core(CoreError::not_found("x"));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn transient_maps_to_500() {
        let err = ServerError::Core(CoreError::transient("x"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
