//! Error taxonomy for the segment orchestration engine.
//!
//! Mirrors the shape of the teacher's `HlsError`: one `thiserror` enum with a
//! variant per failure family and `#[from]` conversions at the I/O boundary.
//! The variants here map directly onto the boundary taxonomy of spec §7
//! (NotReady / NotFound / Transient / ResourceExhausted / SupervisorFailure).

use thiserror::Error;

/// Result type alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The requested artifact is expected to appear soon; retry.
    #[error("not ready: {0}")]
    NotReady(String),

    /// Unknown video, unknown variant, or a segment that will never be produced.
    #[error("not found: {0}")]
    NotFound(String),

    /// Probe failure, unreachable source, or another recoverable-by-retry fault.
    #[error("transient failure: {0}")]
    Transient(String),

    /// No hardware slot or no transcoding slot available under the concurrency caps.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The encoder subprocess exited non-zero; the owning task is flagged `needs_restart`.
    #[error("encoder process failed: {0}")]
    SupervisorFailure(String),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A malformed or out-of-range configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// A persisted JSON artifact (variant info, codec reference) failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CoreError {
    pub fn not_ready(msg: impl Into<String>) -> Self {
        CoreError::NotReady(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        CoreError::Transient(msg.into())
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        CoreError::ResourceExhausted(msg.into())
    }

    pub fn supervisor_failure(msg: impl Into<String>) -> Self {
        CoreError::SupervisorFailure(msg.into())
    }

    /// Classification used by the HTTP surface to pick a status code without
    /// the server crate needing to match on every variant itself.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotReady(_) => ErrorKind::NotReady,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Transient(_) | CoreError::Io(_) | CoreError::Serde(_) => {
                ErrorKind::Transient
            }
            CoreError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            CoreError::SupervisorFailure(_) => ErrorKind::SupervisorFailure,
            CoreError::Config(_) => ErrorKind::Transient,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotReady,
    NotFound,
    Transient,
    ResourceExhausted,
    SupervisorFailure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_not_ready() {
        assert_eq!(CoreError::not_ready("x").kind(), ErrorKind::NotReady);
    }

    #[test]
    fn kind_maps_not_found() {
        assert_eq!(CoreError::not_found("x").kind(), ErrorKind::NotFound);
    }

    #[test]
    fn io_error_is_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(CoreError::from(io).kind(), ErrorKind::Transient);
    }
}
