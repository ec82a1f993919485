//! Server-side configuration: the core's env-var `Config` (spec §6) plus the
//! HTTP-surface-only knobs the teacher split into `ServerConfig`.
//!
//! Unlike `hls-vod-server/src/config.rs`/`config_file.rs`, this gateway takes
//! no TOML file — every knob is read from the process environment, per
//! SPEC_FULL.md §9a.

use hls_gateway_core::Config as CoreConfig;

/// Bind address, rate/connection limits, and the wrapped core `Config`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub bind_port: u16,
    pub rate_limit_rps: u32,
    pub max_concurrent_streams: u32,
    pub playlist_cache_capacity: usize,
    pub core: CoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "0.0.0.0".to_string(),
            bind_port: 8080,
            rate_limit_rps: 100,
            max_concurrent_streams: 100,
            playlist_cache_capacity: 256,
            core: CoreConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build from the environment, falling back to defaults (spec §6).
    pub fn from_env() -> Self {
        let defaults = ServerConfig::default();
        ServerConfig {
            bind_addr: std::env::var("HLS_BIND_ADDR").unwrap_or(defaults.bind_addr),
            bind_port: std::env::var("HLS_BIND_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_port),
            rate_limit_rps: std::env::var("HLS_RATE_LIMIT_RPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.rate_limit_rps),
            max_concurrent_streams: std::env::var("HLS_MAX_CONCURRENT_STREAMS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_concurrent_streams),
            playlist_cache_capacity: std::env::var("HLS_PLAYLIST_CACHE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.playlist_cache_capacity),
            core: CoreConfig::from_env(),
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.bind_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.socket_addr(), "0.0.0.0:8080");
        assert_eq!(config.rate_limit_rps, 100);
    }
}
