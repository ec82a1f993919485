//! Environment-variable configuration (spec §6, expanded in §9a). Unlike the
//! teacher's `ServerConfig`/`ConfigFile` pair, this gateway takes no TOML file —
//! every knob is read directly from the process environment with a default.

use std::path::PathBuf;
use std::time::Duration;

/// Knobs governing segment production and transcoding concurrency (spec §6).
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    pub segment_time_secs: f64,
    pub segments_to_analyze: usize,
    pub iframe_enabled: bool,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig {
            segment_time_secs: 5.0,
            segments_to_analyze: crate::variant_manifest::DEFAULT_SEGMENTS_TO_ANALYZE,
            iframe_enabled: false,
        }
    }
}

/// Hardware-encode and concurrency caps (spec §6).
#[derive(Debug, Clone)]
pub struct TranscodingConfig {
    pub hardware_encoding_enabled: bool,
    pub max_hw_processes: usize,
    pub max_concurrent_transcodings: usize,
    pub max_transcodings_per_client: usize,
}

impl Default for TranscodingConfig {
    fn default() -> Self {
        TranscodingConfig {
            hardware_encoding_enabled: false,
            max_hw_processes: 2,
            max_concurrent_transcodings: 8,
            max_transcodings_per_client: 3,
        }
    }
}

/// Janitor cadence and cleanup toggles (spec §4.11).
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub sweep_interval: Duration,
    pub variant_switch_timeout: Duration,
    pub session_timeout: Duration,
    pub lock_sweep_interval: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        CleanupConfig {
            enabled: false,
            sweep_interval: Duration::from_secs(60),
            variant_switch_timeout: Duration::from_secs(20),
            session_timeout: crate::client_session::SESSION_IDLE_TIMEOUT,
            lock_sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Top-level process configuration, read once at startup (spec §6).
#[derive(Debug, Clone)]
pub struct Config {
    pub output_dir: PathBuf,
    pub source_dir: PathBuf,
    pub segment: SegmentConfig,
    pub transcoding: TranscodingConfig,
    pub cleanup: CleanupConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            output_dir: PathBuf::from("tmp/hls"),
            source_dir: PathBuf::new(),
            segment: SegmentConfig::default(),
            transcoding: TranscodingConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl Config {
    /// Build a `Config` from environment variables, falling back to the
    /// bracketed defaults of spec §6 for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            output_dir: env_path("HLS_OUTPUT_DIR", defaults.output_dir),
            source_dir: env_path("VIDEO_SOURCE_DIR", defaults.source_dir),
            segment: SegmentConfig {
                segment_time_secs: env_parsed("HLS_SEGMENT_TIME", defaults.segment.segment_time_secs),
                segments_to_analyze: env_parsed(
                    "SEGMENTS_TO_ANALYZE",
                    defaults.segment.segments_to_analyze,
                ),
                iframe_enabled: env_bool("HLS_IFRAME_ENABLED", defaults.segment.iframe_enabled),
            },
            transcoding: TranscodingConfig {
                hardware_encoding_enabled: env_bool(
                    "HARDWARE_ENCODING_ENABLED",
                    defaults.transcoding.hardware_encoding_enabled,
                ),
                max_hw_processes: env_parsed(
                    "MAX_HW_PROCESSES",
                    defaults.transcoding.max_hw_processes,
                ),
                max_concurrent_transcodings: env_parsed(
                    "MAX_CONCURRENT_TRANSCODINGS",
                    defaults.transcoding.max_concurrent_transcodings,
                ),
                max_transcodings_per_client: env_parsed(
                    "MAX_TRANSCODINGS_PER_CLIENT",
                    defaults.transcoding.max_transcodings_per_client,
                ),
            },
            cleanup: CleanupConfig {
                enabled: env_bool("ENABLE_HLS_CLEANUP", defaults.cleanup.enabled),
                ..defaults.cleanup
            },
        }
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_brackets() {
        let config = Config::default();
        assert_eq!(config.output_dir, PathBuf::from("tmp/hls"));
        assert_eq!(config.segment.segment_time_secs, 5.0);
        assert_eq!(config.segment.segments_to_analyze, 12);
        assert_eq!(config.transcoding.max_hw_processes, 2);
        assert_eq!(config.transcoding.max_concurrent_transcodings, 8);
        assert_eq!(config.transcoding.max_transcodings_per_client, 3);
        assert!(!config.transcoding.hardware_encoding_enabled);
        assert!(!config.cleanup.enabled);
    }

    #[test]
    fn env_bool_accepts_common_truthy_spellings() {
        std::env::set_var("HLS_GATEWAY_TEST_BOOL", "YES");
        assert!(env_bool("HLS_GATEWAY_TEST_BOOL", false));
        std::env::remove_var("HLS_GATEWAY_TEST_BOOL");
        assert!(!env_bool("HLS_GATEWAY_TEST_BOOL", false));
    }
}
