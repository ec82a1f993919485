//! Application state: wires the core orchestrator to the HTTP surface.
//!
//! Grounded on `hls-vod-server/src/state.rs`'s `AppState` — the per-path
//! single-flight `DashMap<_, Arc<OnceCell<_>>>` idiom it used for in-flight
//! segment generation is reused here for two independent guards: the
//! variant-catalog probe and the codec-reference write (spec §9 open
//! question: "single-flight guard keyed by VideoId").

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use hls_gateway_core::{
    ClientId, HwSlotLimiter, Janitor, Orchestrator, PathLayout, PlaylistCache, RegistryLimits,
    TaskRegistry, Variant, VideoId,
};

use crate::config::ServerConfig;
use crate::encoder_planner_ffmpeg::FfmpegEncoderPlanner;
use crate::error::{Result, ServerError};
use crate::limits::{create_connection_limiter, create_rate_limiter, ConnectionLimiter, RateLimiter};
use crate::metrics::Metrics;
use crate::prober::FfmpegSegmentProber;
use crate::sources;

type VariantCatalogCell = Arc<OnceCell<std::result::Result<Arc<Vec<Variant>>, String>>>;

pub struct AppState {
    pub config: ServerConfig,
    pub layout: PathLayout,
    pub orchestrator: Arc<Orchestrator>,
    pub janitor: Arc<Janitor>,
    pub playlists: PlaylistCache,
    pub metrics: Arc<Metrics>,
    pub rate_limiter: Arc<RateLimiter>,
    pub connection_limiter: Arc<ConnectionLimiter>,
    prober: Arc<FfmpegSegmentProber>,
    variant_catalog: DashMap<VideoId, VariantCatalogCell>,
    codec_reference: DashMap<VideoId, Arc<OnceCell<()>>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let layout = PathLayout::new(config.core.output_dir.clone());
        let tasks = Arc::new(TaskRegistry::new(RegistryLimits {
            max_concurrent_transcodings: config.core.transcoding.max_concurrent_transcodings,
            max_transcodings_per_client: config.core.transcoding.max_transcodings_per_client,
        }));
        let sessions = Arc::new(hls_gateway_core::ClientSessionTracker::new());
        let hw_slots = HwSlotLimiter::new(config.core.transcoding.max_hw_processes);
        let planner = Arc::new(FfmpegEncoderPlanner::new());

        let orchestrator = Arc::new(Orchestrator::new(
            layout.clone(),
            tasks.clone(),
            sessions.clone(),
            hw_slots,
            planner,
        ));

        let janitor = Arc::new(Janitor::new(
            tasks,
            sessions,
            layout.clone(),
            config.core.cleanup.variant_switch_timeout,
        ));

        let playlists = PlaylistCache::new(config.playlist_cache_capacity);
        let rate_limiter = create_rate_limiter(&config);
        let connection_limiter = create_connection_limiter(&config);

        AppState {
            config,
            layout,
            orchestrator,
            janitor,
            playlists,
            metrics: Arc::new(Metrics::new()),
            rate_limiter,
            connection_limiter,
            prober: Arc::new(FfmpegSegmentProber::new()),
            variant_catalog: DashMap::new(),
            codec_reference: DashMap::new(),
        }
    }

    pub fn prober(&self) -> &FfmpegSegmentProber {
        &self.prober
    }

    /// Resolve `video_id` to its source file path (spec §1: server-side
    /// source discovery, kept out of the core).
    pub fn resolve_source(&self, video_id: &VideoId) -> Result<std::path::PathBuf> {
        sources::resolve_source_path(&self.config.core.source_dir, video_id)
            .map_err(ServerError::Core)
    }

    /// Probe the source once per video and cache the resulting variant
    /// ladder, de-duplicating concurrent first-requests the way
    /// `hls-vod-server`'s `indexing_in_flight` map de-duplicated indexing.
    pub async fn variant_catalog(&self, video_id: &VideoId) -> Result<Arc<Vec<Variant>>> {
        let cell = self
            .variant_catalog
            .entry(video_id.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let source_path = self.resolve_source(video_id)?;
        let result = cell
            .get_or_init(|| async move {
                sources::discover_variants(&source_path)
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            })
            .await;

        match result {
            Ok(variants) => Ok(variants.clone()),
            Err(message) => {
                // Don't poison the cache on a transient probe failure: the next
                // caller should retry rather than inherit a permanent error.
                self.variant_catalog.remove(video_id);
                Err(ServerError::Internal(message.clone()))
            }
        }
    }

    /// Look up one variant in the catalog by label.
    pub async fn find_variant(&self, video_id: &VideoId, label: &str) -> Result<Variant> {
        let catalog = self.variant_catalog(video_id).await?;
        catalog
            .iter()
            .find(|v| v.label.as_str() == label.to_lowercase())
            .cloned()
            .ok_or_else(|| ServerError::UnknownVideo(format!("{}/{}", video_id, label)))
    }

    /// Ensure `codec_reference.json` exists for `video_id`, guarded by a
    /// single-flight cell per spec §9's open question on codec-reference
    /// write races.
    pub async fn ensure_codec_reference(&self, video_id: &VideoId) -> Result<()> {
        let cell = self
            .codec_reference
            .entry(video_id.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let path = self.layout.codec_reference_path(video_id);
        let catalog = self.variant_catalog(video_id).await?;
        cell.get_or_init(|| async move {
            if tokio::fs::metadata(&path).await.is_ok() {
                return;
            }
            if let Some(parent) = path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            let doc = serde_json::json!({
                "variants": catalog.iter().map(|v| v.label.as_str()).collect::<Vec<_>>(),
            });
            if let Ok(bytes) = serde_json::to_vec_pretty(&doc) {
                let tmp = path.with_extension("json.tmp");
                if tokio::fs::write(&tmp, &bytes).await.is_ok() {
                    let _ = tokio::fs::rename(&tmp, &path).await;
                }
            }
        })
        .await;
        Ok(())
    }

    /// Opportunistically build `info.json`/`audio_info.json` once enough
    /// leading segments of a variant exist, mirroring the teacher's
    /// lazy, on-first-sufficient-access `cache.rs` population. Best-effort:
    /// failures (segments not yet stable, prober error) are logged and
    /// retried on the next request, never surfaced to the caller.
    pub fn maybe_build_variant_info(self: &Arc<Self>, video_id: &VideoId, variant: &Variant) {
        let state = self.clone();
        let video_id = video_id.clone();
        let variant = variant.clone();
        tokio::spawn(async move {
            let is_audio = variant.kind == hls_gateway_core::VariantKind::Audio;
            let info_path = state.layout.variant_info_path(&video_id, &variant.label, is_audio);
            if tokio::fs::metadata(&info_path).await.is_ok() {
                return;
            }
            let dir = state.layout.variant_dir(&video_id, &variant.label);
            let store = hls_gateway_core::segment_store::SegmentStore::new();
            let ranges = match store.scan_ranges(&dir, hls_gateway_core::DEFAULT_SEGMENT_EXT) {
                Ok(r) => r,
                Err(_) => return,
            };
            let Some(first) = ranges.first() else { return };
            let segments_to_analyze = state.config.core.segment.segments_to_analyze;
            let segment_paths: Vec<_> = (first.start..=first.end)
                .take(segments_to_analyze)
                .map(|i| {
                    state
                        .layout
                        .segment_path(&video_id, &variant.label, i, hls_gateway_core::DEFAULT_SEGMENT_EXT)
                })
                .collect();
            if segment_paths.is_empty() {
                return;
            }
            let manifest = hls_gateway_core::VariantManifest::new(state.prober.as_ref());
            if let Err(e) = manifest
                .ensure(&info_path, &segment_paths, is_audio, segments_to_analyze)
                .await
            {
                tracing::debug!("variant info build for {}/{} deferred: {}", video_id, variant.label, e);
            }
        });
    }

    /// Spawn the periodic maintenance loop (spec §4.11); called once from
    /// `main`. A no-op when `ENABLE_HLS_CLEANUP` is unset, matching the
    /// teacher's opt-in `cleanup_expired_streams` background task.
    pub fn spawn_janitor(self: &Arc<Self>) {
        if !self.config.core.cleanup.enabled {
            return;
        }
        let janitor = self.janitor.clone();
        let sweep_interval = self.config.core.cleanup.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                interval.tick().await;
                janitor.sweep_idle_sessions().await;
                janitor.sweep_inactive_variants().await;
                janitor.reap_dead_tasks();
            }
        });

        // The stale session-lock sweep runs on its own, much coarser cadence
        // (spec §4.11: every 10 minutes, separate from the 1-minute sweep above).
        let janitor = self.janitor.clone();
        let lock_sweep_interval = self.config.core.cleanup.lock_sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(lock_sweep_interval);
            loop {
                interval.tick().await;
                if let Err(e) = janitor.sweep_stale_locks().await {
                    tracing::warn!("stale-lock sweep failed: {}", e);
                }
            }
        });
    }
}

/// Derive a stable per-connection `ClientId` from remote address and
/// user-agent, since this gateway has no authenticated session identity
/// (spec §3: `ClientId` is opaque to the core).
pub fn client_id(remote: SocketAddr, user_agent: Option<&str>) -> ClientId {
    let mut hasher = DefaultHasher::new();
    remote.ip().hash(&mut hasher);
    user_agent.unwrap_or("").hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_is_stable_for_same_inputs() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let a = client_id(addr, Some("vlc/3.0"));
        let b = client_id(addr, Some("vlc/3.0"));
        assert_eq!(a, b);
    }

    #[test]
    fn client_id_differs_by_user_agent() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let a = client_id(addr, Some("vlc/3.0"));
        let b = client_id(addr, Some("chrome/120"));
        assert_ne!(a, b);
    }
}
