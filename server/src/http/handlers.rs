//! HTTP handlers implementing the fixed route table of spec §6.
//!
//! Grounded on `hls-vod-server/src/http/handlers.rs`'s header-setting idiom
//! (explicit `Content-Type`/`Cache-Control` on every playlist/segment
//! response) and its thin `state.get_X_or_error` pattern, replacing the
//! in-process `MediaInfo`/`generate_segment` calls with
//! `hls_gateway_core::Orchestrator::ensure_segment`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use hls_gateway_core::{PlaylistType, SegmentIndex, Variant, VideoId};

use crate::error::{Result, ServerError};
use crate::state::{client_id, AppState};

fn playlist_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/vnd.apple.mpegurl"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers
}

fn segment_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/MP2T"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers
}

fn request_client_id(addr: SocketAddr, headers: &HeaderMap) -> u64 {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());
    client_id(addr, user_agent)
}

/// Filename parsed from the trailing `{segment}` path component: either a
/// plain `NNN.ext` media segment or an `iframe_NNN.ext` trick-play segment.
struct SegmentFilename {
    index: SegmentIndex,
    is_iframe: bool,
    ext: String,
}

fn parse_segment_filename(name: &str) -> Option<SegmentFilename> {
    let (stem, ext) = name.rsplit_once('.')?;
    if !matches!(ext, "ts" | "m4s") {
        return None;
    }
    let (digits, is_iframe) = match stem.strip_prefix("iframe_") {
        Some(rest) => (rest, true),
        None => (stem, false),
    };
    let index: SegmentIndex = digits.parse().ok()?;
    Some(SegmentFilename {
        index,
        is_iframe,
        ext: ext.to_string(),
    })
}

fn content_type_for_ext(ext: &str) -> &'static str {
    match ext {
        "m4s" => "video/iso.segment",
        _ => "video/MP2T",
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct PlaylistQuery {
    #[serde(rename = "playlistType")]
    playlist_type: Option<String>,
}

impl PlaylistQuery {
    fn resolve(&self) -> PlaylistType {
        match self.playlist_type.as_deref() {
            Some(t) if t.eq_ignore_ascii_case("vod") => PlaylistType::Vod,
            _ => PlaylistType::AsProduced,
        }
    }
}

/// `GET /api/stream/:id/master.m3u8`
pub async fn master_playlist(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response> {
    let video_id = VideoId::sanitize(&id);
    let catalog = state.variant_catalog(&video_id).await?;
    state.ensure_codec_reference(&video_id).await?;
    let body = crate::master_playlist::generate_master_playlist(video_id.as_str(), &catalog);
    Ok((playlist_headers(), body).into_response())
}

/// `GET /api/stream/:id/:variant/playlist.m3u8[?playlistType=VOD]`
pub async fn variant_playlist(
    State(state): State<Arc<AppState>>,
    Path((id, variant)): Path<(String, String)>,
    Query(query): Query<PlaylistQuery>,
) -> Result<Response> {
    let video_id = VideoId::sanitize(&id);
    let found = state.find_variant(&video_id, &variant).await?;
    serve_playlist(&state, &video_id, &found, query.resolve(), false).await
}

/// `GET /api/stream/:id/:variant/iframe_playlist.m3u8`
pub async fn iframe_playlist(
    State(state): State<Arc<AppState>>,
    Path((id, variant)): Path<(String, String)>,
) -> Result<Response> {
    let video_id = VideoId::sanitize(&id);
    let found = state.find_variant(&video_id, &variant).await?;
    serve_playlist(&state, &video_id, &found, PlaylistType::AsProduced, true).await
}

async fn serve_playlist(
    state: &Arc<AppState>,
    video_id: &VideoId,
    variant: &Variant,
    playlist_type: PlaylistType,
    iframe: bool,
) -> Result<Response> {
    let label = variant.label.clone();
    let path = if iframe {
        state.layout.iframe_playlist_path(video_id, &label)
    } else {
        state.layout.playlist_path(video_id, &label)
    };

    match state.playlists.get_playlist(video_id, &label, &path, playlist_type).await {
        Ok(bytes) => Ok((playlist_headers(), bytes).into_response()),
        Err(e) if e.kind() == hls_gateway_core::ErrorKind::NotReady => {
            trigger_warm_up(state, video_id, variant);
            Err(ServerError::Core(e))
        }
        Err(e) => Err(ServerError::Core(e)),
    }
}

/// Kick off segment 0 in the background so the encoder starts producing
/// before the client's next poll (spec §6: "triggers warm-up").
fn trigger_warm_up(state: &Arc<AppState>, video_id: &VideoId, variant: &Variant) {
    let state = state.clone();
    let video_id = video_id.clone();
    let variant = variant.clone();
    tokio::spawn(async move {
        let Ok(source_path) = state.resolve_source(&video_id) else {
            return;
        };
        let req = hls_gateway_core::EnsureSegmentRequest {
            client_id: 0,
            video_id: video_id.clone(),
            variant,
            source_path: &source_path,
            segment: 0,
            segment_duration_secs: state.config.core.segment.segment_time_secs,
            use_hardware: state.config.core.transcoding.hardware_encoding_enabled,
            variant_forced_sdr: false,
            segments_to_analyze: state.config.core.segment.segments_to_analyze,
            ext: hls_gateway_core::DEFAULT_SEGMENT_EXT,
        };
        if let Err(e) = state.orchestrator.ensure_segment(req).await {
            tracing::debug!("warm-up ensure_segment for {} failed: {}", video_id, e);
        }
    });
}

/// `GET /api/stream/:id/:variant/:seg.(ts|m4s)` and the `iframe_:seg.ts` form.
pub async fn variant_segment(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path((id, variant, segment)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    let video_id = VideoId::sanitize(&id);
    let found = state.find_variant(&video_id, &variant).await?;
    serve_segment(&state, addr, &headers, &video_id, &found, &segment).await
}

/// `GET /api/stream/:id/audio/track_:track/playlist.m3u8` and `.../audio_stereo/...`
pub async fn audio_playlist(
    State(state): State<Arc<AppState>>,
    Path((id, track)): Path<(String, String)>,
    Query(query): Query<PlaylistQuery>,
) -> Result<Response> {
    let video_id = VideoId::sanitize(&id);
    let found = resolve_audio_variant(&state, &video_id, &track).await?;
    serve_playlist(&state, &video_id, &found, query.resolve(), false).await
}

/// `GET /api/stream/:id/audio/track_:track/:seg.ts` and `.../audio_stereo/...`
pub async fn audio_segment(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path((id, track, segment)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    let video_id = VideoId::sanitize(&id);
    let found = resolve_audio_variant(&state, &video_id, &track).await?;
    serve_segment(&state, addr, &headers, &video_id, &found, &segment).await
}

/// `:track` is either `audio_stereo` (forced-stereo fallback), or
/// `track_<index>` optionally suffixed `_<codec>` (spec §6).
async fn resolve_audio_variant(state: &AppState, video_id: &VideoId, track: &str) -> Result<Variant> {
    if track == "audio_stereo" {
        return state.find_variant(video_id, "audio_stereo").await;
    }
    let rest = track
        .strip_prefix("track_")
        .ok_or_else(|| ServerError::UnknownVideo(format!("malformed audio track {}", track)))?;
    let index_str = rest.split('_').next().unwrap_or(rest);
    let track_index: usize = index_str
        .parse()
        .map_err(|_| ServerError::UnknownVideo(format!("malformed audio track {}", track)))?;

    let catalog = state.variant_catalog(video_id).await?;
    catalog
        .iter()
        .find(|v| v.kind == hls_gateway_core::VariantKind::Audio && v.track_index == Some(track_index))
        .cloned()
        .ok_or_else(|| ServerError::UnknownVideo(format!("{}/{}", video_id, track)))
}

async fn serve_segment(
    state: &Arc<AppState>,
    addr: SocketAddr,
    headers: &HeaderMap,
    video_id: &VideoId,
    variant: &Variant,
    segment_name: &str,
) -> Result<Response> {
    let parsed = parse_segment_filename(segment_name)
        .ok_or_else(|| ServerError::UnknownVideo(format!("malformed segment name {}", segment_name)))?;

    let source_path = state.resolve_source(video_id)?;
    let mut variant_for_request = variant.clone();
    variant_for_request.is_iframe = parsed.is_iframe;
    let ext: &'static str = if parsed.ext == "m4s" { "m4s" } else { "ts" };

    let req = hls_gateway_core::EnsureSegmentRequest {
        client_id: request_client_id(addr, headers),
        video_id: video_id.clone(),
        variant: variant_for_request.clone(),
        source_path: &source_path,
        segment: parsed.index,
        segment_duration_secs: state.config.core.segment.segment_time_secs,
        use_hardware: state.config.core.transcoding.hardware_encoding_enabled,
        variant_forced_sdr: false,
        segments_to_analyze: state.config.core.segment.segments_to_analyze,
        ext,
    };

    let path = state.orchestrator.ensure_segment(req).await?;
    let bytes = tokio::fs::read(&path).await.map_err(ServerError::Io)?;

    state.maybe_build_variant_info(video_id, &variant_for_request);

    let mut response_headers = segment_headers();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_ext(&parsed.ext)),
    );
    Ok((response_headers, bytes).into_response())
}

pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

pub async fn version_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "online",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_segment_filename() {
        let parsed = parse_segment_filename("007.ts").unwrap();
        assert_eq!(parsed.index, 7);
        assert!(!parsed.is_iframe);
        assert_eq!(parsed.ext, "ts");
    }

    #[test]
    fn parses_iframe_segment_filename() {
        let parsed = parse_segment_filename("iframe_012.ts").unwrap();
        assert_eq!(parsed.index, 12);
        assert!(parsed.is_iframe);
    }

    #[test]
    fn rejects_unknown_extension() {
        assert!(parse_segment_filename("007.mp4").is_none());
    }
}
