//! Source-file discovery and variant-catalog construction.
//!
//! Spec §1 explicitly keeps source-file discovery out of the core; this
//! module is the server-side collaborator that resolves a `VideoId` to a
//! file under `VIDEO_SOURCE_DIR` and probes it to build the `Variant` ladder
//! the HTTP layer and `EncoderPlanner` need. Grounded on the probing idiom of
//! `hls-vod-lib/src/index/scanner.rs` (open via `ffmpeg::format::input`,
//! read stream metadata without touching media data), scaled down from that
//! file's full demuxer-index-table build to the handful of fields (codec,
//! resolution, channel count) a variant ladder needs.

use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;
use hls_gateway_core::{CoreError, Result, Variant, VideoId};

/// Extensions considered when resolving a `VideoId` to a source file.
const SOURCE_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "ts", "m2ts", "avi", "mov"];

/// Candidate output ladder, widest first; filtered down to the source height.
const VIDEO_LADDER: &[(&str, u32, u32)] = &[
    ("4k", 3840, 2160),
    ("1080p", 1920, 1080),
    ("720p", 1280, 720),
    ("480p", 854, 480),
];

/// Resolve `video_id` to a file under `source_dir` by matching its sanitized
/// stem against known container extensions. Non-recursive: sources are
/// expected to live directly under `VIDEO_SOURCE_DIR`, mirroring the
/// flat-directory assumption `hls-vod-server` makes for its own stream roots.
pub fn resolve_source_path(source_dir: &Path, video_id: &VideoId) -> Result<PathBuf> {
    for ext in SOURCE_EXTENSIONS {
        let candidate = source_dir.join(format!("{}.{}", video_id.as_str(), ext));
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    let entries = std::fs::read_dir(source_dir)
        .map_err(|e| CoreError::not_found(format!("source directory unreadable: {}", e)))?;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem == video_id.as_str() {
            return Ok(path);
        }
    }
    Err(CoreError::not_found(format!(
        "no source file for video {}",
        video_id
    )))
}

/// Probe `source_path` and build the variant ladder: one video `Variant` per
/// ladder rung at or below the source's height, one audio `Variant` per
/// audio stream (plus a forced-stereo fallback when any track has more than
/// two channels).
pub fn discover_variants(source_path: &Path) -> Result<Vec<Variant>> {
    let context = ffmpeg::format::input(source_path)
        .map_err(|e| CoreError::transient(format!("failed to open source: {}", e)))?;

    let mut variants = Vec::new();
    let mut has_multichannel = false;

    let video_stream = context
        .streams()
        .into_iter()
        .find(|s| s.parameters().medium() == ffmpeg::media::Type::Video);

    if let Some(stream) = video_stream {
        let params = stream.parameters();
        let width = codec_width(&params);
        let height = codec_height(&params);
        if width > 0 && height > 0 {
            for (label, _, rung_height) in VIDEO_LADDER {
                if *rung_height <= height || variants.is_empty() {
                    variants.push(Variant::video(*label, (width, height.min(*rung_height).max(1))));
                }
            }
            if variants.is_empty() {
                variants.push(Variant::video("source", (width, height)));
            }
        }
    }

    for (track_index, stream) in context
        .streams()
        .into_iter()
        .enumerate()
        .filter(|(_, s)| s.parameters().medium() == ffmpeg::media::Type::Audio)
    {
        let params = stream.parameters();
        let channels = codec_channels(&params);
        if channels > 2 {
            has_multichannel = true;
        }
        let label = format!("audio_{}_{}", track_index, channels);
        variants.push(Variant::audio(label, track_index, channels));
    }

    if has_multichannel {
        variants.push(Variant::audio("audio_stereo", 0, 2));
    }

    if variants.is_empty() {
        return Err(CoreError::transient("source has no usable video or audio streams"));
    }

    Ok(variants)
}

fn codec_width(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    unsafe { (*params.as_ptr()).width as u32 }
}

fn codec_height(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    unsafe { (*params.as_ptr()).height as u32 }
}

fn codec_channels(params: &ffmpeg::codec::parameters::Parameters) -> u16 {
    unsafe { (*params.as_ptr()).ch_layout.nb_channels as u16 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolve_source_path_matches_extension() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("movie.mp4"), b"fake").unwrap();
        let id = VideoId::sanitize("movie");
        let resolved = resolve_source_path(dir.path(), &id).unwrap();
        assert_eq!(resolved, dir.path().join("movie.mp4"));
    }

    #[test]
    fn resolve_source_path_errors_when_missing() {
        let dir = tempdir().unwrap();
        let id = VideoId::sanitize("missing");
        assert!(resolve_source_path(dir.path(), &id).is_err());
    }
}
