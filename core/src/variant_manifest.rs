//! Persistent per-variant `info` file (C7, spec §4.7).

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::ids::VideoRange;

/// Default number of leading segments probed before a `VariantInfo` is written.
pub const DEFAULT_SEGMENTS_TO_ANALYZE: usize = 12;

/// Measurement taken from a single probed segment file.
#[derive(Debug, Clone)]
pub struct SegmentProbe {
    pub bitrate: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub rfc_codec: Option<String>,
    pub video_range: Option<VideoRange>,
    pub audio_codec: Option<String>,
    pub channels: Option<u16>,
    pub sample_rate: Option<u32>,
    pub language: Option<String>,
    pub is_atmos: bool,
}

/// Probes segment files for codec/bitrate/resolution metadata. The core treats
/// the implementation (ffprobe, ffmpeg-next, ...) as an opaque process, same as
/// `EncoderPlanner` (spec §1).
#[async_trait]
pub trait SegmentProber: Send + Sync {
    async fn probe(&self, segment_path: &Path) -> Result<SegmentProbe>;
}

fn video_range_str(range: VideoRange) -> &'static str {
    match range {
        VideoRange::Sdr => "SDR",
        VideoRange::Pq => "PQ",
        VideoRange::Hlg => "HLG",
        VideoRange::Dv => "DV",
    }
}

fn video_range_from_str(s: &str) -> VideoRange {
    match s {
        "PQ" => VideoRange::Pq,
        "HLG" => VideoRange::Hlg,
        "DV" => VideoRange::Dv,
        _ => VideoRange::Sdr,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoVariantInfo {
    pub measured_bitrate: u64,
    pub width: u32,
    pub height: u32,
    pub rfc_codec: String,
    pub video_range: String,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioVariantInfo {
    pub audio_codec: String,
    pub rfc_audio_codec: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub bit_rate: u64,
    pub language: Option<String>,
    pub is_atmos: bool,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariantInfo {
    Video(VideoVariantInfo),
    Audio(AudioVariantInfo),
}

impl VariantInfo {
    pub fn is_done(&self) -> bool {
        match self {
            VariantInfo::Video(v) => v.done,
            VariantInfo::Audio(a) => a.done,
        }
    }

    pub fn mark_done(&mut self) {
        match self {
            VariantInfo::Video(v) => v.done = true,
            VariantInfo::Audio(a) => a.done = true,
        }
    }
}

/// Reads, lazily builds, and persists `VariantInfo` records.
pub struct VariantManifest<'a> {
    prober: &'a dyn SegmentProber,
}

impl<'a> VariantManifest<'a> {
    pub fn new(prober: &'a dyn SegmentProber) -> Self {
        VariantManifest { prober }
    }

    /// Read the persisted info file if it exists and parses cleanly.
    pub async fn read(&self, info_path: &Path) -> Option<VariantInfo> {
        let bytes = tokio::fs::read(info_path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Return the persisted info if present and complete, otherwise probe the
    /// first `segments_to_analyze` stable segments and write it. No partial
    /// info is ever written — a probe failure returns a transient error and
    /// leaves the directory untouched (spec §4.7).
    pub async fn ensure(
        &self,
        info_path: &Path,
        segment_paths: &[std::path::PathBuf],
        is_audio: bool,
        segments_to_analyze: usize,
    ) -> Result<VariantInfo> {
        if let Some(existing) = self.read(info_path).await {
            return Ok(existing);
        }

        let take = segment_paths.len().min(segments_to_analyze);
        if take == 0 {
            return Err(CoreError::transient(
                "no segments available yet to build variant info",
            ));
        }

        let mut probes = Vec::with_capacity(take);
        for path in &segment_paths[..take] {
            probes.push(self.prober.probe(path).await?);
        }
        if probes.is_empty() {
            return Err(CoreError::transient("probing yielded no usable samples"));
        }

        let info = if is_audio {
            build_audio_info(&probes)?
        } else {
            build_video_info(&probes)?
        };

        let bytes = serde_json::to_vec_pretty(&info)?;
        if let Some(parent) = info_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(info_path, &bytes).await?;
        Ok(info)
    }

    /// Write a `done` marker file next to the segments (spec §4.7).
    pub async fn mark_done(&self, done_marker_path: &Path) -> Result<()> {
        tokio::fs::write(done_marker_path, b"").await?;
        Ok(())
    }
}

fn build_video_info(probes: &[SegmentProbe]) -> Result<VariantInfo> {
    let max_bitrate = probes.iter().map(|p| p.bitrate).max().unwrap_or(0);
    let sample = probes
        .iter()
        .find(|p| p.width.is_some() && p.height.is_some())
        .ok_or_else(|| CoreError::transient("no probe reported a resolution"))?;
    Ok(VariantInfo::Video(VideoVariantInfo {
        measured_bitrate: max_bitrate,
        width: sample.width.unwrap(),
        height: sample.height.unwrap(),
        rfc_codec: sample.rfc_codec.clone().unwrap_or_else(|| "avc1.640028".into()),
        video_range: video_range_str(sample.video_range.unwrap_or(VideoRange::Sdr)).to_string(),
        done: false,
    }))
}

fn build_audio_info(probes: &[SegmentProbe]) -> Result<VariantInfo> {
    let total: u64 = probes.iter().map(|p| p.bitrate).sum();
    let overall_bitrate = total / probes.len() as u64;
    let sample = probes
        .iter()
        .find(|p| p.channels.is_some())
        .ok_or_else(|| CoreError::transient("no probe reported audio channels"))?;
    Ok(VariantInfo::Audio(AudioVariantInfo {
        audio_codec: sample.audio_codec.clone().unwrap_or_else(|| "aac".into()),
        rfc_audio_codec: sample
            .rfc_codec
            .clone()
            .unwrap_or_else(|| "mp4a.40.2".into()),
        channels: sample.channels.unwrap_or(2),
        sample_rate: sample.sample_rate.unwrap_or(48_000),
        bit_rate: overall_bitrate,
        language: sample.language.clone(),
        is_atmos: sample.is_atmos,
        done: false,
    }))
}

impl VideoVariantInfo {
    pub fn video_range(&self) -> VideoRange {
        video_range_from_str(&self.video_range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct FakeProber {
        bitrate: u64,
    }

    #[async_trait]
    impl SegmentProber for FakeProber {
        async fn probe(&self, _segment_path: &Path) -> Result<SegmentProbe> {
            Ok(SegmentProbe {
                bitrate: self.bitrate,
                width: Some(1280),
                height: Some(720),
                rfc_codec: Some("avc1.640028".into()),
                video_range: Some(VideoRange::Sdr),
                audio_codec: None,
                channels: None,
                sample_rate: None,
                language: None,
                is_atmos: false,
            })
        }
    }

    #[tokio::test]
    async fn ensure_writes_video_info_using_max_bitrate() {
        let dir = tempdir().unwrap();
        let info_path = dir.path().join("info.json");
        let segments: Vec<_> = (0..3).map(|i| dir.path().join(format!("{i}.ts"))).collect();
        for (i, p) in segments.iter().enumerate() {
            tokio::fs::write(p, vec![0u8; i + 1]).await.unwrap();
        }

        let prober = FakeProber { bitrate: 5_000_000 };
        let manifest = VariantManifest::new(&prober);
        let info = manifest
            .ensure(&info_path, &segments, false, 12)
            .await
            .unwrap();
        match info {
            VariantInfo::Video(v) => {
                assert_eq!(v.measured_bitrate, 5_000_000);
                assert_eq!(v.width, 1280);
                assert!(!v.done);
            }
            _ => panic!("expected video info"),
        }
        assert!(info_path.is_file());
    }

    #[tokio::test]
    async fn ensure_is_idempotent_after_first_write() {
        let dir = tempdir().unwrap();
        let info_path = dir.path().join("info.json");
        let segments: Vec<_> = vec![dir.path().join("0.ts")];
        tokio::fs::write(&segments[0], b"x").await.unwrap();

        let prober = FakeProber { bitrate: 1_000_000 };
        let manifest = VariantManifest::new(&prober);
        let first = manifest.ensure(&info_path, &segments, false, 12).await.unwrap();
        let first_bytes = tokio::fs::read(&info_path).await.unwrap();

        // A second call, even with a different prober reading, must not rewrite.
        let prober2 = FakeProber { bitrate: 9_000_000 };
        let manifest2 = VariantManifest::new(&prober2);
        let second = manifest2.ensure(&info_path, &segments, false, 12).await.unwrap();
        let second_bytes = tokio::fs::read(&info_path).await.unwrap();

        assert_eq!(first_bytes, second_bytes);
        match (first, second) {
            (VariantInfo::Video(a), VariantInfo::Video(b)) => {
                assert_eq!(a.measured_bitrate, b.measured_bitrate);
            }
            _ => panic!("expected video info"),
        }
    }

    #[tokio::test]
    async fn ensure_fails_transiently_with_no_segments() {
        let dir = tempdir().unwrap();
        let info_path = dir.path().join("info.json");
        let prober = FakeProber { bitrate: 1 };
        let manifest = VariantManifest::new(&prober);
        let result = manifest.ensure(&info_path, &[], false, 12).await;
        assert!(result.is_err());
        assert!(!info_path.exists());
    }
}
