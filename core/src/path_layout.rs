//! Deterministic filesystem paths for a `(VideoId, VariantLabel, SegmentIndex)`
//! triple (spec C1 / §4.1).

use std::path::{Path, PathBuf};

use crate::ids::{pad3, SegmentIndex, VariantLabel, VideoId};

/// Default segment container extension when no `codec_reference.json` entry exists.
pub const DEFAULT_SEGMENT_EXT: &str = "ts";

/// Root of all HLS output, plus the sanitization/lowercasing rules of §4.1.
#[derive(Debug, Clone)]
pub struct PathLayout {
    root: PathBuf,
}

impl PathLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PathLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn video_dir(&self, video_id: &VideoId) -> PathBuf {
        self.root.join(video_id.as_str())
    }

    pub fn variant_dir(&self, video_id: &VideoId, variant: &VariantLabel) -> PathBuf {
        self.video_dir(video_id).join(variant.as_str())
    }

    pub fn codec_reference_path(&self, video_id: &VideoId) -> PathBuf {
        self.video_dir(video_id).join("codec_reference.json")
    }

    pub fn playlist_path(&self, video_id: &VideoId, variant: &VariantLabel) -> PathBuf {
        self.variant_dir(video_id, variant).join("playlist.m3u8")
    }

    pub fn iframe_playlist_path(&self, video_id: &VideoId, variant: &VariantLabel) -> PathBuf {
        self.variant_dir(video_id, variant).join("iframe_playlist.m3u8")
    }

    pub fn lock_path(&self, video_id: &VideoId, variant: &VariantLabel) -> PathBuf {
        self.variant_dir(video_id, variant).join("session.lock")
    }

    pub fn done_marker_path(&self, video_id: &VideoId, variant: &VariantLabel) -> PathBuf {
        self.variant_dir(video_id, variant).join("done")
    }

    pub fn variant_info_path(&self, video_id: &VideoId, variant: &VariantLabel, is_audio: bool) -> PathBuf {
        let name = if is_audio { "audio_info.json" } else { "info.json" };
        self.variant_dir(video_id, variant).join(name)
    }

    pub fn segment_path(
        &self,
        video_id: &VideoId,
        variant: &VariantLabel,
        segment: SegmentIndex,
        ext: &str,
    ) -> PathBuf {
        self.variant_dir(video_id, variant)
            .join(format!("{}.{}", pad3(segment), ext))
    }

    pub fn iframe_segment_path(
        &self,
        video_id: &VideoId,
        variant: &VariantLabel,
        segment: SegmentIndex,
        ext: &str,
    ) -> PathBuf {
        self.variant_dir(video_id, variant)
            .join(format!("iframe_{}.{}", pad3(segment), ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_path_is_zero_padded_with_extension() {
        let layout = PathLayout::new("/tmp/hls");
        let id = VideoId::sanitize("movie");
        let variant = VariantLabel::new("720p");
        let path = layout.segment_path(&id, &variant, 7, "ts");
        assert_eq!(path, PathBuf::from("/tmp/hls/movie/720p/007.ts"));
    }

    #[test]
    fn variant_dir_lowercases_label() {
        let layout = PathLayout::new("/tmp/hls");
        let id = VideoId::sanitize("movie");
        let variant = VariantLabel::new("720P");
        assert_eq!(
            layout.variant_dir(&id, &variant),
            PathBuf::from("/tmp/hls/movie/720p")
        );
    }

    #[test]
    fn playlist_and_lock_paths() {
        let layout = PathLayout::new("/tmp/hls");
        let id = VideoId::sanitize("movie");
        let variant = VariantLabel::new("1080p");
        assert_eq!(
            layout.playlist_path(&id, &variant),
            PathBuf::from("/tmp/hls/movie/1080p/playlist.m3u8")
        );
        assert_eq!(
            layout.lock_path(&id, &variant),
            PathBuf::from("/tmp/hls/movie/1080p/session.lock")
        );
    }
}
