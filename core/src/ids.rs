//! Identifiers and the `Variant` record (spec §3).

use std::fmt;

/// Characters stripped from a raw video identifier before it touches the filesystem.
const FORBIDDEN_CHARS: &[char] = &['/', '\\', '?', '%', '*', ':', '|', '"', '<', '>', '`'];

/// A sanitized video identifier, safe to use as a path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VideoId(String);

impl VideoId {
    /// Sanitize a raw identifier: drop forbidden characters, trim leading/trailing
    /// dots and whitespace.
    pub fn sanitize(raw: &str) -> Self {
        let stripped: String = raw.chars().filter(|c| !FORBIDDEN_CHARS.contains(c)).collect();
        let trimmed = stripped.trim_matches(|c: char| c == '.' || c.is_whitespace());
        VideoId(trimmed.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stable, case-insensitive variant token (`720p`, `1080p`, `4k`, `audio_0_aac`, ...).
///
/// Stored lowercased so two requests that differ only in case resolve to the
/// same on-disk directory (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantLabel(String);

impl VariantLabel {
    pub fn new(raw: impl AsRef<str>) -> Self {
        VariantLabel(raw.as_ref().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this label names a multichannel audio rendition (`priority == 2` per §3).
    pub fn is_multichannel_audio_hint(&self) -> bool {
        self.0.contains("_51") || self.0.contains("5.1") || self.0.contains("surround")
    }
}

impl fmt::Display for VariantLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VariantLabel {
    fn from(s: &str) -> Self {
        VariantLabel::new(s)
    }
}

/// A non-negative segment index. On disk, rendered as a zero-padded 3-digit string.
pub type SegmentIndex = u64;

/// Zero-pad a segment index to 3 digits, per spec §3 (`pad3`).
pub fn pad3(i: SegmentIndex) -> String {
    format!("{:03}", i)
}

/// The two kinds of renditions this gateway can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    Video,
    Audio,
}

/// HLS dynamic range tag, used by `VariantInfo` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoRange {
    Sdr,
    Pq,
    Hlg,
    Dv,
}

/// One encoding of the source: a resolution/bitrate/codec combination for video,
/// or a track/codec combination for audio.
#[derive(Debug, Clone)]
pub struct Variant {
    pub label: VariantLabel,
    pub kind: VariantKind,
    pub resolution: Option<(u32, u32)>,
    pub bitrate: Option<u64>,
    pub is_sdr: Option<bool>,
    pub channels: Option<u16>,
    pub track_index: Option<usize>,
    pub codec_hint: Option<String>,
    /// Trick-play (I-frame-only) variant of a parent video variant (spec §9a).
    pub is_iframe: bool,
}

impl Variant {
    pub fn video(label: impl Into<VariantLabel>, resolution: (u32, u32)) -> Self {
        Variant {
            label: label.into(),
            kind: VariantKind::Video,
            resolution: Some(resolution),
            bitrate: None,
            is_sdr: None,
            channels: None,
            track_index: None,
            codec_hint: None,
            is_iframe: false,
        }
    }

    pub fn audio(label: impl Into<VariantLabel>, track_index: usize, channels: u16) -> Self {
        Variant {
            label: label.into(),
            kind: VariantKind::Audio,
            resolution: None,
            bitrate: None,
            is_sdr: None,
            channels: Some(channels),
            track_index: Some(track_index),
            codec_hint: None,
            is_iframe: false,
        }
    }

    pub fn as_iframe(mut self) -> Self {
        self.is_iframe = true;
        self
    }

    /// Numeric priority derived from the label (spec §3): `4k=4, 1080p=3, 720p=2,
    /// 480p=1`, audio defaults to 1, multichannel audio=2. Higher priority wins
    /// variant-switch and eviction decisions.
    pub fn priority(&self) -> i32 {
        match self.kind {
            VariantKind::Video => {
                let l = self.label.as_str();
                if l.contains("4k") || l.contains("2160") {
                    4
                } else if l.contains("1080") {
                    3
                } else if l.contains("720") {
                    2
                } else if l.contains("480") {
                    1
                } else {
                    1
                }
            }
            VariantKind::Audio => {
                if self.channels.unwrap_or(2) > 2 || self.label.is_multichannel_audio_hint() {
                    2
                } else {
                    1
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_forbidden_chars() {
        let id = VideoId::sanitize("my/movie:name?*.mkv");
        assert_eq!(id.as_str(), "mymoviename.mkv");
    }

    #[test]
    fn sanitize_trims_leading_trailing_dots_and_space() {
        let id = VideoId::sanitize("  ..movie..  ");
        assert_eq!(id.as_str(), "movie");
    }

    #[test]
    fn variant_label_is_lowercased() {
        assert_eq!(VariantLabel::new("720P").as_str(), "720p");
    }

    #[test]
    fn priority_orders_video_by_resolution() {
        assert!(Variant::video("4k", (3840, 2160)).priority() > Variant::video("1080p", (1920, 1080)).priority());
        assert!(Variant::video("1080p", (1920, 1080)).priority() > Variant::video("720p", (1280, 720)).priority());
    }

    #[test]
    fn priority_multichannel_audio_outranks_stereo() {
        let stereo = Variant::audio("audio_stereo", 0, 2);
        let surround = Variant::audio("audio_0_ac3", 0, 6);
        assert!(surround.priority() > stereo.priority());
    }

    #[test]
    fn pad3_zero_pads() {
        assert_eq!(pad3(7), "007");
        assert_eq!(pad3(123), "123");
    }
}
