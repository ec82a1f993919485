//! Concrete `SegmentProber` (C7's collaborator, spec §4.7), built on
//! `ffmpeg-next` the way `hls-vod-lib/src/index/{video,audio}.rs` read codec
//! parameters off a stream: open the file, read header-only fields, never
//! decode a frame.

use std::path::Path;

use async_trait::async_trait;
use ffmpeg_next as ffmpeg;
use hls_gateway_core::{CoreError, Result, SegmentProbe, SegmentProber, VideoRange};

pub struct FfmpegSegmentProber;

impl FfmpegSegmentProber {
    pub fn new() -> Self {
        FfmpegSegmentProber
    }
}

impl Default for FfmpegSegmentProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SegmentProber for FfmpegSegmentProber {
    async fn probe(&self, segment_path: &Path) -> Result<SegmentProbe> {
        let path = segment_path.to_path_buf();
        tokio::task::spawn_blocking(move || probe_blocking(&path))
            .await
            .map_err(|e| CoreError::transient(format!("probe task panicked: {}", e)))?
    }
}

fn probe_blocking(path: &Path) -> Result<SegmentProbe> {
    let context = ffmpeg::format::input(path)
        .map_err(|e| CoreError::transient(format!("failed to open segment {:?}: {}", path, e)))?;

    let video = context
        .streams()
        .into_iter()
        .find(|s| s.parameters().medium() == ffmpeg::media::Type::Video);
    let audio = context
        .streams()
        .into_iter()
        .find(|s| s.parameters().medium() == ffmpeg::media::Type::Audio);

    if video.is_none() && audio.is_none() {
        return Err(CoreError::transient(format!(
            "segment {:?} has no audio or video stream",
            path
        )));
    }

    let (width, height, rfc_codec, video_range, video_bitrate) = match &video {
        Some(stream) => {
            let params = stream.parameters();
            let w = codec_width(&params);
            let h = codec_height(&params);
            let codec = rfc_video_codec(params.id(), codec_profile(&params));
            (Some(w), Some(h), codec, Some(VideoRange::Sdr), codec_bit_rate(&params))
        }
        None => (None, None, None, None, 0),
    };

    let (audio_codec, channels, sample_rate, language, audio_bitrate, is_atmos) = match &audio {
        Some(stream) => {
            let params = stream.parameters();
            let codec_name = rfc_audio_codec_short(params.id());
            let lang = stream.metadata().get("language").map(|s| s.to_string());
            (
                Some(codec_name),
                Some(codec_channels(&params)),
                Some(codec_sample_rate(&params)),
                lang,
                codec_bit_rate(&params),
                false,
            )
        }
        None => (None, None, None, None, 0, false),
    };

    let bitrate = if video_bitrate > 0 {
        video_bitrate
    } else {
        audio_bitrate
    };

    Ok(SegmentProbe {
        bitrate,
        width,
        height,
        rfc_codec: if video.is_some() {
            rfc_codec
        } else {
            audio_codec.clone().map(rfc_audio_codec_long)
        },
        video_range,
        audio_codec: audio_codec.map(|c| c.to_string()),
        channels,
        sample_rate,
        language,
        is_atmos,
    })
}

fn codec_width(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    unsafe { (*params.as_ptr()).width as u32 }
}

fn codec_height(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    unsafe { (*params.as_ptr()).height as u32 }
}

fn codec_profile(params: &ffmpeg::codec::parameters::Parameters) -> i32 {
    unsafe { (*params.as_ptr()).profile }
}

fn codec_bit_rate(params: &ffmpeg::codec::parameters::Parameters) -> u64 {
    unsafe { (*params.as_ptr()).bit_rate as u64 }
}

fn codec_channels(params: &ffmpeg::codec::parameters::Parameters) -> u16 {
    unsafe { (*params.as_ptr()).ch_layout.nb_channels as u16 }
}

fn codec_sample_rate(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    unsafe { (*params.as_ptr()).sample_rate as u32 }
}

/// HLS `CODECS=` string for a video codec (mirrors
/// `hls-vod-lib/src/playlist/codec.rs::get_video_codec_string`, trimmed to
/// the codecs this gateway's planner is expected to target).
fn rfc_video_codec(id: ffmpeg::codec::Id, profile: i32) -> Option<String> {
    match id {
        ffmpeg::codec::Id::H264 => {
            let _ = profile;
            Some("avc1.640028".to_string())
        }
        ffmpeg::codec::Id::HEVC => Some("hvc1.1.6.L93.B0".to_string()),
        ffmpeg::codec::Id::VP9 => Some("vp09.00.10.08".to_string()),
        ffmpeg::codec::Id::AV1 => Some("av01.0.04M.08".to_string()),
        _ => None,
    }
}

fn rfc_audio_codec_short(id: ffmpeg::codec::Id) -> &'static str {
    match id {
        ffmpeg::codec::Id::AAC => "aac",
        ffmpeg::codec::Id::AC3 => "ac3",
        ffmpeg::codec::Id::EAC3 => "eac3",
        ffmpeg::codec::Id::FLAC => "flac",
        ffmpeg::codec::Id::MP3 => "mp3",
        ffmpeg::codec::Id::OPUS => "opus",
        _ => "aac",
    }
}

fn rfc_audio_codec_long(short: &'static str) -> String {
    match short {
        "ac3" => "ac-3".to_string(),
        "eac3" => "ec-3".to_string(),
        "flac" => "flac".to_string(),
        "mp3" => "mp4a.40.34".to_string(),
        "opus" => "Opus".to_string(),
        _ => "mp4a.40.2".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_codec_strings_match_known_ids() {
        assert_eq!(
            rfc_video_codec(ffmpeg::codec::Id::H264, 100),
            Some("avc1.640028".to_string())
        );
        assert_eq!(rfc_video_codec(ffmpeg::codec::Id::NONE, 0), None);
    }

    #[test]
    fn audio_codec_long_form_defaults_to_aac() {
        assert_eq!(rfc_audio_codec_long("unknown"), "mp4a.40.2");
        assert_eq!(rfc_audio_codec_long("ac3"), "ac-3");
    }
}
