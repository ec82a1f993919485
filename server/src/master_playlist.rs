//! Master playlist generator (spec §6: `GET /api/stream/:id/master.m3u8`).
//!
//! Grounded on `hls-vod-lib/src/playlist/master.rs`'s shape: one
//! `#EXT-X-STREAM-INF` per video variant, one `#EXT-X-MEDIA` per audio
//! variant grouped into a codec-family `GROUP-ID`, reusing its `to_rfc5646`
//! idiom for the `LANGUAGE` attribute. Operates on the gateway's own
//! `Variant` catalog (`sources::discover_variants`) rather than the
//! teacher's `StreamIndex`, since this gateway has no muxed-track model.

use std::collections::HashSet;

use hls_gateway_core::{Variant, VariantKind};

/// Build the master playlist referencing every video variant and audio
/// variant in `catalog`, addressed at `/api/stream/:id/...` (spec §6).
pub fn generate_master_playlist(video_id: &str, catalog: &[Variant]) -> String {
    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:7\n\n");

    let audio_variants: Vec<&Variant> = catalog
        .iter()
        .filter(|v| v.kind == VariantKind::Audio)
        .collect();
    let video_variants: Vec<&Variant> = catalog
        .iter()
        .filter(|v| v.kind == VariantKind::Video)
        .collect();

    if !audio_variants.is_empty() {
        out.push_str("# Audio Tracks\n");
        let mut seen_groups: HashSet<&str> = HashSet::new();
        for (track_index, variant) in audio_variants.iter().enumerate() {
            let group_id = audio_group_id(variant);
            let language = "und";
            let name = if variant.channels.unwrap_or(2) > 2 {
                "Surround".to_string()
            } else {
                "Stereo".to_string()
            };
            let is_first = seen_groups.insert(group_id);
            let default = if is_first { "YES" } else { "NO" };
            let uri = format!(
                "/api/stream/{}/audio/track_{}/playlist.m3u8",
                video_id, track_index
            );
            out.push_str(&format!(
                "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"{}\",LANGUAGE=\"{}\",NAME=\"{}\",DEFAULT={},AUTOSELECT=YES,URI=\"{}\"\n",
                group_id, language, name, default, uri
            ));
        }
        out.push('\n');
    }

    out.push_str("# Video Variants\n");
    let audio_groups: Vec<&str> = {
        let mut seen = HashSet::new();
        let mut groups = Vec::new();
        for v in &audio_variants {
            let g = audio_group_id(v);
            if seen.insert(g) {
                groups.push(g);
            }
        }
        groups
    };

    for variant in video_variants.iter().filter(|v| !v.is_iframe) {
        let (width, height) = variant.resolution.unwrap_or((0, 0));
        let bandwidth = estimate_bandwidth(variant);
        let uri = format!("/api/stream/{}/{}/playlist.m3u8", video_id, variant.label);

        if audio_groups.is_empty() {
            out.push_str(&format!(
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n",
                bandwidth, width, height
            ));
            out.push_str(&uri);
            out.push('\n');
        } else {
            for group_id in &audio_groups {
                out.push_str(&format!(
                    "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{},AUDIO=\"{}\"\n",
                    bandwidth, width, height, group_id
                ));
                out.push_str(&uri);
                out.push('\n');
            }
        }
    }

    // I-frame trick-play variants (spec §4.9a) get their own, separate entry.
    for variant in video_variants.iter().filter(|v| v.is_iframe) {
        let (width, height) = variant.resolution.unwrap_or((0, 0));
        let bandwidth = estimate_bandwidth(variant);
        let iframe_uri = format!(
            "/api/stream/{}/{}/iframe_playlist.m3u8",
            video_id, variant.label
        );
        out.push_str(&format!(
            "#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{},URI=\"{}\"\n",
            bandwidth / 10, width, height, iframe_uri
        ));
    }

    out
}

fn audio_group_id(variant: &Variant) -> &'static str {
    if variant.channels.unwrap_or(2) > 2 {
        "audio-surround"
    } else {
        "audio-stereo"
    }
}

fn estimate_bandwidth(variant: &Variant) -> u64 {
    if let Some(bitrate) = variant.bitrate {
        return bitrate + bitrate / 10;
    }
    let height = variant.resolution.map(|(_, h)| h).unwrap_or(720);
    let base = match height {
        h if h >= 2160 => 12_000_000,
        h if h >= 1080 => 5_000_000,
        h if h >= 720 => 2_800_000,
        h if h >= 480 => 1_400_000,
        _ => 800_000,
    };
    base + base / 10
}

#[cfg(test)]
mod tests {
    use super::*;
    use hls_gateway_core::VariantLabel;

    #[test]
    fn master_playlist_lists_every_video_variant() {
        let catalog = vec![
            Variant::video(VariantLabel::new("1080p"), (1920, 1080)),
            Variant::video(VariantLabel::new("720p"), (1280, 720)),
            Variant::audio(VariantLabel::new("audio_0_2"), 0, 2),
        ];
        let playlist = generate_master_playlist("movie", &catalog);
        assert!(playlist.starts_with("#EXTM3U\n"));
        assert!(playlist.contains("/api/stream/movie/1080p/playlist.m3u8"));
        assert!(playlist.contains("/api/stream/movie/720p/playlist.m3u8"));
        assert!(playlist.contains("TYPE=AUDIO"));
        assert!(playlist.contains("AUDIO=\"audio-stereo\""));
    }

    #[test]
    fn no_audio_variants_omits_audio_attr() {
        let catalog = vec![Variant::video(VariantLabel::new("720p"), (1280, 720))];
        let playlist = generate_master_playlist("movie", &catalog);
        assert!(!playlist.contains("AUDIO="));
        assert!(!playlist.contains("TYPE=AUDIO"));
    }

    #[test]
    fn iframe_variant_emits_iframe_stream_inf() {
        let catalog = vec![Variant::video(VariantLabel::new("720p"), (1280, 720)).as_iframe()];
        let playlist = generate_master_playlist("movie", &catalog);
        assert!(playlist.contains("#EXT-X-I-FRAME-STREAM-INF"));
        assert!(playlist.contains("iframe_playlist.m3u8"));
    }
}
