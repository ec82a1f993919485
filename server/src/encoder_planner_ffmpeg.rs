//! Concrete `EncoderPlanner` (C6, spec §4.6) that shells out to the `ffmpeg`
//! binary as a subprocess, per spec §1's external-transcoder model.
//!
//! The flag selection here is explicitly flagged in spec §9 as an open
//! question with no canonical answer in the source material, so this is
//! built fresh rather than ported from a single grounding file — the
//! argument-by-argument `Command` construction idiom follows the pattern
//! widely used across the retrieval pack's ffmpeg-subprocess wrappers (e.g.
//! `gt_ffmpeg/src/transcode.rs`), adapted to build a plain `Vec<String>`
//! since `hls_gateway_core::supervisor::Supervisor::spawn` owns the actual
//! `tokio::process::Command`.

use std::path::Path;

use async_trait::async_trait;
use hls_gateway_core::{
    pad3, EncoderPlan, EncoderPlanner, PlanRequest, PlanShape, Result, VariantKind,
};

pub struct FfmpegEncoderPlanner;

impl FfmpegEncoderPlanner {
    pub fn new() -> Self {
        FfmpegEncoderPlanner
    }
}

impl Default for FfmpegEncoderPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EncoderPlanner for FfmpegEncoderPlanner {
    async fn plan(&self, request: PlanRequest<'_>) -> Result<EncoderPlan> {
        Ok(build_plan(&request))
    }
}

fn build_plan(request: &PlanRequest<'_>) -> EncoderPlan {
    let mut args = vec!["ffmpeg".to_string(), "-hide_banner".to_string(), "-y".to_string()];

    let start_segment = match request.shape {
        PlanShape::Streaming { start_segment } => start_segment,
        PlanShape::ExplicitSegment { segment } => segment,
    };
    let seek_secs = start_segment as f64 * request.segment_duration_secs;
    if seek_secs > 0.0 {
        args.push("-ss".to_string());
        args.push(format!("{:.3}", seek_secs));
    }

    args.push("-i".to_string());
    args.push(request.source_path.display().to_string());

    match request.variant.kind {
        VariantKind::Video => push_video_args(&mut args, request),
        VariantKind::Audio => push_audio_args(&mut args, request),
    }

    args.push("-f".to_string());
    args.push("hls".to_string());
    args.push("-hls_time".to_string());
    args.push(format!("{}", request.segment_duration_secs as u64));
    args.push("-hls_playlist_type".to_string());
    args.push("event".to_string());
    args.push("-hls_flags".to_string());
    args.push("append_list+independent_segments".to_string());
    args.push("-start_number".to_string());
    args.push(start_segment.to_string());

    let ext = "ts";
    let output_pattern = format!("%03d.{}", ext);
    args.push("-hls_segment_filename".to_string());
    args.push(output_pattern.clone());

    let first_segment_file = format!("{}.{}", pad3(start_segment), ext);

    match request.shape {
        PlanShape::Streaming { .. } => {
            args.push("-hls_list_size".to_string());
            args.push("0".to_string());
            args.push("playlist.m3u8".to_string());
        }
        PlanShape::ExplicitSegment { .. } => {
            args.push("-vframes".to_string());
            args.push("1".to_string());
            args.push("playlist.m3u8".to_string());
        }
    }

    EncoderPlan {
        args,
        output_pattern,
        first_segment_file,
    }
}

fn push_video_args(args: &mut Vec<String>, request: &PlanRequest<'_>) {
    let variant = request.variant;
    let use_hw = request.use_hardware;
    let (width, height) = variant.resolution.unwrap_or((1280, 720));

    if request.variant_forced_sdr {
        args.push("-vf".to_string());
        args.push(format!(
            "scale={}:{},zscale=transfer=bt709:primaries=bt709:matrix=bt709,format=yuv420p",
            width, height
        ));
    } else {
        args.push("-vf".to_string());
        args.push(format!("scale={}:{}", width, height));
    }

    if use_hw {
        args.push("-c:v".to_string());
        args.push("h264_nvenc".to_string());
        args.push("-preset".to_string());
        args.push("p4".to_string());
    } else {
        args.push("-c:v".to_string());
        args.push("libx264".to_string());
        args.push("-preset".to_string());
        args.push("veryfast".to_string());
    }

    args.push("-b:v".to_string());
    args.push(format!("{}k", bitrate_for(height)));
    args.push("-g".to_string());
    args.push(format!("{}", (request.segment_duration_secs * 24.0) as u64));
    args.push("-force_key_frames".to_string());
    args.push(format!("expr:gte(t,n_forced*{})", request.segment_duration_secs));
    args.push("-an".to_string());

    if variant.is_iframe {
        args.push("-hls_flags".to_string());
        args.push("iframes_only".to_string());
    }
}

fn push_audio_args(args: &mut Vec<String>, request: &PlanRequest<'_>) {
    let variant = request.variant;
    let track_index = variant.track_index.unwrap_or(0);
    let channels = variant.channels.unwrap_or(2);

    args.push("-map".to_string());
    args.push(format!("0:a:{}", track_index));
    args.push("-c:a".to_string());
    args.push("aac".to_string());
    args.push("-b:a".to_string());
    args.push(if channels > 2 { "384k".to_string() } else { "128k".to_string() });
    args.push("-ac".to_string());
    args.push(channels.to_string());
    args.push("-vn".to_string());
}

fn bitrate_for(height: u32) -> u32 {
    match height {
        h if h >= 2160 => 12000,
        h if h >= 1080 => 5000,
        h if h >= 720 => 2800,
        h if h >= 480 => 1400,
        _ => 800,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hls_gateway_core::{Variant, VariantLabel};

    #[tokio::test]
    async fn streaming_plan_includes_start_number_and_playlist() {
        let planner = FfmpegEncoderPlanner::new();
        let variant = Variant::video(VariantLabel::new("720p"), (1280, 720));
        let plan = planner
            .plan(PlanRequest {
                source_path: Path::new("/movies/x.mkv"),
                variant: &variant,
                shape: PlanShape::Streaming { start_segment: 10 },
                segment_duration_secs: 5.0,
                use_hardware: false,
                variant_forced_sdr: false,
            })
            .await
            .unwrap();
        assert!(plan.args.contains(&"-start_number".to_string()));
        assert_eq!(plan.first_segment_file, "010.ts");
        assert!(plan.args.iter().any(|a| a == "libx264"));
    }

    #[tokio::test]
    async fn hardware_plan_uses_nvenc() {
        let planner = FfmpegEncoderPlanner::new();
        let variant = Variant::video(VariantLabel::new("1080p"), (1920, 1080));
        let plan = planner
            .plan(PlanRequest {
                source_path: Path::new("/movies/x.mkv"),
                variant: &variant,
                shape: PlanShape::Streaming { start_segment: 0 },
                segment_duration_secs: 5.0,
                use_hardware: true,
                variant_forced_sdr: false,
            })
            .await
            .unwrap();
        assert!(plan.args.iter().any(|a| a == "h264_nvenc"));
    }

    #[tokio::test]
    async fn audio_plan_maps_track_index() {
        let planner = FfmpegEncoderPlanner::new();
        let variant = Variant::audio(VariantLabel::new("audio_0_2"), 0, 2);
        let plan = planner
            .plan(PlanRequest {
                source_path: Path::new("/movies/x.mkv"),
                variant: &variant,
                shape: PlanShape::Streaming { start_segment: 0 },
                segment_duration_secs: 5.0,
                use_hardware: false,
                variant_forced_sdr: false,
            })
            .await
            .unwrap();
        assert!(plan.args.contains(&"0:a:0".to_string()));
    }
}
