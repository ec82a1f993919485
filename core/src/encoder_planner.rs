//! `EncoderPlanner` interface (C6, spec §4.6).
//!
//! The core never inspects `args`; it only schedules the resulting process
//! (spec §1, §4.6). Concrete planners live outside this crate — see
//! `hls-gateway-server::encoder_planner_ffmpeg` for one implementation — the
//! same externally-supplied-trait shape as `v0l-zap-stream-core`'s `Overseer`.

use async_trait::async_trait;

use crate::error::Result;
use crate::ids::{SegmentIndex, Variant};

/// What the planner was asked to produce: a whole streaming run starting at a
/// segment, or one explicit segment at a computed offset (spec §4.6).
#[derive(Debug, Clone)]
pub enum PlanShape {
    /// Produce a playlist and a sequence of segments starting at `start_segment`.
    Streaming { start_segment: SegmentIndex },
    /// Produce exactly one file at a computed offset.
    ExplicitSegment { segment: SegmentIndex },
}

/// Inputs to a planning call.
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub source_path: &'a std::path::Path,
    pub variant: &'a Variant,
    pub shape: PlanShape,
    pub segment_duration_secs: f64,
    pub use_hardware: bool,
    /// Force SDR output even if the source is HDR (tonemap), spec §9 open question.
    pub variant_forced_sdr: bool,
}

/// What to hand the subprocess supervisor.
#[derive(Debug, Clone)]
pub struct EncoderPlan {
    pub args: Vec<String>,
    pub output_pattern: String,
    pub first_segment_file: String,
}

/// Produces the argument vector for an encoder run. The core depends on this
/// trait only; the concrete implementation (flag selection, HDR tonemapping,
/// keyframe forcing, iframe-playlist production) is delegated per spec §9.
#[async_trait]
pub trait EncoderPlanner: Send + Sync {
    async fn plan(&self, request: PlanRequest<'_>) -> Result<EncoderPlan>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::VariantLabel;

    struct FixedPlanner;

    #[async_trait]
    impl EncoderPlanner for FixedPlanner {
        async fn plan(&self, request: PlanRequest<'_>) -> Result<EncoderPlan> {
            Ok(EncoderPlan {
                args: vec!["ffmpeg".into(), "-i".into(), request.source_path.display().to_string()],
                output_pattern: "%03d.ts".into(),
                first_segment_file: "000.ts".into(),
            })
        }
    }

    #[tokio::test]
    async fn planner_trait_object_is_usable() {
        let planner: Box<dyn EncoderPlanner> = Box::new(FixedPlanner);
        let variant = Variant::video(VariantLabel::new("720p"), (1280, 720));
        let plan = planner
            .plan(PlanRequest {
                source_path: std::path::Path::new("/movies/x.mkv"),
                variant: &variant,
                shape: PlanShape::Streaming { start_segment: 0 },
                segment_duration_secs: 5.0,
                use_hardware: false,
                variant_forced_sdr: false,
            })
            .await
            .unwrap();
        assert_eq!(plan.first_segment_file, "000.ts");
    }
}
