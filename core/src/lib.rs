//! `hls-gateway-core`: the segment orchestration engine for an on-demand ABR
//! HLS streaming gateway.
//!
//! This crate owns no HTTP surface and spawns no concrete encoder or prober —
//! those are supplied by a host crate (`hls-gateway-server`) through the
//! [`EncoderPlanner`] and [`SegmentProber`] traits. What lives here is the
//! state machine that decides, for every requested segment, whether to serve
//! an existing file, attach to a running transcoder, or restart one: the
//! task registry, client session tracker, subprocess supervisor, and the
//! `ensure_segment` operation that ties them together.

pub mod client_session;
pub mod config;
pub mod encoder_planner;
pub mod error;
pub mod hw_slots;
pub mod ids;
pub mod janitor;
pub mod orchestrator;
pub mod path_layout;
pub mod playlist_cache;
pub mod segment_store;
pub mod session_lock;
pub mod supervisor;
pub mod task_registry;
pub mod variant_manifest;

pub use client_session::{ClientSessionTracker, IntentKind, RequestAnalysis};
pub use config::Config;
pub use encoder_planner::{EncoderPlan, EncoderPlanner, PlanRequest, PlanShape};
pub use error::{CoreError, ErrorKind, Result};
pub use hw_slots::HwSlotLimiter;
pub use ids::{pad3, SegmentIndex, Variant, VariantKind, VariantLabel, VideoId, VideoRange};
pub use janitor::Janitor;
pub use orchestrator::{EnsureSegmentRequest, Orchestrator};
pub use path_layout::{PathLayout, DEFAULT_SEGMENT_EXT};
pub use playlist_cache::{PlaylistCache, PlaylistType};
pub use task_registry::{ClientId, RegistryLimits, TaskRegistry};
pub use variant_manifest::{SegmentProbe, SegmentProber, VariantInfo, VariantManifest};
