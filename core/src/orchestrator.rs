//! Top-level `ensure_segment` operation (C10, spec §4.10). Combines the task
//! registry (C8), client session tracker (C9), and segment store (C2) to
//! decide whether to serve an existing segment, attach to a running task, or
//! restart the producing process.
//!
//! Grounded on `hls-vod-server/src/state.rs::get_or_generate_segment`'s
//! serve-or-generate shape, generalized with the momentum/restart heuristics
//! of spec §4.10.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::client_session::{ClientSessionTracker, IntentKind, RequestAnalysis};
use crate::encoder_planner::{EncoderPlan, EncoderPlanner, PlanRequest, PlanShape};
use crate::error::{CoreError, Result};
use crate::hw_slots::HwSlotLimiter;
use crate::ids::{SegmentIndex, Variant, VideoId};
use crate::path_layout::PathLayout;
use crate::segment_store::{SegmentStore, StabilityOutcome};
use crate::session_lock::SessionLock;
use crate::supervisor::{ProcessState, Supervisor, SupervisorHandle};
use crate::task_registry::{ClientId, Task, TaskKey, TaskRegistry};

/// Segments within this many positions of the last-known one are "normal" playback.
pub const NORMAL_PLAYBACK_RANGE: i64 = 20;

/// Completed-segment count below which momentum does not yet widen the threshold.
pub const TRANSCODING_MIN_SEGMENTS: i64 = 10;

/// Per additional completed segment beyond `TRANSCODING_MIN_SEGMENTS`, widen the
/// momentum threshold by this many segment-positions (spec §4.10, unspecified
/// numerically in the source spec; chosen to make long-running tasks meaningfully
/// harder to preempt without making restart effectively unreachable).
pub const TRANSCODING_MOMENTUM_FACTOR: f64 = 1.5;

/// Segments the encoder is assumed to be running ahead of the last request it served.
pub const PRELOAD_THRESHOLD: i64 = 3;

/// Requests within this long of the task's last activity always attach, regardless
/// of distance (spec §4.10).
pub const SEEK_COOLDOWN: Duration = Duration::from_millis(2000);

/// Default stability poll parameters for `ensure_segment` (spec §4.10/§8).
pub const SEGMENT_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const SEGMENT_POLL_MAX_TRIES: u32 = 5000;

fn now_since(instant: Instant) -> Duration {
    instant.elapsed()
}

/// A `Clone`-able snapshot of a `CoreError`, needed because the in-flight dedup
/// map shares one outcome across every waiting caller via `OnceCell`, and
/// `CoreError` itself (wrapping `std::io::Error`) is not `Clone`.
#[derive(Debug, Clone)]
struct DedupError {
    kind: crate::error::ErrorKind,
    message: String,
}

impl From<&CoreError> for DedupError {
    fn from(e: &CoreError) -> Self {
        DedupError {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<DedupError> for CoreError {
    fn from(e: DedupError) -> Self {
        match e.kind {
            crate::error::ErrorKind::NotReady => CoreError::NotReady(e.message),
            crate::error::ErrorKind::NotFound => CoreError::NotFound(e.message),
            crate::error::ErrorKind::Transient => CoreError::Transient(e.message),
            crate::error::ErrorKind::ResourceExhausted => CoreError::ResourceExhausted(e.message),
            crate::error::ErrorKind::SupervisorFailure => CoreError::SupervisorFailure(e.message),
        }
    }
}

type DedupOutcome = std::result::Result<PathBuf, DedupError>;

/// Inputs for one `ensure_segment` call.
pub struct EnsureSegmentRequest<'a> {
    pub client_id: ClientId,
    pub video_id: VideoId,
    pub variant: Variant,
    pub source_path: &'a std::path::Path,
    pub segment: SegmentIndex,
    pub segment_duration_secs: f64,
    pub use_hardware: bool,
    pub variant_forced_sdr: bool,
    pub segments_to_analyze: usize,
    /// On-disk segment extension, `ts` or `m4s` (spec §3). Parsed from the
    /// requested filename by the HTTP surface, not decided here.
    pub ext: &'static str,
}

/// What `decide` concluded for a request against a known or synthesized task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    StartNew,
    Attach,
    Restart,
}

/// Coordinates the task registry, client sessions, segment store, and
/// subprocess supervisor behind the single `ensure_segment` entry point.
pub struct Orchestrator {
    layout: PathLayout,
    store: SegmentStore,
    lock: SessionLock,
    tasks: Arc<TaskRegistry>,
    sessions: Arc<ClientSessionTracker>,
    supervisor: Supervisor,
    hw_slots: HwSlotLimiter,
    planner: Arc<dyn EncoderPlanner>,
    in_flight: DashMap<(VideoId, String, SegmentIndex), Arc<OnceCell<DedupOutcome>>>,
}

impl Orchestrator {
    /// `tasks` and `sessions` are `Arc`-shared with the `Janitor` (spec
    /// §4.11), which sweeps the same registries from a background task.
    pub fn new(
        layout: PathLayout,
        tasks: Arc<TaskRegistry>,
        sessions: Arc<ClientSessionTracker>,
        hw_slots: HwSlotLimiter,
        planner: Arc<dyn EncoderPlanner>,
    ) -> Self {
        Orchestrator {
            layout,
            store: SegmentStore::new(),
            lock: SessionLock::new(),
            tasks,
            sessions,
            supervisor: Supervisor::new(),
            hw_slots,
            planner,
            in_flight: DashMap::new(),
        }
    }

    pub fn sessions(&self) -> &ClientSessionTracker {
        &self.sessions
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Resolve a segment to a stable, on-disk path, spawning or attaching to a
    /// transcoder task as needed (spec §4.10, steps 1-8).
    pub async fn ensure_segment(&self, req: EnsureSegmentRequest<'_>) -> Result<PathBuf> {
        let path = if req.variant.is_iframe {
            self.layout
                .iframe_segment_path(&req.video_id, &req.variant.label, req.segment, req.ext)
        } else {
            self.layout
                .segment_path(&req.video_id, &req.variant.label, req.segment, req.ext)
        };

        // Step 1: already on disk, no need to touch the task registry's decision logic.
        if self.store.exists(&path) {
            let key = TaskKey::new(req.video_id.clone(), req.variant.label.clone());
            self.tasks.touch_activity(&key, req.client_id);
            let lock_path = self.layout.lock_path(&req.video_id, &req.variant.label);
            let _ = self.lock.touch(&lock_path).await;
            return Ok(path);
        }

        let dedup_key = (req.video_id.clone(), req.variant.label.as_str().to_string(), req.segment);
        let cell = self
            .in_flight
            .entry(dedup_key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let outcome = cell
            .get_or_init(|| async {
                self.ensure_segment_uncached(&req, &path)
                    .await
                    .map_err(|e| DedupError::from(&e))
            })
            .await
            .clone();

        self.in_flight.remove(&dedup_key);
        outcome.map_err(|e| CoreError::from(e))
    }

    async fn ensure_segment_uncached(
        &self,
        req: &EnsureSegmentRequest<'_>,
        path: &std::path::Path,
    ) -> Result<PathBuf> {
        let key = TaskKey::new(req.video_id.clone(), req.variant.label.clone());

        // Step 2: refresh session history and classify this request.
        let is_multichannel = req.variant.kind == crate::ids::VariantKind::Audio
            && req.variant.channels.unwrap_or(2) > 2;
        let (analysis, stop_variants) = self.sessions.update(
            req.client_id,
            &req.video_id,
            &req.variant.label,
            req.variant.priority(),
            req.segment,
        );
        for stopped in stop_variants {
            self.stop_non_active_variant(&req.video_id, &stopped, req.client_id)
                .await;
        }

        // Step 3: consult the registry, synthesizing a task from an on-disk scan if absent
        // so clients benefit from past work even after a restart (spec §4.10 step 3).
        let existing = match self.tasks.get(&key) {
            Some(task) => Some(task),
            None => {
                let dir = self.layout.variant_dir(&req.video_id, &req.variant.label);
                let ranges = self.store.scan_ranges(&dir, req.ext).unwrap_or_default();
                if ranges.is_empty() {
                    None
                } else {
                    let mut synthetic = Task::new(
                        req.client_id,
                        ranges[0].start,
                        req.variant.priority(),
                        req.variant.kind == crate::ids::VariantKind::Audio,
                    );
                    synthetic.latest_segment = ranges.last().unwrap().end;
                    synthetic.generated.ranges = ranges;
                    synthetic.pending_start = false;
                    self.tasks.replace(key.clone(), synthetic.clone());
                    Some(synthetic)
                }
            }
        };

        let decision = decide(existing.as_ref(), req.segment, analysis, is_multichannel);

        match decision {
            Decision::StartNew => {
                self.start_new_task(req, &key, req.segment).await?;
            }
            Decision::Restart => {
                if let Some(old) = self.tasks.remove(&key) {
                    if let Some(handle) = &old.process {
                        self.supervisor.kill(handle).await;
                    }
                }
                self.start_new_task(req, &key, req.segment).await?;
            }
            Decision::Attach => {
                self.tasks.touch(&key, req.client_id, req.segment);
                self.tasks.mark_needs_restart(&key, false);
            }
        }

        let lock_path = self.layout.lock_path(&req.video_id, &req.variant.label);
        let _ = self.lock.touch(&lock_path).await;

        // Step 8: wait for the file to appear and stabilize.
        match self.store.wait_for_stability(path, SEGMENT_POLL_INTERVAL, SEGMENT_POLL_MAX_TRIES).await {
            StabilityOutcome::Ok => Ok(path.to_path_buf()),
            StabilityOutcome::Timeout => {
                self.tasks.mark_needs_restart(&key, true);
                Err(CoreError::not_ready(format!(
                    "segment {} for {}/{} did not stabilize in time",
                    req.segment, req.video_id, req.variant.label
                )))
            }
            StabilityOutcome::Missing => Err(CoreError::not_ready(format!(
                "segment {} for {}/{} not yet produced",
                req.segment, req.video_id, req.variant.label
            ))),
        }
    }

    async fn start_new_task(
        &self,
        req: &EnsureSegmentRequest<'_>,
        key: &TaskKey,
        start_segment: SegmentIndex,
    ) -> Result<()> {
        // Check admission before spawning: a blocked restart must not leave an
        // orphan subprocess with no task tracking its lifetime (spec §4.10 step 5).
        if self.tasks.would_admit(key, req.client_id).is_err() {
            let mut placeholder = Task::new(
                req.client_id,
                start_segment,
                req.variant.priority(),
                req.variant.kind == crate::ids::VariantKind::Audio,
            );
            placeholder.pending_start = true;
            self.tasks.replace(key.clone(), placeholder);
            return Ok(());
        }

        let hw_slot = if req.use_hardware {
            self.hw_slots.acquire(&format!("{}/{}", req.video_id, req.variant.label))
        } else {
            None
        };
        let use_hardware = hw_slot.is_some();

        let plan = self
            .planner
            .plan(PlanRequest {
                source_path: req.source_path,
                variant: &req.variant,
                shape: PlanShape::Streaming { start_segment },
                segment_duration_secs: req.segment_duration_secs,
                use_hardware,
                variant_forced_sdr: req.variant_forced_sdr,
            })
            .await?;

        let mut new_task = Task::new(req.client_id, start_segment, req.variant.priority(), req.variant.kind == crate::ids::VariantKind::Audio);
        new_task.pending_start = false;

        let variant_dir = self.layout.variant_dir(&req.video_id, &req.variant.label);
        tokio::fs::create_dir_all(&variant_dir).await?;
        let done_marker = self.layout.done_marker_path(&req.video_id, &req.variant.label);

        let handle = Arc::new(
            self.supervisor
                .spawn(&plan.args, &variant_dir, Some(done_marker), hw_slot)?,
        );
        new_task.process = Some(handle.clone());
        self.watch_for_failure(key.clone(), handle);

        // A concurrent caller may have raced us past the admission check above;
        // `upsert_new` re-validates and, in the rare case it still can't admit,
        // falls back to the placeholder path while the process we just spawned
        // is killed so nothing is ever left untracked.
        if self.tasks.upsert_new(key.clone(), new_task.clone()).is_err() {
            if let Some(handle) = &new_task.process {
                self.supervisor.kill(handle).await;
            }
            let mut placeholder = Task::new(
                req.client_id,
                start_segment,
                req.variant.priority(),
                req.variant.kind == crate::ids::VariantKind::Audio,
            );
            placeholder.pending_start = true;
            self.tasks.replace(key.clone(), placeholder);
        }
        Ok(())
    }

    /// Report an encoder's terminal exit to the Task Registry (spec §4.4:
    /// "failure of an encoder is reported to the Task Registry"), so the
    /// next `ensure_segment` call for this key restarts it instead of
    /// waiting forever on a dead process.
    fn watch_for_failure(&self, key: TaskKey, handle: Arc<SupervisorHandle>) {
        let tasks = self.tasks.clone();
        tokio::spawn(async move {
            let mut rx = handle.subscribe();
            loop {
                let state = rx.borrow().clone();
                if state.is_terminal() {
                    // A deliberate kill (restart, variant stop, janitor sweep) is not
                    // a failure; only an unexpected non-zero/signalled exit is.
                    if !state.is_success() && !matches!(state, ProcessState::Killed) {
                        tasks.mark_needs_restart(&key, true);
                    }
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    async fn stop_non_active_variant(&self, video_id: &VideoId, variant: &crate::ids::VariantLabel, client: ClientId) {
        let key = TaskKey::new(video_id.clone(), variant.clone());
        self.tasks.detach(&key, client);
    }

    /// Outcome of the encoder plan used for `EncoderPlan` display/debug endpoints.
    pub fn describe_plan(&self, plan: &EncoderPlan) -> String {
        format!("{} -> {}", plan.args.join(" "), plan.output_pattern)
    }
}

/// Implements `shouldStartNew` (spec §4.10 step 4), evaluated in the documented order.
fn decide(
    task: Option<&Task>,
    segment: SegmentIndex,
    analysis: RequestAnalysis,
    is_multichannel_audio: bool,
) -> Decision {
    let task = match task {
        None => return Decision::StartNew,
        Some(t) => t,
    };

    if task.generated.contains(segment) {
        return Decision::Attach;
    }

    if let Some(distance) = task.generated.nearest_distance(segment) {
        if distance < (NORMAL_PLAYBACK_RANGE / 2) as u64 {
            return Decision::Attach;
        }
    }

    let completed = task.completed_segments() as i64;
    let mut momentum_threshold = NORMAL_PLAYBACK_RANGE as f64
        + (0.max(completed - TRANSCODING_MIN_SEGMENTS) as f64) * TRANSCODING_MOMENTUM_FACTOR;
    if analysis.is_normal_player_behavior {
        momentum_threshold *= 1.5;
    }
    if is_multichannel_audio {
        momentum_threshold *= 1.25;
    }

    let projected = task.latest_segment as i64 + PRELOAD_THRESHOLD;
    let distance_from_projection = (segment as i64 - projected).abs() as f64;

    if distance_from_projection < momentum_threshold {
        return Decision::Attach;
    }

    if now_since(task.last_activity) < SEEK_COOLDOWN {
        return Decision::Attach;
    }

    if matches!(analysis.kind, IntentKind::UserSeek) {
        return Decision::Restart;
    }

    if distance_from_projection > 2.0 * momentum_threshold {
        return Decision::Restart;
    }

    if task.attached.len() > 1 && analysis.is_normal_player_behavior {
        return Decision::Attach;
    }

    Decision::Attach
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_session::IntentKind;

    fn analysis(kind: IntentKind, normal: bool) -> RequestAnalysis {
        RequestAnalysis {
            kind,
            position: 0,
            distance: None,
            confidence: 0.9,
            is_normal_player_behavior: normal,
        }
    }

    #[test]
    fn no_task_always_starts_new() {
        let decision = decide(None, 5, analysis(IntentKind::Sequential, true), false);
        assert_eq!(decision, Decision::StartNew);
    }

    #[test]
    fn segment_already_generated_attaches() {
        let mut task = Task::new(1, 0, 1, false);
        task.generated.ranges = vec![crate::segment_store::SegmentRange { start: 0, end: 10 }];
        let decision = decide(Some(&task), 5, analysis(IntentKind::Sequential, true), false);
        assert_eq!(decision, Decision::Attach);
    }

    #[test]
    fn far_ahead_user_seek_triggers_restart() {
        let mut task = Task::new(1, 0, 1, false);
        task.latest_segment = 5;
        task.generated.ranges = vec![crate::segment_store::SegmentRange { start: 0, end: 5 }];
        task.last_activity = Instant::now() - Duration::from_secs(10);
        let decision = decide(Some(&task), 500, analysis(IntentKind::UserSeek, false), false);
        assert_eq!(decision, Decision::Restart);
    }

    #[test]
    fn recent_activity_always_attaches_regardless_of_distance() {
        let mut task = Task::new(1, 0, 1, false);
        task.latest_segment = 5;
        task.generated.ranges = vec![crate::segment_store::SegmentRange { start: 0, end: 5 }];
        // last_activity defaults to "now" in Task::new, well within SEEK_COOLDOWN.
        let decision = decide(Some(&task), 500, analysis(IntentKind::UserSeek, false), false);
        assert_eq!(decision, Decision::Attach);
    }

    #[test]
    fn sequential_nearby_request_attaches() {
        let mut task = Task::new(1, 0, 1, false);
        task.latest_segment = 5;
        task.generated.ranges = vec![crate::segment_store::SegmentRange { start: 0, end: 5 }];
        task.last_activity = Instant::now() - Duration::from_secs(10);
        let decision = decide(Some(&task), 8, analysis(IntentKind::Sequential, true), false);
        assert_eq!(decision, Decision::Attach);
    }
}
