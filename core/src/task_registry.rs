//! Canonical `(VideoId, VariantLabel) → Task` registry with concurrency caps
//! (C8, spec §4.8). Grounded on `hls-vod-server/src/state.rs`'s `DashMap`-backed
//! `AppState` registries.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::ids::{SegmentIndex, VariantLabel, VideoId};
use crate::segment_store::SegmentRange;
use crate::supervisor::SupervisorHandle;

pub type ClientId = u64;

/// Key under which a `Task` is registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub video_id: VideoId,
    pub variant: VariantLabel,
}

impl TaskKey {
    pub fn new(video_id: VideoId, variant: VariantLabel) -> Self {
        TaskKey { video_id, variant }
    }
}

/// Produced-segment bookkeeping for a task (spec §3).
#[derive(Debug, Clone, Default)]
pub struct GeneratedRanges {
    pub ranges: Vec<SegmentRange>,
    pub verified_at: Option<Instant>,
}

impl GeneratedRanges {
    pub fn contains(&self, segment: SegmentIndex) -> bool {
        self.ranges.iter().any(|r| r.contains(segment))
    }

    pub fn nearest_distance(&self, segment: SegmentIndex) -> Option<u64> {
        self.ranges.iter().map(|r| r.distance(segment)).min()
    }
}

/// A single running (or pending) transcoder job for one variant (spec §3).
#[derive(Clone)]
pub struct Task {
    pub owner: ClientId,
    pub attached: HashSet<ClientId>,
    pub segment_start: SegmentIndex,
    pub latest_segment: SegmentIndex,
    pub last_activity: Instant,
    pub priority: i32,
    pub pending_start: bool,
    pub needs_restart: bool,
    pub finished: bool,
    pub generated: GeneratedRanges,
    pub process: Option<Arc<SupervisorHandle>>,
    pub is_audio: bool,
    pub channels: Option<u16>,
    pub created_at: Instant,
}

impl Task {
    pub fn new(owner: ClientId, segment_start: SegmentIndex, priority: i32, is_audio: bool) -> Self {
        let now = Instant::now();
        let mut attached = HashSet::new();
        attached.insert(owner);
        Task {
            owner,
            attached,
            segment_start,
            latest_segment: segment_start,
            last_activity: now,
            priority,
            pending_start: true,
            needs_restart: false,
            finished: false,
            generated: GeneratedRanges::default(),
            process: None,
            is_audio,
            channels: None,
            created_at: now,
        }
    }

    pub fn completed_segments(&self) -> u64 {
        self.latest_segment.saturating_sub(self.segment_start)
    }

    fn touch(&mut self, client: ClientId, segment: SegmentIndex) {
        self.last_activity = Instant::now();
        self.attached.insert(client);
        if segment > self.latest_segment {
            self.latest_segment = segment;
        }
    }

    fn touch_activity(&mut self, client: ClientId) {
        self.last_activity = Instant::now();
        self.attached.insert(client);
    }
}

/// Caps enforced on every registry mutation (spec §4.8, §8).
#[derive(Debug, Clone, Copy)]
pub struct RegistryLimits {
    pub max_concurrent_transcodings: usize,
    pub max_transcodings_per_client: usize,
}

/// Why a task insertion was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitError {
    GlobalCapReached,
    PerClientCapReached,
}

/// The process-wide transcoding task registry. All reads/writes go through
/// `DashMap`'s per-shard locking; spawning/killing subprocesses happens
/// outside any lock, using a locally-captured `Arc<SupervisorHandle>` (spec §5).
#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<TaskKey, Task>,
    limits: std::sync::OnceLock<RegistryLimits>,
}

impl TaskRegistry {
    pub fn new(limits: RegistryLimits) -> Self {
        let registry = TaskRegistry::default();
        let _ = registry.limits.set(limits);
        registry
    }

    fn limits(&self) -> RegistryLimits {
        *self.limits.get().unwrap_or(&RegistryLimits {
            max_concurrent_transcodings: 8,
            max_transcodings_per_client: 3,
        })
    }

    pub fn get(&self, key: &TaskKey) -> Option<Task> {
        self.tasks.get(key).map(|r| r.clone())
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.tasks.contains_key(key)
    }

    fn active_count(&self) -> usize {
        self.tasks.iter().filter(|r| !r.value().finished).count()
    }

    fn active_count_for_owner(&self, owner: ClientId) -> usize {
        self.tasks
            .iter()
            .filter(|r| !r.value().finished && r.value().owner == owner)
            .count()
    }

    /// Insert a new task, enforcing the global and per-owner concurrency caps.
    /// If a cap would be breached, attempts to evict the lowest-priority task
    /// that is neither `key` nor shared by more than one client; otherwise
    /// returns an `AdmitError` and leaves the registry unchanged.
    pub fn upsert_new(&self, key: TaskKey, task: Task) -> Result<(), AdmitError> {
        if self.tasks.contains_key(&key) {
            self.tasks.insert(key, task);
            return Ok(());
        }

        if self.active_count() >= self.limits().max_concurrent_transcodings
            && !self.try_evict_for(&key)
        {
            return Err(AdmitError::GlobalCapReached);
        }
        if self.active_count_for_owner(task.owner) >= self.limits().max_transcodings_per_client
            && !self.try_evict_for(&key)
        {
            return Err(AdmitError::PerClientCapReached);
        }

        self.tasks.insert(key, task);
        Ok(())
    }

    /// Check whether a new task for `owner` at `key` would be admitted under
    /// the concurrency caps, without mutating the registry. Used to decide
    /// whether it's worth spawning a subprocess before doing so (spec §4.10
    /// step 5: a blocked restart must not leave an orphan process behind).
    pub fn would_admit(&self, key: &TaskKey, owner: ClientId) -> Result<(), AdmitError> {
        if self.tasks.contains_key(key) {
            return Ok(());
        }
        if self.active_count() >= self.limits().max_concurrent_transcodings
            && !self.has_evictable(key)
        {
            return Err(AdmitError::GlobalCapReached);
        }
        if self.active_count_for_owner(owner) >= self.limits().max_transcodings_per_client
            && !self.has_evictable(key)
        {
            return Err(AdmitError::PerClientCapReached);
        }
        Ok(())
    }

    fn has_evictable(&self, protect: &TaskKey) -> bool {
        self.tasks
            .iter()
            .any(|r| !r.value().finished && r.key() != protect && r.value().attached.len() <= 1)
    }

    /// Force-replace whatever task (if any) exists at `key`, bypassing caps.
    /// Used by the orchestrator right after it has already killed the previous
    /// process occupying that key.
    pub fn replace(&self, key: TaskKey, task: Task) {
        self.tasks.insert(key, task);
    }

    pub fn remove(&self, key: &TaskKey) -> Option<Task> {
        self.tasks.remove(key).map(|(_, t)| t)
    }

    /// Update `last_activity`, attach `client`, and raise `latest_segment` if
    /// `segment` is newer (spec §4.8).
    pub fn touch(&self, key: &TaskKey, client: ClientId, segment: SegmentIndex) {
        if let Some(mut entry) = self.tasks.get_mut(key) {
            entry.touch(client, segment);
        }
    }

    /// Update `last_activity` and attach `client` without raising
    /// `latest_segment` — used for the already-on-disk fast path, which must
    /// not mutate the registry's segment bookkeeping (spec §4.10 step 1, §8).
    pub fn touch_activity(&self, key: &TaskKey, client: ClientId) {
        if let Some(mut entry) = self.tasks.get_mut(key) {
            entry.touch_activity(client);
        }
    }

    pub fn mark_generated(&self, key: &TaskKey, ranges: Vec<SegmentRange>) {
        if let Some(mut entry) = self.tasks.get_mut(key) {
            entry.generated = GeneratedRanges {
                ranges,
                verified_at: Some(Instant::now()),
            };
        }
    }

    pub fn mark_needs_restart(&self, key: &TaskKey, needs_restart: bool) {
        if let Some(mut entry) = self.tasks.get_mut(key) {
            entry.needs_restart = needs_restart;
        }
    }

    pub fn mark_finished(&self, key: &TaskKey) {
        if let Some(mut entry) = self.tasks.get_mut(key) {
            entry.finished = true;
        }
    }

    pub fn detach(&self, key: &TaskKey, client: ClientId) {
        if let Some(mut entry) = self.tasks.get_mut(key) {
            entry.attached.remove(&client);
        }
    }

    /// Reassign ownership to another attached client, used when the current
    /// owner's session goes stale but others remain attached (spec §3/§4.11).
    pub fn transfer_ownership(&self, key: &TaskKey, new_owner: ClientId) -> bool {
        if let Some(mut entry) = self.tasks.get_mut(key) {
            if entry.attached.contains(&new_owner) {
                entry.owner = new_owner;
                return true;
            }
        }
        false
    }

    pub fn all_keys(&self) -> Vec<TaskKey> {
        self.tasks.iter().map(|r| r.key().clone()).collect()
    }

    pub fn keys_for_owner(&self, owner: ClientId) -> Vec<TaskKey> {
        self.tasks
            .iter()
            .filter(|r| r.value().owner == owner)
            .map(|r| r.key().clone())
            .collect()
    }

    /// Try to evict the lowest-priority non-finished task that isn't `protect`
    /// and has at most one attached client, returning the evicted key/task if any.
    fn try_evict_for(&self, protect: &TaskKey) -> bool {
        let victim = self
            .tasks
            .iter()
            .filter(|r| {
                !r.value().finished && r.key() != protect && r.value().attached.len() <= 1
            })
            .min_by_key(|r| r.value().priority)
            .map(|r| r.key().clone());

        match victim {
            Some(key) => {
                self.tasks.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Evict the given key outright (used once the caller has already stopped
    /// its subprocess), returning the removed task so the caller can kill it.
    pub fn evict(&self, key: &TaskKey) -> Option<Task> {
        self.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_global: usize, max_per_client: usize) -> RegistryLimits {
        RegistryLimits {
            max_concurrent_transcodings: max_global,
            max_transcodings_per_client: max_per_client,
        }
    }

    fn key(id: &str, variant: &str) -> TaskKey {
        TaskKey::new(
            crate::ids::VideoId::sanitize(id),
            VariantLabel::new(variant),
        )
    }

    #[test]
    fn upsert_respects_global_cap_by_evicting_lowest_priority() {
        let registry = TaskRegistry::new(limits(2, 10));
        registry
            .upsert_new(key("a", "480p"), Task::new(1, 0, 1, false))
            .unwrap();
        registry
            .upsert_new(key("b", "1080p"), Task::new(2, 0, 3, false))
            .unwrap();
        // Third insertion breaches the global cap of 2; should evict the 480p task (priority 1).
        registry
            .upsert_new(key("c", "720p"), Task::new(3, 0, 2, false))
            .unwrap();

        assert!(!registry.contains(&key("a", "480p")));
        assert!(registry.contains(&key("b", "1080p")));
        assert!(registry.contains(&key("c", "720p")));
    }

    #[test]
    fn eviction_never_touches_multi_client_tasks() {
        let registry = TaskRegistry::new(limits(1, 10));
        let mut shared = Task::new(1, 0, 1, false);
        shared.attached.insert(2);
        registry.upsert_new(key("a", "480p"), shared).unwrap();

        let result = registry.upsert_new(key("b", "720p"), Task::new(3, 0, 4, false));
        assert_eq!(result, Err(AdmitError::GlobalCapReached));
        assert!(registry.contains(&key("a", "480p")));
    }

    #[test]
    fn per_client_cap_is_enforced() {
        let registry = TaskRegistry::new(limits(10, 1));
        registry
            .upsert_new(key("a", "480p"), Task::new(1, 0, 1, false))
            .unwrap();
        let result = registry.upsert_new(key("a", "720p"), Task::new(1, 0, 1, false));
        assert_eq!(result, Err(AdmitError::PerClientCapReached));
    }

    #[test]
    fn touch_raises_latest_segment_and_attaches_client() {
        let registry = TaskRegistry::new(limits(10, 10));
        let k = key("a", "720p");
        registry.upsert_new(k.clone(), Task::new(1, 0, 1, false)).unwrap();
        registry.touch(&k, 2, 5);
        let task = registry.get(&k).unwrap();
        assert_eq!(task.latest_segment, 5);
        assert!(task.attached.contains(&2));
    }

    #[test]
    fn touch_does_not_lower_latest_segment() {
        let registry = TaskRegistry::new(limits(10, 10));
        let k = key("a", "720p");
        let mut t = Task::new(1, 0, 1, false);
        t.latest_segment = 10;
        registry.upsert_new(k.clone(), t).unwrap();
        registry.touch(&k, 1, 3);
        assert_eq!(registry.get(&k).unwrap().latest_segment, 10);
    }

    #[test]
    fn owner_is_always_in_attached_on_creation() {
        let task = Task::new(7, 0, 1, false);
        assert!(task.attached.contains(&task.owner));
    }

    #[test]
    fn transfer_ownership_requires_new_owner_attached() {
        let registry = TaskRegistry::new(limits(10, 10));
        let k = key("a", "720p");
        registry.upsert_new(k.clone(), Task::new(1, 0, 1, false)).unwrap();
        assert!(!registry.transfer_ownership(&k, 99));
        registry.touch(&k, 2, 0);
        assert!(registry.transfer_ownership(&k, 2));
        assert_eq!(registry.get(&k).unwrap().owner, 2);
    }
}
