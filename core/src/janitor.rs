//! Periodic maintenance sweeps (C11, spec §4.11): idle-session eviction,
//! variant-switch cleanup, finished-task reaping, and stale-lock removal.
//!
//! Grounded on `hls-vod-server/src/state.rs`'s `cleanup_expired_streams`
//! background loop, generalized across the task registry, session tracker,
//! and filesystem lock sweep.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::client_session::ClientSessionTracker;
use crate::path_layout::PathLayout;
use crate::session_lock::SessionLock;
use crate::supervisor::Supervisor;
use crate::task_registry::{ClientId, TaskKey, TaskRegistry};

/// A single maintenance sweep, run on a fixed interval by the server crate.
pub struct Janitor {
    tasks: Arc<TaskRegistry>,
    sessions: Arc<ClientSessionTracker>,
    layout: PathLayout,
    supervisor: Supervisor,
    lock: SessionLock,
    variant_switch_timeout: Duration,
}

impl Janitor {
    pub fn new(
        tasks: Arc<TaskRegistry>,
        sessions: Arc<ClientSessionTracker>,
        layout: PathLayout,
        variant_switch_timeout: Duration,
    ) -> Self {
        Janitor {
            tasks,
            sessions,
            layout,
            supervisor: Supervisor::new(),
            lock: SessionLock::new(),
            variant_switch_timeout,
        }
    }

    /// Purge idle client sessions, transferring task ownership to another
    /// attached client where possible, otherwise killing and removing the task.
    pub async fn sweep_idle_sessions(&self) {
        for client_id in self.sessions.drain_idle() {
            self.release_client_tasks(client_id).await;
        }
    }

    async fn release_client_tasks(&self, client_id: ClientId) {
        for key in self.tasks.keys_for_owner(client_id) {
            let Some(task) = self.tasks.get(&key) else { continue };
            let other = task.attached.iter().find(|&&c| c != client_id).copied();
            match other {
                Some(new_owner) => {
                    self.tasks.transfer_ownership(&key, new_owner);
                    self.tasks.detach(&key, client_id);
                }
                None => {
                    if let Some(handle) = &task.process {
                        self.supervisor.kill(handle).await;
                    }
                    self.tasks.remove(&key);
                }
            }
        }
    }

    /// Stop transcoding non-active variants that have gone untouched longer
    /// than `VARIANT_SWITCH_TIMEOUT` for each live client (spec §4.11).
    pub async fn sweep_inactive_variants(&self) {
        for (client_id, video_id, variant) in self.sessions.stale_non_active_variants(self.variant_switch_timeout) {
            let key = TaskKey::new(video_id, variant);
            if let Some(task) = self.tasks.get(&key) {
                if task.attached.len() <= 1 {
                    if let Some(handle) = &task.process {
                        self.supervisor.kill(handle).await;
                    }
                    self.tasks.remove(&key);
                } else {
                    self.tasks.detach(&key, client_id);
                }
            }
        }
    }

    /// Remove finished tasks, tasks with no attached clients, and stale
    /// `pendingStart` placeholders (spec §4.11).
    pub fn reap_dead_tasks(&self) {
        let placeholder_timeout = self.variant_switch_timeout * 2;
        for key in self.tasks.all_keys() {
            let Some(task) = self.tasks.get(&key) else { continue };
            let stale_pending = task.pending_start && task.created_at.elapsed() > placeholder_timeout;
            if task.finished || task.attached.is_empty() || stale_pending {
                self.tasks.remove(&key);
            }
        }
    }

    /// Remove variant directories whose lock mtime exceeds the stale threshold
    /// (spec §4.3/§4.11), scanning every `<output>/<video>/<variant>` pair.
    pub async fn sweep_stale_locks(&self) -> std::io::Result<usize> {
        let root = self.layout.root();
        if !root.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        let mut video_dirs = tokio::fs::read_dir(root).await?;
        while let Some(video_entry) = video_dirs.next_entry().await? {
            if !video_entry.file_type().await?.is_dir() {
                continue;
            }
            let video_path = video_entry.path();
            let mut variant_dirs = tokio::fs::read_dir(&video_path).await?;
            while let Some(variant_entry) = variant_dirs.next_entry().await? {
                if !variant_entry.file_type().await?.is_dir() {
                    continue;
                }
                let variant_path = variant_entry.path();
                let lock_path = variant_path.join("session.lock");
                if self.is_stale_or_missing(&lock_path) {
                    if tokio::fs::remove_dir_all(&variant_path).await.is_ok() {
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }

    fn is_stale_or_missing(&self, lock_path: &Path) -> bool {
        self.lock.is_stale(lock_path).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{VariantLabel, VideoId};
    use crate::task_registry::{RegistryLimits, Task};
    use tempfile::tempdir;

    fn registry() -> Arc<TaskRegistry> {
        Arc::new(TaskRegistry::new(RegistryLimits {
            max_concurrent_transcodings: 10,
            max_transcodings_per_client: 10,
        }))
    }

    #[tokio::test]
    async fn idle_session_with_sole_owner_kills_and_removes_task() {
        let tasks = registry();
        let sessions = Arc::new(ClientSessionTracker::new());
        let dir = tempdir().unwrap();
        let janitor = Janitor::new(tasks.clone(), sessions.clone(), PathLayout::new(dir.path()), Duration::from_secs(20));

        let key = TaskKey::new(VideoId::sanitize("movie"), VariantLabel::new("720p"));
        tasks.upsert_new(key.clone(), Task::new(1, 0, 1, false)).unwrap();

        janitor.release_client_tasks(1).await;
        assert!(!tasks.contains(&key));
    }

    #[tokio::test]
    async fn idle_session_with_other_attached_client_transfers_ownership() {
        let tasks = registry();
        let sessions = Arc::new(ClientSessionTracker::new());
        let dir = tempdir().unwrap();
        let janitor = Janitor::new(tasks.clone(), sessions.clone(), PathLayout::new(dir.path()), Duration::from_secs(20));

        let key = TaskKey::new(VideoId::sanitize("movie"), VariantLabel::new("720p"));
        let mut task = Task::new(1, 0, 1, false);
        task.attached.insert(2);
        tasks.upsert_new(key.clone(), task).unwrap();

        janitor.release_client_tasks(1).await;
        let remaining = tasks.get(&key).expect("task should survive ownership transfer");
        assert_eq!(remaining.owner, 2);
        assert!(!remaining.attached.contains(&1));
    }

    #[tokio::test]
    async fn reap_removes_finished_and_emptied_tasks() {
        let tasks = registry();
        let sessions = Arc::new(ClientSessionTracker::new());
        let dir = tempdir().unwrap();
        let janitor = Janitor::new(tasks.clone(), sessions, PathLayout::new(dir.path()), Duration::from_secs(20));

        let finished_key = TaskKey::new(VideoId::sanitize("a"), VariantLabel::new("720p"));
        let mut finished = Task::new(1, 0, 1, false);
        finished.finished = true;
        tasks.upsert_new(finished_key.clone(), finished).unwrap();

        let live_key = TaskKey::new(VideoId::sanitize("b"), VariantLabel::new("720p"));
        tasks.upsert_new(live_key.clone(), Task::new(2, 0, 1, false)).unwrap();

        janitor.reap_dead_tasks();
        assert!(!tasks.contains(&finished_key));
        assert!(tasks.contains(&live_key));
    }

    #[tokio::test]
    async fn sweep_stale_locks_removes_directories_with_no_lock_file() {
        let tasks = registry();
        let sessions = Arc::new(ClientSessionTracker::new());
        let dir = tempdir().unwrap();
        let variant_dir = dir.path().join("movie").join("720p");
        tokio::fs::create_dir_all(&variant_dir).await.unwrap();

        let janitor = Janitor::new(tasks, sessions, PathLayout::new(dir.path()), Duration::from_secs(20));
        let removed = janitor.sweep_stale_locks().await.unwrap();
        assert_eq!(removed, 1);
        assert!(!variant_dir.exists());
    }

    #[tokio::test]
    async fn sweep_stale_locks_keeps_directories_with_fresh_lock() {
        let tasks = registry();
        let sessions = Arc::new(ClientSessionTracker::new());
        let dir = tempdir().unwrap();
        let variant_dir = dir.path().join("movie").join("720p");
        tokio::fs::create_dir_all(&variant_dir).await.unwrap();
        let lock = SessionLock::new();
        lock.create(&variant_dir.join("session.lock")).await.unwrap();

        let janitor = Janitor::new(tasks, sessions, PathLayout::new(dir.path()), Duration::from_secs(20));
        let removed = janitor.sweep_stale_locks().await.unwrap();
        assert_eq!(removed, 0);
        assert!(variant_dir.exists());
    }
}
