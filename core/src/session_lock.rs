//! Per-`(VideoId, VariantLabel)` lock file whose mtime records last viewer
//! activity; consulted by the janitor (C3, spec §4.3).

use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::error::{CoreError, Result};

/// Age beyond which the janitor removes a variant directory outright (spec §4.3/§4.11).
pub const LOCK_STALE_AFTER: Duration = Duration::from_secs(55 * 60);

#[derive(Debug, Default)]
pub struct SessionLock;

impl SessionLock {
    pub fn new() -> Self {
        SessionLock
    }

    /// Atomically create (or refresh) the lock file at `path`, stamping it with the
    /// current time. Uses a temp-file-then-rename so concurrent creators never
    /// observe a partially-written lock.
    pub async fn create(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("lock.tmp");
        let stamp = now_secs().to_string();
        tokio::fs::write(&tmp, stamp).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Update the lock file's mtime to "now" without touching its contents, creating
    /// it if it doesn't exist yet.
    pub async fn touch(&self, path: &Path) -> Result<()> {
        self.create(path).await
    }

    pub async fn is_active(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    /// `true` if the lock file's mtime is older than `LOCK_STALE_AFTER`.
    pub fn is_stale(&self, path: &Path) -> Result<bool> {
        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(CoreError::from(e)),
        };
        let modified = meta.modified()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        Ok(age > LOCK_STALE_AFTER)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn create_then_is_active() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("v").join("session.lock");
        let lock = SessionLock::new();
        assert!(!lock.is_active(&path).await);
        lock.create(&path).await.unwrap();
        assert!(lock.is_active(&path).await);
    }

    #[tokio::test]
    async fn missing_lock_is_stale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.lock");
        let lock = SessionLock::new();
        assert!(lock.is_stale(&path).unwrap());
    }

    #[tokio::test]
    async fn fresh_lock_is_not_stale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.lock");
        let lock = SessionLock::new();
        lock.create(&path).await.unwrap();
        assert!(!lock.is_stale(&path).unwrap());
    }

    #[tokio::test]
    async fn old_mtime_is_stale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.lock");
        let lock = SessionLock::new();
        lock.create(&path).await.unwrap();
        let old = SystemTime::now() - Duration::from_secs(60 * 60);
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(old).unwrap();
        assert!(lock.is_stale(&path).unwrap());
    }
}
