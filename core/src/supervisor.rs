//! Subprocess supervisor (C4, spec §4.4).
//!
//! Launches an encoder process, relays its stderr to `tracing`, and reports
//! lifecycle events through a `watch` channel rather than letting callers poll
//! the child directly (spec §9's "callback/event-driven plumbing" note).

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch, OnceCell};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::hw_slots::HwSlotGuard;

/// Observable lifecycle state of a supervised encoder process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Process exited on its own. `Some(0)` is success; anything else (or `None`,
    /// meaning terminated by an unhandled signal) is a `SupervisorFailure`.
    Exited(Option<i32>),
    /// Process was killed by `SupervisorHandle::kill`.
    Killed,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessState::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProcessState::Exited(Some(0)))
    }
}

/// A running (or recently-finished) encoder process.
pub struct SupervisorHandle {
    process_id: Uuid,
    pid: Option<u32>,
    kill_tx: mpsc::Sender<()>,
    state_rx: watch::Receiver<ProcessState>,
}

impl SupervisorHandle {
    pub fn process_id(&self) -> Uuid {
        self.process_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state_rx.borrow().clone()
    }

    /// A clone of the watch channel so a caller can `changed().await` for the
    /// next lifecycle transition without owning the handle.
    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state_rx.clone()
    }

    /// Request termination (always SIGTERM-equivalent via `Child::start_kill`)
    /// and wait for the monitor task to observe the exit.
    pub async fn kill(&self) {
        let _ = self.kill_tx.send(()).await;
        let mut rx = self.state_rx.clone();
        while !rx.borrow().is_terminal() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Launches and monitors encoder subprocesses.
#[derive(Debug, Default)]
pub struct Supervisor;

static TIME_PATTERN: OnceCell<Regex> = OnceCell::const_new();

async fn time_pattern() -> &'static Regex {
    TIME_PATTERN
        .get_or_init(|| async { Regex::new(r"time=(\d{2}:\d{2}:\d{2}\.\d{2,3})").unwrap() })
        .await
}

impl Supervisor {
    pub fn new() -> Self {
        Supervisor
    }

    /// Start `argv[0]` with `argv[1..]` as arguments, running in `cwd`. If
    /// `done_marker` is set, it is written (empty file) when the process exits
    /// with code 0. `hw_slot`, if held, is dropped when the monitor task ends —
    /// on both the normal-exit and forced-kill paths (spec §4.5).
    pub fn spawn(
        &self,
        argv: &[String],
        cwd: &std::path::Path,
        done_marker: Option<PathBuf>,
        hw_slot: Option<HwSlotGuard>,
    ) -> Result<SupervisorHandle> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| CoreError::Config("empty encoder argument vector".into()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            CoreError::Transient(format!("failed to spawn encoder {}: {}", program, e))
        })?;

        let process_id = Uuid::new_v4();
        let pid = child.id();
        let stderr = child.stderr.take();

        let (state_tx, state_rx) = watch::channel(ProcessState::Running);
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            if let Some(stderr) = stderr {
                tokio::spawn(relay_stderr(process_id, stderr));
            }

            let final_state = tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => ProcessState::Exited(status.code()),
                        Err(_) => ProcessState::Exited(None),
                    }
                }
                _ = kill_rx.recv() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    ProcessState::Killed
                }
            };

            if final_state.is_success() {
                if let Some(marker) = &done_marker {
                    let _ = tokio::fs::write(marker, b"").await;
                }
            } else if !matches!(final_state, ProcessState::Killed) {
                tracing::warn!(%process_id, ?final_state, "encoder process exited non-zero");
            }

            drop(hw_slot);
            let _ = state_tx.send(final_state);
        });

        Ok(SupervisorHandle {
            process_id,
            pid,
            kill_tx,
            state_rx,
        })
    }

    pub async fn kill(&self, handle: &SupervisorHandle) {
        handle.kill().await;
    }

    pub async fn kill_all(&self, handles: &[Arc<SupervisorHandle>]) {
        for handle in handles {
            handle.kill().await;
        }
    }
}

/// Relay stderr line-by-line to `tracing`, extracting `time=HH:MM:SS.mmm`
/// progress markers at `trace` level. Never interprets stderr beyond this.
async fn relay_stderr(process_id: Uuid, stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    let pattern = time_pattern().await;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(caps) = pattern.captures(&line) {
                    tracing::trace!(%process_id, progress = %caps[1], "encoder progress");
                }
                tracing::debug!(%process_id, "{}", line);
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn spawn_true_reaches_success_state() {
        let dir = tempdir().unwrap();
        let supervisor = Supervisor::new();
        let handle = supervisor
            .spawn(&["true".to_string()], dir.path(), None, None)
            .unwrap();
        let mut rx = handle.subscribe();
        while !rx.borrow().is_terminal() {
            rx.changed().await.unwrap();
        }
        assert!(rx.borrow().is_success());
    }

    #[tokio::test]
    async fn spawn_false_is_not_success() {
        let dir = tempdir().unwrap();
        let supervisor = Supervisor::new();
        let handle = supervisor
            .spawn(&["false".to_string()], dir.path(), None, None)
            .unwrap();
        let mut rx = handle.subscribe();
        while !rx.borrow().is_terminal() {
            rx.changed().await.unwrap();
        }
        assert!(!rx.borrow().is_success());
    }

    #[tokio::test]
    async fn done_marker_written_on_success() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("done");
        let supervisor = Supervisor::new();
        let handle = supervisor
            .spawn(&["true".to_string()], dir.path(), Some(marker.clone()), None)
            .unwrap();
        let mut rx = handle.subscribe();
        while !rx.borrow().is_terminal() {
            rx.changed().await.unwrap();
        }
        assert!(marker.is_file());
    }

    #[tokio::test]
    async fn kill_terminates_long_running_process() {
        let dir = tempdir().unwrap();
        let supervisor = Supervisor::new();
        let handle = supervisor
            .spawn(
                &["sleep".to_string(), "30".to_string()],
                dir.path(),
                None,
                None,
            )
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.kill())
            .await
            .expect("kill should complete promptly");
        assert_eq!(handle.state(), ProcessState::Killed);
    }

    #[test]
    fn empty_argv_is_rejected() {
        let supervisor = Supervisor::new();
        let result = supervisor.spawn(&[], std::path::Path::new("."), None, None);
        assert!(result.is_err());
    }
}
