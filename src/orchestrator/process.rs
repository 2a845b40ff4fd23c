//! Lifecycle state shared between a supervisor task and external readers (HTTP surface).

use serde::Serialize;
use std::time::Instant;

/// Lifecycle state of a managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// The process has been asked to spawn but has not yet been confirmed running.
    Starting,
    /// The process is running.
    Running,
    /// A graceful shutdown has been requested and is in progress.
    Stopping,
    /// The process exited and will not be restarted (shutdown, or exhausted retries after
    /// `Failed`... `Stopped` itself is the terminal state for a clean shutdown).
    Stopped,
    /// The process exceeded `MAX_RESTARTS` and will never be retried again.
    Failed,
    /// The process was never started because its environment failed validation.
    Skipped,
}

impl LifecycleState {
    /// Lowercase string form, used in HTTP responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// A point-in-time view of one server's process state, safe to clone and hand to readers
/// outside the supervisor task.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    /// Server name.
    pub name: String,
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// OS process id, while running.
    pub pid: Option<u32>,
    /// Seconds since the current process instance started, while running.
    pub uptime_seconds: Option<u64>,
    /// Number of restarts attempted for the current crash-loop window.
    pub restart_count: u32,
}

/// Mutable state a supervisor task owns; never shared directly, only published as
/// `ServerStatus` snapshots.
pub struct ProcessState {
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// OS process id, while running.
    pub pid: Option<u32>,
    /// When the current process instance started.
    pub start_time: Option<Instant>,
    /// Restarts attempted since the last stability-window reset.
    pub restart_count: u32,
    /// When the most recent restart was initiated.
    pub last_restart_at: Option<Instant>,
}

impl ProcessState {
    /// Fresh state for a server that has not yet been spawned.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: LifecycleState::Starting,
            pid: None,
            start_time: None,
            restart_count: 0,
            last_restart_at: None,
        }
    }

    /// Render as a `ServerStatus` snapshot.
    #[must_use]
    pub fn snapshot(&self, name: &str) -> ServerStatus {
        ServerStatus {
            name: name.to_string(),
            state: self.state,
            pid: self.pid,
            uptime_seconds: self.start_time.map(|t| t.elapsed().as_secs()),
            restart_count: self.restart_count,
        }
    }
}

impl Default for ProcessState {
    fn default() -> Self {
        Self::new()
    }
}
