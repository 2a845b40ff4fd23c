//! Per-server supervisor task: spawn, capture output, handle exit, restart with backoff.

use super::process::{LifecycleState, ProcessState, ServerStatus};
use crate::audit::{AuditEvent, AuditEventKind, AuditLog};
use crate::config::ServerConfig;
use crate::env_validator;
use crate::metrics::Metrics;
use serde_json::json;
use std::collections::HashMap;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Maximum restart attempts before a server is marked permanently `Failed`.
pub const MAX_RESTARTS: u32 = 5;

/// How long a respawned process must run continuously before its restart count resets.
const STABILITY_WINDOW: Duration = Duration::from_secs(60);

fn backoff_for(restart_count: u32) -> Duration {
    let millis = 1000u64.saturating_mul(1u64 << restart_count.min(20));
    Duration::from_millis(millis.min(30_000))
}

/// Monotonic source of distinct jitter seeds; combined with `RandomState`'s per-process
/// random key rather than reused alone, so the sequence isn't predictable from the start.
static JITTER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Jitter in `[0, 1000)` ms, so concurrently restarting servers don't retry in lockstep.
///
/// Hashes a monotonic counter and the wall clock through `RandomState`'s hasher, the same
/// per-process-randomized `SipHash` key `HashMap` uses to resist seed prediction. That gives
/// a real spread across concurrent calls without a `rand` dependency.
fn jitter() -> Duration {
    let counter = JITTER_COUNTER.fetch_add(1, Ordering::Relaxed);
    let now_nanos = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_nanos());

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(counter);
    hasher.write_u128(now_nanos);
    Duration::from_millis(hasher.finish() % 1000)
}

/// Shared map of published server statuses, read by the HTTP surface.
#[derive(Clone)]
pub struct StatusBoard {
    statuses: Arc<RwLock<HashMap<String, ServerStatus>>>,
}

impl StatusBoard {
    /// Construct an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self {
            statuses: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn publish(&self, name: &str, state: &ProcessState) {
        self.statuses
            .write()
            .expect("status board poisoned")
            .insert(name.to_string(), state.snapshot(name));
    }

    /// Snapshot for one server.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ServerStatus> {
        self.statuses.read().expect("status board poisoned").get(name).cloned()
    }

    /// Snapshot of every server.
    #[must_use]
    pub fn all(&self) -> Vec<ServerStatus> {
        self.statuses.read().expect("status board poisoned").values().cloned().collect()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

fn merged_env() -> HashMap<String, String> {
    std::env::vars().collect()
}

async fn forward_lines(stream: impl tokio::io::AsyncRead + Unpin, server: String, is_err: bool) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_err {
            tracing::warn!(server = %server, event = "stderr", message = %line);
        } else {
            tracing::info!(server = %server, event = "stdout", message = %line);
        }
    }
}

/// Spawn the per-server supervisor loop. Returns once `shutdown` fires and the process
/// (if any) has been terminated.
pub fn spawn_supervisor(
    server: Arc<ServerConfig>,
    audit: AuditLog,
    metrics: Metrics,
    board: StatusBoard,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let env = merged_env();
        let report = env_validator::validate(&server, &env);
        if !report.ok {
            let mut state = ProcessState::new();
            state.state = LifecycleState::Skipped;
            board.publish(&server.name, &state);
            let _ = audit.record(AuditEvent::new(
                AuditEventKind::Skipped,
                Some(&server.name),
                json!({ "reason": "env_validation_failed", "missing": report.missing }),
            ));
            return;
        }

        let mut state = ProcessState::new();

        'restart_loop: loop {
            state.state = LifecycleState::Starting;
            board.publish(&server.name, &state);

            let mut command = Command::new(&server.command);
            command
                .args(&server.args)
                .envs(&env)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(e) => {
                    let _ = audit.record(AuditEvent::new(
                        AuditEventKind::ServerExit,
                        Some(&server.name),
                        json!({ "spawn_error": e.to_string() }),
                    ));
                    if !schedule_restart(&server, &mut state, &audit, &metrics).await {
                        break 'restart_loop;
                    }
                    continue 'restart_loop;
                }
            };

            state.state = LifecycleState::Running;
            state.pid = child.id();
            state.start_time = Some(Instant::now());
            board.publish(&server.name, &state);
            if state.restart_count > 0 {
                metrics.restarts_total.with_label_values(&[server.name.as_str()]).inc();
            }

            let _ = audit.record(AuditEvent::new(
                AuditEventKind::ServerSpawn,
                Some(&server.name),
                json!({ "pid": state.pid, "restart_count": state.restart_count }),
            ));

            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(forward_lines(stdout, server.name.clone(), false));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(forward_lines(stderr, server.name.clone(), true));
            }

            let stability_sleep = tokio::time::sleep(STABILITY_WINDOW);
            tokio::pin!(stability_sleep);
            let mut stabilized = false;

            let exit_status = loop {
                tokio::select! {
                    status = child.wait() => break Some(status),
                    () = &mut stability_sleep, if !stabilized => {
                        stabilized = true;
                        state.restart_count = 0;
                    }
                    _ = shutdown.recv() => {
                        state.state = LifecycleState::Stopping;
                        board.publish(&server.name, &state);
                        terminate(&mut child).await;
                        state.state = LifecycleState::Stopped;
                        board.publish(&server.name, &state);
                        let _ = audit.record(AuditEvent::new(
                            AuditEventKind::ServerStopped,
                            Some(&server.name),
                            json!({}),
                        ));
                        break None;
                    }
                }
            };

            let Some(status_result) = exit_status else {
                break 'restart_loop;
            };

            let exit_info = match status_result {
                Ok(status) => json!({ "code": status.code() }),
                Err(e) => json!({ "error": e.to_string() }),
            };
            let _ = audit.record(AuditEvent::new(
                AuditEventKind::ServerExit,
                Some(&server.name),
                exit_info,
            ));

            if !schedule_restart(&server, &mut state, &audit, &metrics).await {
                break 'restart_loop;
            }
        }
    })
}

/// Decide and wait out the restart policy. Returns `false` if the server should stop being
/// restarted (either exhausted or this was actually a clean shutdown elsewhere).
async fn schedule_restart(
    server: &ServerConfig,
    state: &mut ProcessState,
    audit: &AuditLog,
    metrics: &Metrics,
) -> bool {
    if state.restart_count >= MAX_RESTARTS {
        state.state = LifecycleState::Failed;
        metrics.restarts_exhausted_total.with_label_values(&[server.name.as_str()]).inc();
        let _ = audit.record(AuditEvent::new(
            AuditEventKind::ServerExit,
            Some(&server.name),
            json!({ "terminal": true, "restart_count": state.restart_count }),
        ));
        return false;
    }

    let backoff = backoff_for(state.restart_count);
    let elapsed_since_last = state
        .last_restart_at
        .map_or(backoff, |t| t.elapsed());

    if elapsed_since_last < backoff {
        let _ = audit.record(AuditEvent::new(
            AuditEventKind::RestartThrottled,
            Some(&server.name),
            json!({ "backoff_ms": backoff.as_millis() }),
        ));
        tokio::time::sleep(backoff - elapsed_since_last).await;
    }
    tokio::time::sleep(jitter()).await;

    state.restart_count += 1;
    state.last_restart_at = Some(Instant::now());
    let _ = audit.record(AuditEvent::new(
        AuditEventKind::ServerRestart,
        Some(&server.name),
        json!({ "restart_count": state.restart_count }),
    ));
    true
}

/// Send `SIGTERM`, wait up to 10s, then `SIGKILL` if the process has not exited.
async fn terminate(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        let pid = nix::unistd::Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
    }

    if tokio::time::timeout(Duration::from_secs(10), child.wait()).await.is_err() {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_for(0), Duration::from_millis(1000));
        assert_eq!(backoff_for(1), Duration::from_millis(2000));
        assert_eq!(backoff_for(2), Duration::from_millis(4000));
        assert_eq!(backoff_for(5), Duration::from_millis(30_000));
        assert_eq!(backoff_for(20), Duration::from_millis(30_000));
    }

    #[test]
    fn backoff_is_monotonic_up_to_cap() {
        let mut last = Duration::ZERO;
        for n in 0..10 {
            let b = backoff_for(n);
            assert!(b >= last);
            last = b;
        }
    }

    #[test]
    fn jitter_is_bounded() {
        for _ in 0..20 {
            assert!(jitter() < Duration::from_millis(1000));
        }
    }

    #[test]
    fn jitter_is_not_clustered_near_zero() {
        let samples: Vec<Duration> = (0..200).map(|_| jitter()).collect();
        let distinct: std::collections::HashSet<_> = samples.iter().map(Duration::as_millis).collect();
        assert!(distinct.len() > 20, "expected a real spread of values, got {distinct:?}");
        assert!(
            samples.iter().any(|d| *d > Duration::from_millis(100)),
            "all samples clustered near zero: {samples:?}"
        );
    }

    proptest::proptest! {
        #[test]
        fn backoff_never_exceeds_cap(n in 0u32..1000) {
            assert!(backoff_for(n) <= Duration::from_millis(30_000));
        }

        #[test]
        fn backoff_is_monotonic_for_any_pair(a in 0u32..50, b in 0u32..50) {
            if a <= b {
                assert!(backoff_for(a) <= backoff_for(b));
            }
        }
    }

    #[tokio::test]
    async fn schedule_restart_stops_at_max_restarts() {
        let server = ServerConfig {
            name: "demo".to_string(),
            command: "true".to_string(),
            args: vec![],
            env: HashMap::new(),
            enabled: true,
            scopes: vec![],
            limits: crate::config::Limits::default(),
            probe: crate::config::ProbeOverride::default(),
            probe_interval_ms: 5000,
            probe_timeout_ms: 2000,
        };
        let dir = tempfile::TempDir::new().unwrap();
        let audit = AuditLog::open(dir.path().join("audit.log")).await.unwrap();
        let metrics = Metrics::new().unwrap();

        let mut state = ProcessState::new();
        state.restart_count = MAX_RESTARTS;
        assert!(!schedule_restart(&server, &mut state, &audit, &metrics).await);
        assert_eq!(state.state, LifecycleState::Failed);
    }

    #[tokio::test]
    async fn schedule_restart_increments_count_below_max() {
        let server = ServerConfig {
            name: "demo".to_string(),
            command: "true".to_string(),
            args: vec![],
            env: HashMap::new(),
            enabled: true,
            scopes: vec![],
            limits: crate::config::Limits::default(),
            probe: crate::config::ProbeOverride::default(),
            probe_interval_ms: 5000,
            probe_timeout_ms: 2000,
        };
        let dir = tempfile::TempDir::new().unwrap();
        let audit = AuditLog::open(dir.path().join("audit.log")).await.unwrap();
        let metrics = Metrics::new().unwrap();

        let mut state = ProcessState::new();
        assert!(schedule_restart(&server, &mut state, &audit, &metrics).await);
        assert_eq!(state.restart_count, 1);
    }
}
