//! Periodic stdio health probing, deliberately decoupled from restart decisions.
//!
//! A probe failure only updates this server's `HealthSnapshot` and emits a `probe_fail`
//! audit event; it never triggers a restart. Coupling probe flakiness to restarts causes
//! restart storms driven by transient probe failures that say nothing about whether the
//! supervised process itself is still alive.

use crate::audit::{AuditEvent, AuditEventKind, AuditLog};
use crate::config::ServerConfig;
use crate::error::OrchestratorError;
use crate::metrics::Metrics;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Outcome and timing of the most recent probe for one server.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    /// When the most recent probe completed.
    pub last_probe_at: Instant,
    /// Whether it succeeded.
    pub last_probe_ok: bool,
    /// How long the probe took.
    pub last_probe_latency_ms: u64,
    /// Consecutive failures up to and including the most recent probe.
    pub consecutive_failures: u32,
}

/// Overall readiness derived from every enabled server's most recent probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessStatus {
    /// Every enabled server's latest probe succeeded.
    Ok,
    /// At least one server is failing but at least one is healthy.
    Degraded,
    /// Every enabled server is failing.
    Down,
}

/// Shared store of per-server health snapshots, read by the HTTP surface and written only
/// by each server's own health-probe task.
#[derive(Clone)]
pub struct HealthStore {
    snapshots: Arc<RwLock<HashMap<String, HealthSnapshot>>>,
}

impl HealthStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn set(&self, server: &str, snapshot: HealthSnapshot) {
        self.snapshots
            .write()
            .expect("health store poisoned")
            .insert(server.to_string(), snapshot);
    }

    /// Snapshot for one server, if any probe has run yet.
    #[must_use]
    pub fn get(&self, server: &str) -> Option<HealthSnapshot> {
        self.snapshots.read().expect("health store poisoned").get(server).cloned()
    }

    /// Readiness across the given enabled server names.
    #[must_use]
    pub fn readiness(&self, enabled_servers: &[String]) -> ReadinessStatus {
        if enabled_servers.is_empty() {
            return ReadinessStatus::Ok;
        }
        let snapshots = self.snapshots.read().expect("health store poisoned");
        let mut healthy = 0usize;
        let mut unhealthy = 0usize;
        for name in enabled_servers {
            match snapshots.get(name) {
                Some(s) if s.last_probe_ok => healthy += 1,
                _ => unhealthy += 1,
            }
        }
        if unhealthy == 0 {
            ReadinessStatus::Ok
        } else if healthy == 0 {
            ReadinessStatus::Down
        } else {
            ReadinessStatus::Degraded
        }
    }
}

impl Default for HealthStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one server's periodic health probe loop.
pub struct HealthChecker {
    store: HealthStore,
    audit: AuditLog,
    metrics: Metrics,
    http_client: reqwest::Client,
    outbound_allowlist: Arc<Vec<String>>,
}

impl HealthChecker {
    /// Construct a checker sharing the given health store, audit sink, metrics, and the
    /// outbound hostnames an HTTP-based probe (`ServerConfig.probe.url`) may reach.
    #[must_use]
    pub fn new(store: HealthStore, audit: AuditLog, metrics: Metrics, outbound_allowlist: Vec<String>) -> Self {
        Self {
            store,
            audit,
            metrics,
            http_client: reqwest::Client::new(),
            outbound_allowlist: Arc::new(outbound_allowlist),
        }
    }

    /// Start the probe loop for `server`, running until `shutdown` fires.
    pub fn start(&self, server: Arc<ServerConfig>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let store = self.store.clone();
        let audit = self.audit.clone();
        let metrics = self.metrics.clone();
        let http_client = self.http_client.clone();
        let allowlist = self.outbound_allowlist.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(server.probe_interval_ms));
            interval.tick().await;

            let mut consecutive_failures = 0u32;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let started = Instant::now();
                        let outcome = run_probe(&server, &http_client, &allowlist).await;
                        let latency = started.elapsed();

                        let ok = match &outcome {
                            Ok(ok) => *ok,
                            Err(OrchestratorError::EgressDenied { host }) => {
                                metrics.egress_denied_total.with_label_values(&[host.as_str()]).inc();
                                let _ = audit.record(AuditEvent::new(
                                    AuditEventKind::EgressBlocked,
                                    Some(&server.name),
                                    json!({ "host": host }),
                                ));
                                false
                            }
                            Err(_) => false,
                        };

                        metrics
                            .probe_duration_seconds
                            .with_label_values(&[server.name.as_str()])
                            .observe(latency.as_secs_f64());
                        metrics
                            .probe_outcomes_total
                            .with_label_values(&[server.name.as_str(), if ok { "ok" } else { "fail" }])
                            .inc();

                        consecutive_failures = if ok { 0 } else { consecutive_failures + 1 };

                        store.set(
                            &server.name,
                            HealthSnapshot {
                                last_probe_at: started,
                                last_probe_ok: ok,
                                last_probe_latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                                consecutive_failures,
                            },
                        );

                        let kind = if ok { AuditEventKind::ProbeOk } else { AuditEventKind::ProbeFail };
                        let _ = audit.record(AuditEvent::new(
                            kind,
                            Some(&server.name),
                            json!({ "consecutive_failures": consecutive_failures, "latency_ms": latency.as_millis() }),
                        ));
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

/// Runs one probe attempt: an HTTP GET against `server.probe.url` when set (checked
/// against the outbound allowlist first), otherwise a subprocess invocation.
async fn run_probe(
    server: &ServerConfig,
    http_client: &reqwest::Client,
    allowlist: &[String],
) -> Result<bool, OrchestratorError> {
    if let Some(url) = &server.probe.url {
        if !crate::egress::validate_probe_url(url, allowlist) {
            let host = crate::egress::extract_host(url).unwrap_or_else(|| url.clone());
            return Err(OrchestratorError::EgressDenied { host });
        }

        let timeout = Duration::from_millis(server.probe_timeout_ms);
        return Ok(http_client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .is_ok_and(|response| response.status().is_success()));
    }

    let (command, args) = server.probe.command.as_ref().map_or_else(
        || {
            let mut args = server.args.clone();
            args.push("--health".to_string());
            (server.command.clone(), args)
        },
        |cmd| (cmd.clone(), server.probe.args.clone().unwrap_or_default()),
    );

    let child = Command::new(&command)
        .args(&args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();

    let Ok(mut child) = child else {
        return Ok(false);
    };

    let timeout = Duration::from_millis(server.probe_timeout_ms);
    Ok(match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status.success(),
        _ => {
            let _ = child.start_kill();
            false
        }
    })
}
