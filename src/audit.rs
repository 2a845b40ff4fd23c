//! Append-only audit log sink with structural secret redaction.
//!
//! This is the one canonical redactor in the codebase: it walks an event's JSON payload
//! by key name rather than pattern-matching a rendered log line, so it catches a secret
//! field regardless of how its value happens to be formatted.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Kind of event recorded in the audit trail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// A server process was spawned.
    ServerSpawn,
    /// A server process exited.
    ServerExit,
    /// A server was restarted after exiting.
    ServerRestart,
    /// A restart was skipped because it would violate the backoff window.
    RestartThrottled,
    /// A server was stopped as part of normal shutdown.
    ServerStopped,
    /// A server had to be force-killed after the grace period elapsed.
    ForceKilled,
    /// A server was never started because its environment failed validation.
    Skipped,
    /// A health probe succeeded.
    ProbeOk,
    /// A health probe failed.
    ProbeFail,
    /// An outbound call was denied by the egress allowlist.
    EgressBlocked,
    /// A caller requested a scope the server does not grant.
    ScopeViolation,
    /// The circuit breaker opened for a server.
    BreakerOpen,
    /// The circuit breaker allowed a single probe call through.
    BreakerHalfOpen,
    /// The circuit breaker closed again.
    BreakerClosed,
    /// A call was denied by the rate limiter.
    RateLimited,
}

/// One audit record. `data` is redacted before being written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Server the event concerns, if any.
    pub server: Option<String>,
    /// What happened.
    pub event: AuditEventKind,
    /// Structured detail, redacted before being persisted.
    pub data: Value,
}

impl AuditEvent {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn new(event: AuditEventKind, server: Option<&str>, data: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            server: server.map(str::to_string),
            event,
            data,
        }
    }
}

fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    ["token", "key", "secret", "password"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Recursively replace the value of any object key matching `/token|key|secret|password/i`
/// with `"[redacted]"`.
fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if is_secret_key(key) {
                    *v = Value::String("[redacted]".to_string());
                } else {
                    redact(v);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact(item);
            }
        }
        _ => {}
    }
}

/// Append-only, write-serialized audit sink.
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<Mutex<File>>,
}

impl AuditLog {
    /// Open (creating if necessary) the audit log file at `path`, creating parent
    /// directories as needed.
    ///
    /// # Errors
    /// Returns an error if parent directories or the file itself cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create audit log directory")?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("failed to open audit log file")?;
        Ok(Self {
            sink: Arc::new(Mutex::new(file)),
        })
    }

    /// Record one event: redact its payload, write it as a JSON line, and mirror it to
    /// the structured logger.
    ///
    /// # Errors
    /// Returns an error if serialization or the underlying write fails.
    pub fn record(&self, mut event: AuditEvent) -> Result<()> {
        redact(&mut event.data);
        let json = serde_json::to_string(&event).context("failed to serialize audit event")?;

        {
            let mut file = self
                .sink
                .lock()
                .map_err(|e| anyhow::anyhow!("audit log mutex poisoned: {e}"))?;
            writeln!(file, "{json}").context("failed to write audit event")?;
            file.flush().context("failed to flush audit log")?;
        }

        tracing::info!(
            event = ?event.event,
            server = ?event.server,
            data = %event.data,
            "audit event"
        );

        Ok(())
    }
}
