//! End-to-end tests against real subprocesses (`true`/`false`/`sleep`), exercising the
//! supervisor, health checker, and shutdown path together.

use orchestrator::audit::AuditLog;
use orchestrator::config::{Config, EnvSchema, EnvVarSpec, Limits, ProbeOverride, ServerConfig};
use orchestrator::metrics::Metrics;
use orchestrator::orchestrator::{LifecycleState, Orchestrator};
use orchestrator::registry::ServerRegistry;
use std::collections::HashMap;
use std::time::Duration;

fn server(name: &str, command: &str, args: Vec<&str>) -> ServerConfig {
    ServerConfig {
        name: name.to_string(),
        command: command.to_string(),
        args: args.into_iter().map(str::to_string).collect(),
        env: HashMap::new(),
        enabled: true,
        scopes: vec![],
        limits: Limits::default(),
        probe: ProbeOverride::default(),
        probe_interval_ms: 5000,
        probe_timeout_ms: 2000,
    }
}

async fn build_orchestrator(config: &Config) -> Orchestrator {
    let dir = tempfile::TempDir::new().unwrap();
    let audit = AuditLog::open(dir.path().join("audit.log")).await.unwrap();
    let metrics = Metrics::new().unwrap();
    let registry = ServerRegistry::from_config(config);
    Orchestrator::new(registry, audit, metrics, config.network.outbound_allowlist.clone())
}

#[tokio::test]
async fn server_missing_required_env_is_skipped_not_started() {
    let mut env = HashMap::new();
    env.insert(
        "REQUIRED_TOKEN".to_string(),
        EnvVarSpec {
            required: true,
            schema: Some(EnvSchema::NonEmpty),
        },
    );
    let mut s = server("gated", "sleep", vec!["5"]);
    s.env = env;

    let mut config = Config::default();
    config.servers.insert("gated".to_string(), s);

    let mut orch = build_orchestrator(&config).await;
    orch.start();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = orch.status_board().get("gated").expect("status should be published");
    assert_eq!(status.state, LifecycleState::Skipped);
    assert!(status.pid.is_none());

    orch.stop().await;
}

#[tokio::test]
async fn crashing_server_restarts_at_least_once() {
    let mut config = Config::default();
    config.servers.insert("crasher".to_string(), server("crasher", "false", vec![]));

    let mut orch = build_orchestrator(&config).await;
    orch.start();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let status = orch.status_board().get("crasher").expect("status should be published");
    assert!(status.restart_count >= 1, "expected at least one restart, got {}", status.restart_count);
    assert_ne!(status.state, LifecycleState::Skipped);

    orch.stop().await;
}

#[tokio::test]
async fn long_running_server_reaches_running_state() {
    let mut config = Config::default();
    config.servers.insert("daemon".to_string(), server("daemon", "sleep", vec!["5"]));

    let mut orch = build_orchestrator(&config).await;
    orch.start();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = orch.status_board().get("daemon").expect("status should be published");
    assert_eq!(status.state, LifecycleState::Running);
    assert!(status.pid.is_some());

    orch.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent_and_terminates_running_children() {
    let mut config = Config::default();
    config.servers.insert("daemon".to_string(), server("daemon", "sleep", vec!["30"]));

    let mut orch = build_orchestrator(&config).await;
    orch.start();
    tokio::time::sleep(Duration::from_millis(200)).await;

    orch.stop().await;
    orch.stop().await; // second call must not hang or panic

    let status = orch.status_board().get("daemon").expect("status should be published");
    assert_eq!(status.state, LifecycleState::Stopped);
}

#[tokio::test]
async fn readiness_excludes_skipped_servers() {
    let mut env = HashMap::new();
    env.insert(
        "REQUIRED_TOKEN".to_string(),
        EnvVarSpec {
            required: true,
            schema: Some(EnvSchema::NonEmpty),
        },
    );
    let mut gated = server("gated", "sleep", vec!["5"]);
    gated.env = env;

    let mut healthy = server("prober", "true", vec![]);
    healthy.probe_interval_ms = 100;
    healthy.probe_timeout_ms = 500;

    let mut config = Config::default();
    config.servers.insert("gated".to_string(), gated);
    config.servers.insert("prober".to_string(), healthy);

    let mut orch = build_orchestrator(&config).await;
    orch.start();

    tokio::time::sleep(Duration::from_millis(350)).await;

    let gated_status = orch.status_board().get("gated").expect("status should be published");
    assert_eq!(gated_status.state, LifecycleState::Skipped);

    // "gated" never reports a health probe at all, so a readiness computation that forgot
    // to exclude skipped servers would see it as unhealthy and report Degraded or Down.
    assert_eq!(orch.readiness(), orchestrator::health::ReadinessStatus::Ok);
    assert_eq!(orch.handle().readiness(), orchestrator::health::ReadinessStatus::Ok);

    orch.stop().await;
}

#[tokio::test]
async fn health_probe_reports_readiness_independent_of_restart_state() {
    let mut config = Config::default();
    let mut s = server("prober", "true", vec![]);
    s.probe_interval_ms = 100;
    s.probe_timeout_ms = 500;
    config.servers.insert("prober".to_string(), s);

    let mut orch = build_orchestrator(&config).await;
    orch.start();

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(orch.readiness(), orchestrator::health::ReadinessStatus::Ok);

    orch.stop().await;
}
