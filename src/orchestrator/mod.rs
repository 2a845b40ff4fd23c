//! Orchestrator core: owns one supervisor task per enabled server plus the shared
//! guard, health, audit, and metrics state they report into.

mod process;
mod supervisor;

pub use process::{LifecycleState, ServerStatus};
pub use supervisor::{StatusBoard, MAX_RESTARTS};

use crate::audit::AuditLog;
use crate::guards::Guards;
use crate::health::{HealthChecker, HealthStore, ReadinessStatus};
use crate::metrics::Metrics;
use crate::registry::ServerRegistry;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Names of enabled servers the supervisor has not marked `Skipped`, the set
/// `overall_health()` is computed over.
fn ready_enabled_names(registry: &ServerRegistry, board: &StatusBoard) -> Vec<String> {
    registry
        .enabled_servers()
        .filter(|s| !board.get(&s.name).is_some_and(|status| status.state == LifecycleState::Skipped))
        .map(|s| s.name.clone())
        .collect()
}

/// Everything needed to run and observe the managed server fleet.
pub struct Orchestrator {
    registry: ServerRegistry,
    audit: AuditLog,
    metrics: Metrics,
    guards: Guards,
    health_store: HealthStore,
    board: StatusBoard,
    outbound_allowlist: Vec<String>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Build an orchestrator for the given registry, wiring fresh guard, health, and
    /// status state. `outbound_allowlist` gates any HTTP-based health probe.
    #[must_use]
    pub fn new(registry: ServerRegistry, audit: AuditLog, metrics: Metrics, outbound_allowlist: Vec<String>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            registry,
            guards: Guards::new(audit.clone()),
            audit,
            metrics,
            health_store: HealthStore::new(),
            board: StatusBoard::new(),
            outbound_allowlist,
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Access the guard set (used by anything dispatching calls through scope/rate/breaker/
    /// timeout).
    #[must_use]
    pub const fn guards(&self) -> &Guards {
        &self.guards
    }

    /// Access the published status board.
    #[must_use]
    pub const fn status_board(&self) -> &StatusBoard {
        &self.board
    }

    /// Access the health store.
    #[must_use]
    pub const fn health_store(&self) -> &HealthStore {
        &self.health_store
    }

    /// Access the metrics registry.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Overall readiness across every enabled, non-skipped server.
    #[must_use]
    pub fn readiness(&self) -> ReadinessStatus {
        let enabled = ready_enabled_names(&self.registry, &self.board);
        self.health_store.readiness(&enabled)
    }

    /// A cheaply-cloneable handle exposing the read-only state the HTTP surface needs.
    #[must_use]
    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            registry: self.registry.clone(),
            health_store: self.health_store.clone(),
            board: self.board.clone(),
            metrics: self.metrics.clone(),
            guards: self.guards.clone(),
        }
    }

    /// Spawn one supervisor task and one health-probe task per enabled server.
    pub fn start(&mut self) {
        let health_checker = HealthChecker::new(
            self.health_store.clone(),
            self.audit.clone(),
            self.metrics.clone(),
            self.outbound_allowlist.clone(),
        );

        for server in self.registry.enabled_servers() {
            let supervisor_handle = supervisor::spawn_supervisor(
                server.clone(),
                self.audit.clone(),
                self.metrics.clone(),
                self.board.clone(),
                self.shutdown_tx.subscribe(),
            );
            self.handles.push(supervisor_handle);

            let health_handle = health_checker.start(server.clone(), self.shutdown_tx.subscribe());
            self.handles.push(health_handle);
        }

        tracing::info!(servers = self.registry.len(), "orchestrator started");
    }

    /// Broadcast shutdown to every supervisor and health task, then await them. Idempotent:
    /// a second call observes no live receivers and returns immediately.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(());
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        tracing::info!("orchestrator stopped");
    }
}

/// Read-only, `Clone`-cheap view of orchestrator state, handed to the HTTP surface as
/// `axum` shared state.
#[derive(Clone)]
pub struct OrchestratorHandle {
    /// Server registry.
    pub registry: ServerRegistry,
    /// Health store.
    pub health_store: HealthStore,
    /// Status board.
    pub board: StatusBoard,
    /// Metrics registry.
    pub metrics: Metrics,
    /// Guard set (used to report circuit breaker state).
    pub guards: Guards,
}

impl OrchestratorHandle {
    /// Overall readiness across every enabled, non-skipped server.
    #[must_use]
    pub fn readiness(&self) -> ReadinessStatus {
        let enabled = ready_enabled_names(&self.registry, &self.board);
        self.health_store.readiness(&enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn test_orchestrator() -> Orchestrator {
        let dir = tempfile::TempDir::new().unwrap();
        let audit = AuditLog::open(dir.path().join("audit.log")).await.unwrap();
        let metrics = Metrics::new().unwrap();
        let registry = ServerRegistry::from_config(&Config::default());
        Orchestrator::new(registry, audit, metrics, Vec::new())
    }

    #[tokio::test]
    async fn empty_registry_is_ready_immediately() {
        let orch = test_orchestrator().await;
        assert_eq!(orch.readiness(), ReadinessStatus::Ok);
    }

    #[tokio::test]
    async fn start_then_stop_is_idempotent_on_second_stop() {
        let mut orch = test_orchestrator().await;
        orch.start();
        orch.stop().await;
        orch.stop().await;
    }
}
