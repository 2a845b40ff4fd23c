//! Per-server guards: scope authorization, rate limiting, circuit breaking, and timeouts.
//!
//! When a dispatched call passes through all four, they are checked in this fixed order:
//! scope authorization, then rate limit, then circuit breaker, then timeout. A rejection
//! at any stage short-circuits the rest and reports the first-failing guard; this
//! ordering affects which error a caller sees first and must be preserved.

mod circuit_breaker;
mod rate_limiter;
mod scope;
mod timeout;

pub use circuit_breaker::{CircuitBreakerRegistry, CircuitState};
pub use rate_limiter::{RateLimitDecision, RateLimitStatus, RateLimiterRegistry};
pub use scope::ScopeAuthorizer;
pub use timeout::with_timeout;

use crate::audit::AuditLog;
use crate::config::ServerConfig;
use crate::error::OrchestratorError;
use std::future::Future;
use std::time::Duration;

/// Bundles the per-server guard state needed to dispatch a call through all four guards
/// in the mandated order.
#[derive(Clone)]
pub struct Guards {
    rate_limiters: RateLimiterRegistry,
    breakers: CircuitBreakerRegistry,
    audit: AuditLog,
}

impl Guards {
    /// Construct a fresh guard set with no per-server state yet recorded, audit-logging
    /// violations to `audit`.
    #[must_use]
    pub fn new(audit: AuditLog) -> Self {
        Self {
            rate_limiters: RateLimiterRegistry::new(),
            breakers: CircuitBreakerRegistry::new(),
            audit,
        }
    }

    /// Run `op` for `server` through scope auth, rate limit, circuit breaker, and timeout,
    /// in that order, recording the outcome against the breaker's rolling window.
    ///
    /// # Errors
    /// Returns the first guard's rejection, or the error `op` itself returned.
    pub async fn dispatch<F, Fut, T>(
        &self,
        server: &ServerConfig,
        required_scope: &str,
        op: F,
    ) -> Result<T, OrchestratorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
    {
        ScopeAuthorizer::check(server, required_scope, &self.audit)?;

        let decision = self.rate_limiters.check(&server.name, &server.limits);
        if let RateLimitDecision::Deny { retry_after_ms } = decision {
            return Err(OrchestratorError::RateLimited {
                server: server.name.clone(),
                retry_after_ms,
            });
        }

        if !self.breakers.allows(&server.name, &server.limits) {
            return Err(OrchestratorError::CircuitOpen {
                server: server.name.clone(),
                retry_after_ms: server.limits.reset_timeout_ms,
            });
        }

        let timeout = Duration::from_millis(server.limits.timeout_ms);
        let result = with_timeout(op(), timeout, &server.name).await;

        match &result {
            Ok(_) => self.breakers.record_success(&server.name, &server.limits),
            Err(_) => self.breakers.record_failure(&server.name, &server.limits),
        }

        result
    }

    /// Access the circuit breaker registry directly (used by the HTTP surface to report
    /// state).
    #[must_use]
    pub const fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Current rate limit window occupancy for `server`, for reporting as HTTP headers.
    #[must_use]
    pub fn rate_limit_status(&self, server: &ServerConfig) -> RateLimitStatus {
        self.rate_limiters.status(&server.name, &server.limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use std::collections::HashMap;

    fn server(name: &str) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            command: "echo".to_string(),
            args: vec![],
            env: HashMap::new(),
            enabled: true,
            scopes: vec!["tools:read".to_string()],
            limits: Limits::default(),
            probe: crate::config::ProbeOverride::default(),
            probe_interval_ms: 5000,
            probe_timeout_ms: 2000,
        }
    }

    async fn guards() -> Guards {
        let dir = tempfile::TempDir::new().unwrap();
        let audit = crate::audit::AuditLog::open(dir.path().join("audit.log")).await.unwrap();
        Guards::new(audit)
    }

    #[tokio::test]
    async fn dispatch_rejects_unscoped_call_first() {
        let guards = guards().await;
        let server = server("demo");
        let result = guards
            .dispatch(&server, "tools:write", || async { Ok::<_, OrchestratorError>(()) })
            .await;
        assert!(matches!(result, Err(OrchestratorError::ScopeViolation { .. })));
    }

    #[tokio::test]
    async fn dispatch_allows_scoped_call() {
        let guards = guards().await;
        let server = server("demo");
        let result = guards
            .dispatch(&server, "tools:read", || async { Ok::<_, OrchestratorError>(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn rate_limit_status_reflects_server_limits() {
        let guards = guards().await;
        let mut server = server("demo");
        server.limits.rate_per_window = 5;
        let status = guards.rate_limit_status(&server);
        assert_eq!(status.limit, 5);
        assert_eq!(status.remaining, 5);
    }
}
