use crate::audit::{AuditEvent, AuditEventKind, AuditLog};
use crate::config::ServerConfig;
use crate::error::OrchestratorError;
use serde_json::json;

/// Checks a caller-declared scope against a server's declared scope set.
pub struct ScopeAuthorizer;

impl ScopeAuthorizer {
    /// Returns `Ok(())` if `server` grants `required`, otherwise a `ScopeViolation`,
    /// audit-logging the violation with the server name, attempted scope, and allowed set.
    ///
    /// # Errors
    /// Returns `OrchestratorError::ScopeViolation` when the scope is not granted.
    pub fn check(server: &ServerConfig, required: &str, audit: &AuditLog) -> Result<(), OrchestratorError> {
        if server.scopes.iter().any(|s| s == required) {
            Ok(())
        } else {
            let allowed = server.scopes.clone();
            let _ = audit.record(AuditEvent::new(
                AuditEventKind::ScopeViolation,
                Some(&server.name),
                json!({ "attempted_scope": required, "allowed": allowed }),
            ));
            Err(OrchestratorError::ScopeViolation {
                server: server.name.clone(),
                attempted_scope: required.to_string(),
                allowed,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn server(scopes: Vec<&str>) -> ServerConfig {
        ServerConfig {
            name: "demo".to_string(),
            command: "echo".to_string(),
            args: vec![],
            env: HashMap::new(),
            enabled: true,
            scopes: scopes.into_iter().map(str::to_string).collect(),
            limits: crate::config::Limits::default(),
            probe: crate::config::ProbeOverride::default(),
            probe_interval_ms: 5000,
            probe_timeout_ms: 2000,
        }
    }

    async fn audit() -> AuditLog {
        let dir = tempfile::TempDir::new().unwrap();
        AuditLog::open(dir.path().join("audit.log")).await.unwrap()
    }

    #[tokio::test]
    async fn allows_granted_scope() {
        let server = server(vec!["tools:read"]);
        assert!(ScopeAuthorizer::check(&server, "tools:read", &audit().await).is_ok());
    }

    #[tokio::test]
    async fn rejects_ungranted_scope_and_carries_allowed_set() {
        let server = server(vec!["tools:read"]);
        let result = ScopeAuthorizer::check(&server, "tools:write", &audit().await);
        match result {
            Err(OrchestratorError::ScopeViolation { allowed, .. }) => {
                assert_eq!(allowed, vec!["tools:read".to_string()]);
            }
            other => panic!("expected ScopeViolation, got {other:?}"),
        }
    }
}
