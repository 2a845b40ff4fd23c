//! Error taxonomy for the orchestrator.
//!
//! One coherent failure domain, unlike the several domain-specific error enums a
//! task/agent/db system would carry — the orchestrator only ever fails at these seams.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use uuid::Uuid;

/// Top-level orchestrator error.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Configuration failed to load or validate. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A server's required environment was missing or malformed.
    #[error("environment validation failed for server {server}: {missing:?}")]
    EnvValidationFailed {
        /// Server name.
        server: String,
        /// Names of variables that failed validation.
        missing: Vec<String>,
    },

    /// The child process could not be spawned.
    #[error("failed to spawn server {server}: {cause}")]
    SpawnError {
        /// Server name.
        server: String,
        /// Underlying OS error text.
        cause: String,
    },

    /// An operation exceeded its deadline.
    #[error("operation {op} timed out after {ms}ms")]
    Timeout {
        /// Label of the timed-out operation.
        op: String,
        /// Configured deadline in milliseconds.
        ms: u64,
    },

    /// The rate limiter denied the call.
    #[error("server {server} is rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Server name.
        server: String,
        /// Suggested wait before retrying.
        retry_after_ms: u64,
    },

    /// The circuit breaker is open for this server.
    #[error("circuit open for server {server}")]
    CircuitOpen {
        /// Server name.
        server: String,
        /// Suggested wait before retrying, derived from `reset_timeout_ms`.
        retry_after_ms: u64,
    },

    /// A caller requested a scope the server does not declare.
    #[error("server {server} does not grant scope {attempted_scope}")]
    ScopeViolation {
        /// Server name.
        server: String,
        /// The scope that was requested.
        attempted_scope: String,
        /// Scopes the server actually grants.
        allowed: Vec<String>,
    },

    /// The target host is not on the outbound allowlist.
    #[error("egress denied for host {host}")]
    EgressDenied {
        /// Rejected hostname.
        host: String,
    },

    /// No server with the given name is registered.
    #[error("server not found: {0}")]
    ServerNotFound(String),

    /// Catch-all for unexpected failures, tagged with a correlation id for log lookup.
    #[error("internal error ({correlation_id}): {message}")]
    Internal {
        /// Opaque id that appears in the log line describing this failure.
        correlation_id: Uuid,
        /// Human-readable description, never containing secret material.
        message: String,
    },
}

impl OrchestratorError {
    /// Construct an `Internal` variant, generating a fresh correlation id.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            correlation_id: Uuid::new_v4(),
            message: message.into(),
        }
    }

    /// HTTP status code this error should surface as on the control surface.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) | Self::Internal { .. } => 500,
            Self::EnvValidationFailed { .. } | Self::SpawnError { .. } => 500,
            Self::Timeout { .. } => 504,
            Self::RateLimited { .. } => 429,
            Self::CircuitOpen { .. } => 503,
            Self::ScopeViolation { .. } => 403,
            Self::EgressDenied { .. } => 502,
            Self::ServerNotFound(_) => 404,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after_ms = match &self {
            Self::RateLimited { retry_after_ms, .. } | Self::CircuitOpen { retry_after_ms, .. } => {
                Some(*retry_after_ms)
            }
            _ => None,
        };

        let mut response = (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response();
        if let Some(ms) = retry_after_ms {
            let seconds = (ms + 999) / 1000;
            if let Ok(value) = HeaderValue::from_str(&seconds.max(1).to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}
