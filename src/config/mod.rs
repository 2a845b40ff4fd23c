//! Layered configuration for the orchestrator: server fleet, network allowlist, and
//! observability toggles.

mod loader;

pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Validation schema a declared environment variable's value must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvSchema {
    /// Non-empty after trimming whitespace.
    NonEmpty,
    /// Parses as a URL with a scheme and host.
    Url,
    /// Parses as an integer in `1..=65535`.
    Port,
    /// Parses as an `f64`.
    Numeric,
}

/// Declaration of one environment variable a server expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVarSpec {
    /// Whether the orchestrator must refuse to start this server without it.
    #[serde(default = "default_true")]
    pub required: bool,
    /// Optional shape check applied to the resolved value.
    pub schema: Option<EnvSchema>,
}

const fn default_true() -> bool {
    true
}

impl Default for EnvVarSpec {
    fn default() -> Self {
        Self {
            required: true,
            schema: None,
        }
    }
}

/// Per-server guard limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Deadline for any single dispatched call, in milliseconds.
    pub timeout_ms: u64,
    /// Maximum requests allowed per rolling window.
    pub rate_per_window: u32,
    /// Width of the rate limiter's sliding window, in milliseconds.
    pub rate_window_ms: u64,
    /// Error percentage (0-100) that trips the circuit breaker.
    pub error_threshold_pct: f64,
    /// How long the breaker stays open before allowing one probe call.
    pub reset_timeout_ms: u64,
    /// Width of the breaker's rolling error-rate window, in milliseconds.
    pub rolling_window_ms: u64,
    /// Number of buckets the rolling window is divided into.
    pub rolling_buckets: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            rate_per_window: 60,
            rate_window_ms: 60_000,
            error_threshold_pct: 50.0,
            reset_timeout_ms: 30_000,
            rolling_window_ms: 10_000,
            rolling_buckets: 10,
        }
    }
}

/// Override of how a server's health probe is invoked.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProbeOverride {
    /// Command to run instead of the server's own command.
    pub command: Option<String>,
    /// Arguments for the override command.
    pub args: Option<Vec<String>>,
    /// When set, the probe is an HTTP GET against this URL instead of a subprocess
    /// invocation. The URL's host must be on `network.outbound_allowlist`.
    pub url: Option<String>,
}

/// Configuration for a single managed server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique name identifying this server.
    pub name: String,
    /// Executable to launch.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Required/optional environment variables and their validation schema.
    #[serde(default)]
    pub env: HashMap<String, EnvVarSpec>,
    /// Whether the orchestrator manages this server at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Capability scopes this server is allowed to offer.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Guard limits for this server.
    #[serde(default)]
    pub limits: Limits,
    /// Health probe override.
    #[serde(default)]
    pub probe: ProbeOverride,
    /// Milliseconds between health probes.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Milliseconds before a single probe attempt is considered failed.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

const fn default_probe_interval_ms() -> u64 {
    5_000
}

const fn default_probe_timeout_ms() -> u64 {
    2_000
}

/// Outbound network policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkConfig {
    /// Hostnames (or parent domains) the orchestrator is allowed to reach.
    #[serde(default)]
    pub outbound_allowlist: Vec<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Newline-delimited JSON.
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

/// Observability toggles. `otel_enabled`/`sentry_dsn` are configuration-only switches;
/// no live exporter is wired in this deployment, but a production build would read these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    pub log_level: String,
    /// Structured log output format.
    pub log_format: LogFormat,
    /// When set, logs are also written to a rolling file in this directory.
    pub log_dir: Option<String>,
    /// Whether an OpenTelemetry exporter should be initialized.
    pub otel_enabled: bool,
    /// OTLP endpoint, consulted only when `otel_enabled` is true.
    pub otel_endpoint: Option<String>,
    /// Sentry DSN for error reporting, if enabled.
    pub sentry_dsn: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            log_dir: None,
            otel_enabled: false,
            otel_endpoint: None,
            sentry_dsn: None,
        }
    }
}

/// HTTP control surface bind address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Full orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Observability toggles.
    pub observability: ObservabilityConfig,
    /// Outbound network allowlist.
    pub network: NetworkConfig,
    /// HTTP control surface bind address.
    pub http: HttpConfig,
    /// Managed servers, keyed by name.
    pub servers: HashMap<String, ServerConfig>,
}

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The layered provider chain failed to parse into `Config`.
    #[error("failed to parse configuration: {0}")]
    ParseFailed(String),

    /// Two servers share the same name.
    #[error("duplicate server name: {0}")]
    DuplicateServerName(String),

    /// A server config is missing its name.
    #[error("server config key {0:?} has empty name field")]
    EmptyServerName(String),

    /// A server declares no command to launch.
    #[error("server {0} has an empty command")]
    EmptyCommand(String),

    /// A limit value is out of range.
    #[error("server {server} has invalid {field}: {value}")]
    InvalidLimit {
        /// Offending server.
        server: String,
        /// Offending field name.
        field: &'static str,
        /// Offending value, rendered for the error message.
        value: String,
    },

    /// An allowlist entry is empty or malformed.
    #[error("invalid outbound allowlist entry: {0:?}")]
    InvalidAllowlistEntry(String),

    /// The HTTP bind port is zero.
    #[error("http.port must be nonzero")]
    InvalidHttpPort,
}

impl Config {
    /// Validate structural invariants that serde alone cannot express.
    ///
    /// # Errors
    /// Returns the first `ConfigError` encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.port == 0 {
            return Err(ConfigError::InvalidHttpPort);
        }

        for entry in &self.network.outbound_allowlist {
            if entry.trim().is_empty() {
                return Err(ConfigError::InvalidAllowlistEntry(entry.clone()));
            }
        }

        for (key, server) in &self.servers {
            if server.name.trim().is_empty() {
                return Err(ConfigError::EmptyServerName(key.clone()));
            }
            if server.name != *key {
                return Err(ConfigError::DuplicateServerName(format!(
                    "config key {key:?} does not match server name {:?}",
                    server.name
                )));
            }
            if server.command.trim().is_empty() {
                return Err(ConfigError::EmptyCommand(server.name.clone()));
            }
            if server.limits.rate_per_window == 0 {
                return Err(ConfigError::InvalidLimit {
                    server: server.name.clone(),
                    field: "rate_per_window",
                    value: server.limits.rate_per_window.to_string(),
                });
            }
            if server.limits.rolling_buckets == 0 {
                return Err(ConfigError::InvalidLimit {
                    server: server.name.clone(),
                    field: "rolling_buckets",
                    value: server.limits.rolling_buckets.to_string(),
                });
            }
            if !(0.0..=100.0).contains(&server.limits.error_threshold_pct) {
                return Err(ConfigError::InvalidLimit {
                    server: server.name.clone(),
                    field: "error_threshold_pct",
                    value: server.limits.error_threshold_pct.to_string(),
                });
            }
            if server.limits.timeout_ms == 0 {
                return Err(ConfigError::InvalidLimit {
                    server: server.name.clone(),
                    field: "timeout_ms",
                    value: "0".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(name: &str) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            command: "echo".to_string(),
            args: vec![],
            env: HashMap::new(),
            enabled: true,
            scopes: vec![],
            limits: Limits::default(),
            probe: ProbeOverride::default(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_mismatched_server_key() {
        let mut config = Config::default();
        config.servers.insert("other".to_string(), server("one"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateServerName(_))
        ));
    }

    #[test]
    fn rejects_empty_command() {
        let mut config = Config::default();
        let mut s = server("one");
        s.command = String::new();
        config.servers.insert("one".to_string(), s);
        assert!(matches!(config.validate(), Err(ConfigError::EmptyCommand(_))));
    }

    #[test]
    fn rejects_zero_port_http() {
        let mut config = Config::default();
        config.http.port = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidHttpPort)));
    }

    #[test]
    fn rejects_out_of_range_error_threshold() {
        let mut config = Config::default();
        let mut s = server("one");
        s.limits.error_threshold_pct = 150.0;
        config.servers.insert("one".to_string(), s);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLimit { field: "error_threshold_pct", .. })
        ));
    }
}
