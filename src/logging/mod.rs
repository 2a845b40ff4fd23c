//! Structured logging setup.

mod logger;

pub use logger::LoggerImpl;

use crate::config::{LogFormat, ObservabilityConfig};
use serde::{Deserialize, Serialize};

/// How rolling log files are rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    /// New file every day.
    Daily,
    /// New file every hour.
    Hourly,
    /// Never rotate.
    Never,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::Daily
    }
}

/// Resolved logger configuration, derived from [`ObservabilityConfig`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level to emit.
    pub level: String,
    /// JSON or pretty output.
    pub format: LogFormat,
    /// Optional rolling-file output directory.
    pub log_dir: Option<String>,
    /// Whether to also write to stdout when a file sink is configured.
    pub enable_stdout: bool,
    /// File rotation policy, only relevant when `log_dir` is set.
    pub rotation: RotationPolicy,
}

impl From<&ObservabilityConfig> for LogConfig {
    fn from(obs: &ObservabilityConfig) -> Self {
        Self {
            level: obs.log_level.clone(),
            format: obs.log_format,
            log_dir: obs.log_dir.clone(),
            enable_stdout: true,
            rotation: RotationPolicy::Daily,
        }
    }
}
