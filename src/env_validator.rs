//! Per-server environment validation: presence plus optional shape checks.

use crate::config::{EnvSchema, ServerConfig};
use std::collections::HashMap;

/// Result of validating one server's declared environment against a concrete environment
/// map (typically `std::env::vars()` merged with any server-specific overrides).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvValidationReport {
    /// Whether every required variable is present and well-formed.
    pub ok: bool,
    /// Names of variables that are missing or fail their schema check.
    pub missing: Vec<String>,
}

/// Sentinel left behind by the config loader when a `${VAR}` reference could not be
/// resolved against the process environment at load time.
fn is_unresolved(value: &str) -> bool {
    value.starts_with("${") && value.ends_with('}')
}

fn check_schema(value: &str, schema: EnvSchema) -> bool {
    match schema {
        EnvSchema::NonEmpty => !value.trim().is_empty(),
        EnvSchema::Url => {
            let Some((scheme, rest)) = value.split_once("://") else {
                return false;
            };
            !scheme.is_empty() && !rest.is_empty()
        }
        EnvSchema::Port => value.trim().parse::<u16>().map(|p| p != 0).unwrap_or(false),
        EnvSchema::Numeric => value.trim().parse::<f64>().is_ok(),
    }
}

/// Validate a server's declared environment against a resolved environment map.
///
/// A variable is considered missing if it is absent, empty-string-only for a required
/// variable, still an unresolved `${VAR}` reference, or fails its declared schema.
#[must_use]
pub fn validate(server: &ServerConfig, env: &HashMap<String, String>) -> EnvValidationReport {
    let mut missing = Vec::new();

    for (name, spec) in &server.env {
        let value = env.get(name);
        match value {
            None => {
                if spec.required {
                    missing.push(name.clone());
                }
            }
            Some(v) if is_unresolved(v) => {
                if spec.required {
                    missing.push(name.clone());
                }
            }
            Some(v) => {
                if let Some(schema) = spec.schema {
                    if !check_schema(v, schema) {
                        missing.push(name.clone());
                    }
                } else if spec.required && v.is_empty() {
                    missing.push(name.clone());
                }
            }
        }
    }

    EnvValidationReport {
        ok: missing.is_empty(),
        missing,
    }
}
