//! Canonical, immutable-after-startup map from server name to its configuration.

use crate::config::{Config, ServerConfig};
use std::collections::HashMap;
use std::sync::Arc;

/// Server registry built once from loaded configuration.
#[derive(Clone)]
pub struct ServerRegistry {
    servers: Arc<HashMap<String, Arc<ServerConfig>>>,
}

impl ServerRegistry {
    /// Build a registry from a loaded `Config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let servers = config
            .servers
            .iter()
            .map(|(name, server)| (name.clone(), Arc::new(server.clone())))
            .collect();
        Self {
            servers: Arc::new(servers),
        }
    }

    /// Look up a server by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ServerConfig>> {
        self.servers.get(name).cloned()
    }

    /// Iterate over servers with `enabled == true`.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &Arc<ServerConfig>> {
        self.servers.values().filter(|s| s.enabled)
    }

    /// Iterate over every registered server, enabled or not.
    pub fn all(&self) -> impl Iterator<Item = &Arc<ServerConfig>> {
        self.servers.values()
    }

    /// Number of registered servers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether the registry has no servers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::collections::HashMap;

    fn server(name: &str, enabled: bool) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            command: "echo".to_string(),
            args: vec![],
            env: HashMap::new(),
            enabled,
            scopes: vec![],
            limits: crate::config::Limits::default(),
            probe: crate::config::ProbeOverride::default(),
            probe_interval_ms: 5000,
            probe_timeout_ms: 2000,
        }
    }

    #[test]
    fn enabled_servers_filters_disabled() {
        let mut config = Config::default();
        config.servers.insert("a".to_string(), server("a", true));
        config.servers.insert("b".to_string(), server("b", false));
        let registry = ServerRegistry::from_config(&config);

        let names: Vec<_> = registry.enabled_servers().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["a".to_string()]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn get_returns_none_for_unknown() {
        let registry = ServerRegistry::from_config(&Config::default());
        assert!(registry.get("missing").is_none());
    }
}
