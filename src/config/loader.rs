use super::{Config, ConfigError};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;

/// Loads configuration from layered sources: programmatic defaults, a primary YAML file,
/// an optional local override file, then `ORCHD_`-prefixed environment variables.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the conventional file locations plus environment overrides.
    ///
    /// # Errors
    /// Returns `ConfigError::ParseFailed` if the layered sources don't deserialize into
    /// `Config`, or any `ConfigError` variant `Config::validate` reports.
    pub fn load() -> Result<Config, ConfigError> {
        Self::load_from(".orchestrator/config.yaml", ".orchestrator/local.yaml")
    }

    /// Load configuration from explicit file paths, primarily for tests.
    ///
    /// # Errors
    /// Same as [`Self::load`].
    pub fn load_from(
        primary: impl AsRef<Path>,
        local_override: impl AsRef<Path>,
    ) -> Result<Config, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(primary.as_ref()))
            .merge(Yaml::file(local_override.as_ref()))
            .merge(Env::prefixed("ORCHD_").split("__"))
            .extract()
            .map_err(|e| ConfigError::ParseFailed(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_yaml(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_defaults_when_files_absent() {
        let dir = TempDir::new().unwrap();
        let primary = dir.path().join("missing.yaml");
        let local = dir.path().join("missing-local.yaml");
        let config = ConfigLoader::load_from(primary, local).unwrap();
        assert_eq!(config.http.port, 8080);
        assert!(config.servers.is_empty());
    }

    #[test]
    fn merges_primary_yaml() {
        let dir = TempDir::new().unwrap();
        let primary = write_yaml(
            &dir,
            "config.yaml",
            r"
http:
  port: 9000
servers:
  demo:
    name: demo
    command: demo-bin
",
        );
        let local = dir.path().join("missing-local.yaml");
        let config = ConfigLoader::load_from(primary, local).unwrap();
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.servers["demo"].command, "demo-bin");
    }

    #[test]
    fn local_override_wins_over_primary() {
        let dir = TempDir::new().unwrap();
        let primary = write_yaml(&dir, "config.yaml", "http:\n  port: 9000\n");
        let local = write_yaml(&dir, "local.yaml", "http:\n  port: 9100\n");
        let config = ConfigLoader::load_from(primary, local).unwrap();
        assert_eq!(config.http.port, 9100);
    }

    #[test]
    fn invalid_config_fails_validation() {
        let dir = TempDir::new().unwrap();
        let primary = write_yaml(&dir, "config.yaml", "http:\n  port: 0\n");
        let local = dir.path().join("missing-local.yaml");
        let err = ConfigLoader::load_from(primary, local).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHttpPort));
    }

    #[test]
    fn env_override_applies() {
        let dir = TempDir::new().unwrap();
        let primary = dir.path().join("missing.yaml");
        let local = dir.path().join("missing-local.yaml");
        temp_env::with_var("ORCHD_HTTP__PORT", Some("9200"), || {
            let config = ConfigLoader::load_from(&primary, &local).unwrap();
            assert_eq!(config.http.port, 9200);
        });
    }
}
