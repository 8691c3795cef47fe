//! Configuration for the read-only query surface, loaded from a
//! `query.toml` file. Much smaller than the scheduler's own config: no
//! scheduling/runtime sections, just what's needed to find a run
//! directory and serve it over HTTP.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

const QUERY_CONFIG_FILE: &str = "query.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Address to bind the HTTP surface to, e.g. `"127.0.0.1:8080"`.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// If set, `GET /summary` and `GET /checkpoints` require an
    /// `X-Api-Key` header matching this value.
    #[serde(default)]
    pub api_key: Option<String>,
    /// How often to re-read the run database for a fresh snapshot.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
}

fn default_listen_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_poll_interval_seconds() -> u64 {
    2
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            listen_address: default_listen_address(),
            api_key: None,
            poll_interval_seconds: default_poll_interval_seconds(),
        }
    }
}

impl QueryConfig {
    pub fn validate(&self) -> Result<()> {
        self.listen_address
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("invalid listen_address '{}'", self.listen_address))?;
        if self.poll_interval_seconds == 0 {
            anyhow::bail!("poll_interval_seconds must be at least 1");
        }
        Ok(())
    }
}

/// Loads and validates a `QueryConfig`. Accepts either a direct path to a
/// TOML file or a directory containing `query.toml`, mirroring how the
/// scheduler's own `ConfigManager` resolves its config path.
pub struct ConfigManager {
    pub config_path: PathBuf,
    pub config: QueryConfig,
}

impl ConfigManager {
    pub fn new(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config_path = config_path.into();
        let config_path = if config_path.is_dir() { config_path.join(QUERY_CONFIG_FILE) } else { config_path };

        let config = if config_path.exists() {
            Self::load(&config_path)?
        } else {
            debug!("no query config file at {}, using defaults", config_path.display());
            QueryConfig::default()
        };

        Ok(ConfigManager { config_path, config })
    }

    fn load(path: &Path) -> Result<QueryConfig> {
        info!("loading query configuration from {}", path.display());
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let config: QueryConfig = toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate().with_context(|| format!("invalid query configuration in {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(QueryConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_unparseable_listen_address() {
        let config = QueryConfig { listen_address: "not-an-address".to_string(), ..QueryConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_manager_falls_back_to_defaults_when_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().join("query.toml")).unwrap();
        assert_eq!(manager.config.listen_address, default_listen_address());
    }

    #[test]
    fn config_manager_loads_and_validates_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query.toml");
        std::fs::write(&path, "listen_address = \"127.0.0.1:9090\"\napi_key = \"secret\"\n").unwrap();
        let manager = ConfigManager::new(&path).unwrap();
        assert_eq!(manager.config.listen_address, "127.0.0.1:9090");
        assert_eq!(manager.config.api_key.as_deref(), Some("secret"));
    }
}
