//! Configuration loading and checksum-based reload detection for the
//! scheduler daemon. Generalises `agent/src/config.rs`'s `ConfigManager`
//! (which loaded `agent.toml`/`tasks.toml`) to a single `workflow.toml`
//! parsed into `common::config::EngineConfig`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info};

use common::config::EngineConfig;
use common::utils::calculate_checksum;

const WORKFLOW_CONFIG_FILE: &str = "workflow.toml";

/// Owns the on-disk location of a workflow's configuration and the most
/// recently loaded, validated settings tree.
pub struct ConfigManager {
    pub config_dir: PathBuf,
    pub config: Option<EngineConfig>,
    pub current_checksum: Option<String>,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Result<Self> {
        if !config_dir.exists() {
            return Err(anyhow::anyhow!("configuration directory does not exist: {}", config_dir.display()));
        }
        if !config_dir.is_dir() {
            return Err(anyhow::anyhow!("configuration path is not a directory: {}", config_dir.display()));
        }
        Ok(ConfigManager { config_dir, config: None, current_checksum: None })
    }

    fn config_path(&self) -> PathBuf {
        self.config_dir.join(WORKFLOW_CONFIG_FILE)
    }

    pub async fn load_config(&mut self) -> Result<()> {
        let path = self.config_path();
        info!("loading workflow configuration from {}", path.display());

        let toml_content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        let config = EngineConfig::from_toml_str(&toml_content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate().with_context(|| format!("validation failed for {}", path.display()))?;

        let checksum = calculate_checksum(&[&toml_content]);

        info!(
            initial_cycle_point = %config.scheduling.initial_cycle_point,
            runtime_namespaces = config.runtime.len(),
            checksum = %checksum,
            "configuration loaded successfully"
        );

        self.config = Some(config);
        self.current_checksum = Some(checksum);
        Ok(())
    }

    /// Reload the configuration if the on-disk checksum has changed.
    /// Returns `Ok(true)` if a new configuration was loaded. A failed parse
    /// or validation leaves the previously loaded configuration in place,
    /// per §7's "reload rejected, old configuration continues" policy.
    pub async fn reload_config(&mut self) -> Result<bool> {
        debug!("checking for configuration changes");
        let path = self.config_path();
        let toml_content = tokio::fs::read_to_string(&path).await.with_context(|| format!("failed to read {}", path.display()))?;
        let new_checksum = calculate_checksum(&[&toml_content]);

        if let Some(current) = &self.current_checksum {
            if &new_checksum == current {
                debug!("configuration unchanged");
                return Ok(false);
            }
        }

        info!("configuration change detected, reloading");
        let config = EngineConfig::from_toml_str(&toml_content).with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate().with_context(|| format!("invalid configuration in {}", path.display()))?;

        self.config = Some(config);
        self.current_checksum = Some(new_checksum);
        info!("configuration reloaded successfully");
        Ok(true)
    }

    pub fn is_loaded(&self) -> bool {
        self.config.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> &'static str {
        r#"
[scheduling]
initial_cycle_point = "1"
cycling_mode = "integer"

[scheduling.graphs]
R1 = "foo"
"#
    }

    #[tokio::test]
    async fn load_config_reads_and_validates_workflow_toml() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(WORKFLOW_CONFIG_FILE), minimal_config()).await.unwrap();
        let mut mgr = ConfigManager::new(dir.path().to_path_buf()).unwrap();
        mgr.load_config().await.unwrap();
        assert!(mgr.is_loaded());
    }

    #[tokio::test]
    async fn reload_config_is_noop_when_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(WORKFLOW_CONFIG_FILE), minimal_config()).await.unwrap();
        let mut mgr = ConfigManager::new(dir.path().to_path_buf()).unwrap();
        mgr.load_config().await.unwrap();
        assert!(!mgr.reload_config().await.unwrap());
    }

    #[tokio::test]
    async fn reload_config_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(WORKFLOW_CONFIG_FILE);
        tokio::fs::write(&path, minimal_config()).await.unwrap();
        let mut mgr = ConfigManager::new(dir.path().to_path_buf()).unwrap();
        mgr.load_config().await.unwrap();

        let mut changed = minimal_config().to_string();
        changed.push_str("\n[scheduling.graphs]\nR1 = \"foo => bar\"\n");
        tokio::fs::write(&path, changed).await.unwrap();
        assert!(mgr.reload_config().await.unwrap());
    }

    #[tokio::test]
    async fn reload_config_rejects_invalid_change_and_keeps_old() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(WORKFLOW_CONFIG_FILE);
        tokio::fs::write(&path, minimal_config()).await.unwrap();
        let mut mgr = ConfigManager::new(dir.path().to_path_buf()).unwrap();
        mgr.load_config().await.unwrap();
        let old_checksum = mgr.current_checksum.clone();

        tokio::fs::write(&path, "not valid toml {{{").await.unwrap();
        assert!(mgr.reload_config().await.is_err());
        assert_eq!(mgr.current_checksum, old_checksum);
    }
}
