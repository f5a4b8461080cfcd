//! Manager configuration with builder pattern

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// SQLite database file
    pub db_path: PathBuf,
    /// Deadline for a single runtime call
    pub runtime_timeout_secs: u64,
    /// Graceful stop period before the runtime kills the container
    pub stop_timeout_secs: u64,
    pub reconcile_interval_secs: u64,
    /// Label carrying the owning node id
    pub label_key: String,
    /// Prefix for container and volume names, value of the `managed-by` label
    pub manager_name: String,
    /// Where the node data volume is mounted inside the container
    pub data_mount_path: String,
    pub staking_container_port: u16,
    pub default_event_limit: usize,
}

/// Label naming the manager instance that created a container
pub const MANAGED_BY_LABEL: &str = "managed-by";

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("nodefleet.db"),
            runtime_timeout_secs: 30,
            stop_timeout_secs: 30,
            reconcile_interval_secs: 15,
            label_key: "managed-node".to_string(),
            manager_name: "nodefleet".to_string(),
            data_mount_path: "/root/.avalanchego".to_string(),
            staking_container_port: 9651,
            default_event_limit: 50,
        }
    }
}

impl ManagerConfig {
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::default()
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: ManagerConfig = serde_json::from_str(&raw)
            .map_err(|e| crate::Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.runtime_timeout_secs == 0 {
            return Err(crate::Error::Config("runtime_timeout_secs must be at least 1".into()));
        }
        if self.reconcile_interval_secs == 0 {
            return Err(crate::Error::Config(
                "reconcile_interval_secs must be at least 1".into(),
            ));
        }
        if self.label_key.is_empty() {
            return Err(crate::Error::Config("label_key cannot be empty".into()));
        }
        if self.manager_name.is_empty() {
            return Err(crate::Error::Config("manager_name cannot be empty".into()));
        }
        if self.staking_container_port == 0 {
            return Err(crate::Error::Config("staking_container_port cannot be 0".into()));
        }
        Ok(())
    }

    pub fn runtime_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Deadline for a stop call: the graceful period plus the usual call deadline
    pub fn stop_deadline(&self) -> Duration {
        self.stop_timeout() + self.runtime_timeout()
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn container_name(&self, node_name: &str) -> String {
        format!("{}-{}", self.manager_name, node_name)
    }

    pub fn volume_name(&self, node_id: i64) -> String {
        format!("{}-{}-data", self.manager_name, node_id)
    }

    /// Labels that mark a container as this manager's container for `node_id`.
    /// Node ids are only unique within one store, so both labels are needed.
    pub fn node_labels(&self, node_id: i64) -> Vec<(String, String)> {
        vec![
            (self.label_key.clone(), node_id.to_string()),
            (MANAGED_BY_LABEL.to_string(), self.manager_name.clone()),
        ]
    }
}

#[derive(Default)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.db_path = path.into();
        self
    }

    pub fn runtime_timeout_secs(mut self, secs: u64) -> Self {
        self.config.runtime_timeout_secs = secs;
        self
    }

    pub fn stop_timeout_secs(mut self, secs: u64) -> Self {
        self.config.stop_timeout_secs = secs;
        self
    }

    pub fn reconcile_interval_secs(mut self, secs: u64) -> Self {
        self.config.reconcile_interval_secs = secs;
        self
    }

    pub fn label_key(mut self, key: impl Into<String>) -> Self {
        self.config.label_key = key.into();
        self
    }

    pub fn manager_name(mut self, name: impl Into<String>) -> Self {
        self.config.manager_name = name.into();
        self
    }

    pub fn data_mount_path(mut self, path: impl Into<String>) -> Self {
        self.config.data_mount_path = path.into();
        self
    }

    pub fn staking_container_port(mut self, port: u16) -> Self {
        self.config.staking_container_port = port;
        self
    }

    pub fn default_event_limit(mut self, limit: usize) -> Self {
        self.config.default_event_limit = limit;
        self
    }

    pub fn build(self) -> ManagerConfig {
        self.config
    }

    pub fn build_validated(self) -> crate::Result<ManagerConfig> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

impl From<ManagerConfig> for ManagerConfigBuilder {
    fn from(config: ManagerConfig) -> Self {
        Self { config }
    }
}
