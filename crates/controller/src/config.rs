//! Controller configuration

use anyhow::{Context, Result};
use controller_lib::{
    models::{LocalControllerDescription, ResourceVector},
    ControllerSettings,
};
use serde::Deserialize;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "CONTROLLER_CONFIG";

/// Group controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Group manager name attached to every structured event
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Hosts registered at startup
    #[serde(default)]
    pub hosts: Vec<HostEntry>,

    #[serde(default)]
    pub settings: ControllerSettings,
}

/// Static description of a local controller
#[derive(Debug, Clone, Deserialize)]
pub struct HostEntry {
    pub id: String,

    #[serde(default)]
    pub address: String,

    /// Capacity as `[cpu, memory, network_rx, network_tx]`
    pub capacity: [f64; 4],
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "group-manager".to_string())
}

fn default_api_port() -> u16 {
    8080
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            api_port: default_api_port(),
            hosts: Vec::new(),
            settings: ControllerSettings::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the optional file and the environment
    ///
    /// Environment variables use the `CONTROLLER` prefix and `__` as the
    /// nesting separator, e.g. `CONTROLLER__SETTINGS__ENERGY__ENABLED=true`.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("CONTROLLER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read controller configuration")?;

        config
            .try_deserialize()
            .context("Invalid controller configuration")
    }

    /// Host descriptions for the configured inventory, with the configured thresholds
    pub fn host_descriptions(&self) -> Vec<LocalControllerDescription> {
        self.hosts
            .iter()
            .map(|entry| {
                let mut host = LocalControllerDescription::new(
                    entry.id.clone(),
                    ResourceVector::from(entry.capacity),
                    self.settings.estimator.history_capacity,
                );
                host.address = entry.address.clone();
                host.thresholds = self.settings.thresholds.clone();
                host
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: ControllerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.api_port, 8080);
        assert!(config.hosts.is_empty());
        assert_eq!(config.settings, ControllerSettings::default());
    }

    #[test]
    fn test_host_descriptions_carry_thresholds() {
        let config: ControllerConfig = serde_json::from_str(
            r#"{
                "hosts": [{"id": "lc-1", "address": "10.0.0.1", "capacity": [16, 65536, 1000, 1000]}],
                "settings": {"thresholds": {"cpu": {"min": 0.1, "max": 0.75}}}
            }"#,
        )
        .unwrap();

        let hosts = config.host_descriptions();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].id, "lc-1");
        assert_eq!(hosts[0].address, "10.0.0.1");
        assert_eq!(hosts[0].thresholds.cpu.max, 0.75);
        assert_eq!(hosts[0].total_capacity, ResourceVector::new(16.0, 65536.0, 1000.0, 1000.0));
    }
}
