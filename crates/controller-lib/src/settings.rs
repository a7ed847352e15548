//! Decision-core settings
//!
//! Every recognized option has a default, so an empty configuration yields a
//! working controller.

use crate::estimator::{estimator_from_name, ResourceDemandEstimator, DEFAULT_ESTIMATOR};
use crate::models::{MonitoringThresholds, PowerAction, DEFAULT_HISTORY_CAPACITY};
use crate::ranking::{Ranking, SortNorm};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Settings consumed by the controller library
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub estimator: EstimatorSettings,
    pub thresholds: MonitoringThresholds,
    pub policies: PolicySettings,
    pub reconfiguration: ReconfigurationSettings,
    pub enforcement: EnforcementSettings,
    pub energy: EnergySettings,
    pub monitoring: MonitoringSettings,
}

impl ControllerSettings {
    /// Estimator selected by name, falling back to the default on unknown names
    pub fn estimator(&self) -> Arc<dyn ResourceDemandEstimator> {
        estimator_from_name(
            &self.estimator.name,
            self.estimator.window_size,
            self.estimator.history_capacity,
        )
    }

    pub fn sort_norm(&self) -> SortNorm {
        SortNorm::from_name(&self.policies.sort_norm)
    }

    pub fn ranking(&self) -> Ranking {
        Ranking::new(self.sort_norm(), self.estimator())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorSettings {
    #[serde(default = "default_estimator_name")]
    pub name: String,

    /// Number of most recent samples the estimator aggregates
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Samples kept per VM and per host
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            name: default_estimator_name(),
            window_size: default_window_size(),
            history_capacity: default_history_capacity(),
        }
    }
}

fn default_estimator_name() -> String {
    DEFAULT_ESTIMATOR.to_string()
}

fn default_window_size() -> usize {
    10
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

/// Policy names per decision kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySettings {
    #[serde(default = "default_placement")]
    pub placement: String,

    #[serde(default = "default_overload_relocation")]
    pub overload_relocation: String,

    #[serde(default = "default_underload_relocation")]
    pub underload_relocation: String,

    #[serde(default = "default_reconfiguration")]
    pub reconfiguration: String,

    #[serde(default = "default_sort_norm")]
    pub sort_norm: String,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            placement: default_placement(),
            overload_relocation: default_overload_relocation(),
            underload_relocation: default_underload_relocation(),
            reconfiguration: default_reconfiguration(),
            sort_norm: default_sort_norm(),
        }
    }
}

fn default_placement() -> String {
    "FirstFit".to_string()
}

fn default_overload_relocation() -> String {
    "GreedyOverload".to_string()
}

fn default_underload_relocation() -> String {
    "GreedyUnderload".to_string()
}

fn default_reconfiguration() -> String {
    "Sercon".to_string()
}

fn default_sort_norm() -> String {
    "L1".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconfigurationSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Cron expression with seconds, evaluated in UTC
    #[serde(default = "default_reconfiguration_cron")]
    pub cron: String,
}

impl Default for ReconfigurationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cron: default_reconfiguration_cron(),
        }
    }
}

fn default_reconfiguration_cron() -> String {
    "0 0 3 * * *".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnforcementSettings {
    #[serde(default = "default_migration_timeout")]
    pub migration_timeout_secs: u64,
}

impl EnforcementSettings {
    pub fn migration_timeout(&self) -> Duration {
        Duration::from_secs(self.migration_timeout_secs)
    }
}

impl Default for EnforcementSettings {
    fn default() -> Self {
        Self {
            migration_timeout_secs: default_migration_timeout(),
        }
    }
}

fn default_migration_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergySettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_idle_check_interval")]
    pub idle_check_interval_secs: u64,

    /// Idle hosts that are never powered down
    #[serde(default = "default_reserved_hosts")]
    pub reserved_hosts: usize,

    #[serde(default)]
    pub power_action: PowerAction,
}

impl EnergySettings {
    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs.max(1))
    }
}

impl Default for EnergySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            idle_check_interval_secs: default_idle_check_interval(),
            reserved_hosts: default_reserved_hosts(),
            power_action: PowerAction::default(),
        }
    }
}

fn default_idle_check_interval() -> u64 {
    60
}

fn default_reserved_hosts() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSettings {
    #[serde(default = "default_anomaly_check_interval")]
    pub anomaly_check_interval_secs: u64,

    /// Capacity of the inbound monitoring queue
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl MonitoringSettings {
    pub fn anomaly_check_interval(&self) -> Duration {
        Duration::from_secs(self.anomaly_check_interval_secs.max(1))
    }
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            anomaly_check_interval_secs: default_anomaly_check_interval(),
            queue_size: default_queue_size(),
        }
    }
}

fn default_anomaly_check_interval() -> u64 {
    30
}

fn default_queue_size() -> usize {
    1024
}
