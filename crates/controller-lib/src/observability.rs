//! Observability infrastructure for the group controller
//!
//! Provides:
//! - Prometheus metrics (submissions, anomalies, migrations, power transitions, workflow latency)
//! - Structured JSON logging with tracing

use crate::models::{LocalControllerState, PowerAction, ResourceVector};
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for workflow latency (in seconds)
const WORKFLOW_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    submissions: IntCounter,
    vms_placed: IntCounter,
    vms_unplaced: IntCounter,
    anomalies_detected: IntCounterVec,
    resolutions: IntCounterVec,
    migrations: IntCounterVec,
    reconfigurations: IntCounter,
    hosts_released: IntCounter,
    hosts_powered_down: IntCounter,
    hosts_woken: IntCounter,
    skipped_triggers: IntCounterVec,
    monitoring_samples: IntCounter,
    busy: IntGauge,
    workflow_duration_seconds: HistogramVec,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            submissions: register_int_counter!(
                "group_controller_submissions_total",
                "Number of VM submission batches accepted"
            )
            .expect("Failed to register submissions_total"),

            vms_placed: register_int_counter!(
                "group_controller_vms_placed_total",
                "Number of VMs placed and started on a host"
            )
            .expect("Failed to register vms_placed_total"),

            vms_unplaced: register_int_counter!(
                "group_controller_vms_unplaced_total",
                "Number of submitted VMs that could not be placed or started"
            )
            .expect("Failed to register vms_unplaced_total"),

            anomalies_detected: register_int_counter_vec!(
                "group_controller_anomalies_detected_total",
                "Number of host anomalies detected",
                &["kind"]
            )
            .expect("Failed to register anomalies_detected_total"),

            resolutions: register_int_counter_vec!(
                "group_controller_anomaly_resolutions_total",
                "Number of anomaly resolutions by result",
                &["result"]
            )
            .expect("Failed to register anomaly_resolutions_total"),

            migrations: register_int_counter_vec!(
                "group_controller_migrations_total",
                "Number of enforced migrations by outcome",
                &["outcome"]
            )
            .expect("Failed to register migrations_total"),

            reconfigurations: register_int_counter!(
                "group_controller_reconfigurations_total",
                "Number of consolidation runs"
            )
            .expect("Failed to register reconfigurations_total"),

            hosts_released: register_int_counter!(
                "group_controller_hosts_released_total",
                "Number of hosts emptied by consolidation or underload relocation"
            )
            .expect("Failed to register hosts_released_total"),

            hosts_powered_down: register_int_counter!(
                "group_controller_hosts_powered_down_total",
                "Number of idle hosts powered down"
            )
            .expect("Failed to register hosts_powered_down_total"),

            hosts_woken: register_int_counter!(
                "group_controller_hosts_woken_total",
                "Number of passive hosts woken up"
            )
            .expect("Failed to register hosts_woken_total"),

            skipped_triggers: register_int_counter_vec!(
                "group_controller_skipped_triggers_total",
                "Periodic triggers skipped because the state machine was busy",
                &["trigger"]
            )
            .expect("Failed to register skipped_triggers_total"),

            monitoring_samples: register_int_counter!(
                "group_controller_monitoring_samples_total",
                "Number of monitoring samples stored"
            )
            .expect("Failed to register monitoring_samples_total"),

            busy: register_int_gauge!(
                "group_controller_busy",
                "1 while a cluster-mutating workflow is running"
            )
            .expect("Failed to register busy"),

            workflow_duration_seconds: register_histogram_vec!(
                "group_controller_workflow_duration_seconds",
                "Duration of state machine workflows",
                &["workflow"],
                WORKFLOW_BUCKETS.to_vec()
            )
            .expect("Failed to register workflow_duration_seconds"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new)
    }

    pub fn inc_submissions(&self) {
        self.inner().submissions.inc();
    }

    pub fn add_vms_placed(&self, count: u64) {
        self.inner().vms_placed.inc_by(count);
    }

    pub fn add_vms_unplaced(&self, count: u64) {
        self.inner().vms_unplaced.inc_by(count);
    }

    pub fn inc_anomalies_detected(&self, state: LocalControllerState) {
        self.inner()
            .anomalies_detected
            .with_label_values(&[&state.to_string().to_lowercase()])
            .inc();
    }

    /// Record a resolution outcome (`resolved`, `failed`, `skipped`)
    pub fn inc_resolutions(&self, result: &str) {
        self.inner().resolutions.with_label_values(&[result]).inc();
    }

    pub fn inc_migrations(&self, outcome: &str) {
        self.inner().migrations.with_label_values(&[outcome]).inc();
    }

    pub fn inc_reconfigurations(&self) {
        self.inner().reconfigurations.inc();
    }

    pub fn add_hosts_released(&self, count: u64) {
        self.inner().hosts_released.inc_by(count);
    }

    pub fn inc_hosts_powered_down(&self) {
        self.inner().hosts_powered_down.inc();
    }

    pub fn inc_hosts_woken(&self) {
        self.inner().hosts_woken.inc();
    }

    /// Count a periodic trigger dropped while busy
    pub fn inc_skipped_trigger(&self, trigger: &str) {
        self.inner()
            .skipped_triggers
            .with_label_values(&[trigger])
            .inc();
    }

    pub fn inc_monitoring_samples(&self) {
        self.inner().monitoring_samples.inc();
    }

    pub fn set_busy(&self, busy: bool) {
        self.inner().busy.set(i64::from(busy));
    }

    pub fn observe_workflow(&self, workflow: &str, duration_secs: f64) {
        self.inner()
            .workflow_duration_seconds
            .with_label_values(&[workflow])
            .observe(duration_secs);
    }
}

/// Structured logger for controller events
///
/// One JSON event per significant decision, tagged with the group manager
/// node name so events from several controllers can be told apart.
#[derive(Clone)]
pub struct EventLogger {
    node_name: String,
}

impl EventLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn log_vm_placed(&self, vm_id: &str, host_id: &str, requested: &ResourceVector) {
        info!(
            event = "vm_placed",
            node = %self.node_name,
            vm_id = %vm_id,
            host_id = %host_id,
            requested = %requested,
            "Virtual machine placed"
        );
    }

    pub fn log_vm_unplaced(&self, vm_id: &str, reason: &str) {
        warn!(
            event = "vm_placed",
            node = %self.node_name,
            vm_id = %vm_id,
            placed = false,
            reason = %reason,
            "Virtual machine could not be placed"
        );
    }

    pub fn log_anomaly(
        &self,
        host_id: &str,
        state: LocalControllerState,
        utilization: &ResourceVector,
    ) {
        warn!(
            event = "anomaly_detected",
            node = %self.node_name,
            host_id = %host_id,
            state = %state,
            utilization = %utilization,
            "Host anomaly detected"
        );
    }

    pub fn log_anomaly_resolved(
        &self,
        host_id: &str,
        state: LocalControllerState,
        migrations: usize,
        failed: usize,
    ) {
        info!(
            event = "anomaly_resolved",
            node = %self.node_name,
            host_id = %host_id,
            state = %state,
            migrations = migrations,
            failed = failed,
            "Anomaly resolved"
        );
    }

    pub fn log_resolution_failed(&self, host_id: &str, state: LocalControllerState, error: &str) {
        warn!(
            event = "anomaly_resolved",
            node = %self.node_name,
            host_id = %host_id,
            state = %state,
            resolved = false,
            error = %error,
            "Anomaly resolution failed"
        );
    }

    pub fn log_migration_finished(
        &self,
        vm_id: &str,
        source: Option<&str>,
        destination: &str,
        outcome: &str,
    ) {
        info!(
            event = "migration_finished",
            node = %self.node_name,
            vm_id = %vm_id,
            source = ?source,
            destination = %destination,
            outcome = %outcome,
            "Migration finished"
        );
    }

    pub fn log_reconfiguration_finished(
        &self,
        migrations: usize,
        hosts_used: usize,
        hosts_released: usize,
    ) {
        info!(
            event = "reconfiguration_finished",
            node = %self.node_name,
            migrations = migrations,
            hosts_used = hosts_used,
            hosts_released = hosts_released,
            "Reconfiguration finished"
        );
    }

    /// Log a host power state change; `action` is `None` for a wake-up
    pub fn log_power_transition(&self, host_id: &str, action: Option<PowerAction>, success: bool) {
        let action = action.map(|a| a.to_string()).unwrap_or_else(|| "wake_up".to_string());
        if success {
            info!(
                event = "host_power_transition",
                node = %self.node_name,
                host_id = %host_id,
                action = %action,
                "Host power transition"
            );
        } else {
            warn!(
                event = "host_power_transition",
                node = %self.node_name,
                host_id = %host_id,
                action = %action,
                success = false,
                "Host power transition failed"
            );
        }
    }

    pub fn log_startup(&self, version: &str, hosts: usize) {
        info!(
            event = "controller_started",
            node = %self.node_name,
            controller_version = %version,
            hosts = hosts,
            "Group controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Group controller shutting down"
        );
    }
}
