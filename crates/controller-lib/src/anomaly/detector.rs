//! Threshold-based host classification and the periodic detection loop

use crate::estimator::ResourceDemandEstimator;
use crate::health::{components, HealthRegistry};
use crate::models::{
    HostStatus, LocalControllerDescription, LocalControllerState, MonitoringThresholds, Resource,
    ResourceVector,
};
use crate::observability::{ControllerMetrics, EventLogger};
use crate::repository::GroupManagerRepository;
use crate::state_machine::StateMachine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Classify a normalized utilization vector
///
/// One component above its max is enough for OVERLOADED. UNDERLOADED needs
/// every component below its min.
pub fn classify_utilization(
    utilization: &ResourceVector,
    thresholds: &MonitoringThresholds,
) -> LocalControllerState {
    let overloaded = Resource::ALL
        .iter()
        .any(|r| utilization.get(*r) > thresholds.get(*r).max);
    if overloaded {
        return LocalControllerState::Overloaded;
    }

    let underloaded = Resource::ALL
        .iter()
        .all(|r| utilization.get(*r) < thresholds.get(*r).min);
    if underloaded {
        LocalControllerState::Underloaded
    } else {
        LocalControllerState::Stable
    }
}

/// Host-level anomaly detector
#[derive(Clone)]
pub struct AnomalyDetector {
    estimator: Arc<dyn ResourceDemandEstimator>,
}

impl AnomalyDetector {
    pub fn new(estimator: Arc<dyn ResourceDemandEstimator>) -> Self {
        Self { estimator }
    }

    /// Normalized utilization and the resulting classification
    pub fn evaluate(&self, host: &LocalControllerDescription) -> (ResourceVector, LocalControllerState) {
        let utilization = self.estimator.normalized_host_utilization(host);
        let state = classify_utilization(&utilization, &host.thresholds);
        (utilization, state)
    }

    pub fn classify(&self, host: &LocalControllerDescription) -> LocalControllerState {
        self.evaluate(host).1
    }
}

/// Periodically classifies every ACTIVE host and asks the state machine to
/// resolve what it finds
///
/// At most one resolution runs per cycle since it invalidates the snapshot
/// the remaining classifications were made on. Overloads go first.
pub struct AnomalyDetectionLoop {
    detector: AnomalyDetector,
    repository: Arc<dyn GroupManagerRepository>,
    state_machine: StateMachine,
    interval: Duration,
    history_entries: usize,
    health: HealthRegistry,
    metrics: ControllerMetrics,
    logger: EventLogger,
}

impl AnomalyDetectionLoop {
    pub fn new(
        detector: AnomalyDetector,
        repository: Arc<dyn GroupManagerRepository>,
        state_machine: StateMachine,
        interval: Duration,
        history_entries: usize,
        health: HealthRegistry,
        logger: EventLogger,
    ) -> Self {
        Self {
            detector,
            repository,
            state_machine,
            interval,
            history_entries,
            health,
            metrics: ControllerMetrics::new(),
            logger,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting anomaly detection loop"
        );
        let mut ticker = interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cycle().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down anomaly detection loop");
                    break;
                }
            }
        }
    }

    /// Classify every host once and resolve at most one anomaly
    pub async fn cycle(&self) -> Vec<(String, LocalControllerState)> {
        let hosts = match self
            .repository
            .get_host_descriptions(self.history_entries, true, true)
            .await
        {
            Ok(hosts) => hosts,
            Err(e) => {
                warn!(error = %e, "Failed to read host descriptions");
                self.health
                    .set_degraded(components::ANOMALY_DETECTOR, e.to_string())
                    .await;
                return Vec::new();
            }
        };

        let mut anomalies = Vec::new();
        for host in &hosts {
            if host.status != HostStatus::Active {
                continue;
            }
            let (utilization, state) = self.detector.evaluate(host);
            if !state.is_anomaly() {
                continue;
            }
            // Empty hosts are left to the energy saver
            if state == LocalControllerState::Underloaded && !host.has_virtual_machines() {
                continue;
            }
            self.metrics.inc_anomalies_detected(state);
            self.logger.log_anomaly(&host.id, state, &utilization);
            anomalies.push((host.id.clone(), state));
        }
        self.health.set_healthy(components::ANOMALY_DETECTOR).await;

        anomalies.sort_by_key(|(_, state)| *state != LocalControllerState::Overloaded);

        for (host_id, state) in &anomalies {
            match self.state_machine.resolve_anomaly(host_id, *state).await {
                Ok(_) => break,
                Err(e) if e.is_busy() => {
                    debug!(host_id = %host_id, "State machine busy, deferring anomaly");
                    self.metrics.inc_skipped_trigger(components::ANOMALY_DETECTOR);
                    break;
                }
                Err(e) => {
                    debug!(host_id = %host_id, error = %e, "Anomaly not resolved");
                }
            }
        }

        anomalies
    }
}
