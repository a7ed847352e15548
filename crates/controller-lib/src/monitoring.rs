//! Monitoring ingestion
//!
//! Local controllers push host and VM samples through a bounded channel; a
//! single consumer appends them to the repository in arrival order. The
//! first host sample after a wake-up promotes the host to ACTIVE.

use crate::health::{components, HealthRegistry};
use crate::models::{HostId, MonitoringSample, VmId};
use crate::observability::ControllerMetrics;
use crate::power::WakeupCoordinator;
use crate::repository::GroupManagerRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// One sample reported by a local controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitoringEvent {
    Host {
        host_id: HostId,
        sample: MonitoringSample,
    },
    VirtualMachine {
        vm_id: VmId,
        sample: MonitoringSample,
    },
}

/// Drains monitoring events into the repository
pub struct MonitoringConsumer {
    repository: Arc<dyn GroupManagerRepository>,
    wakeup: WakeupCoordinator,
    events_rx: mpsc::Receiver<MonitoringEvent>,
    health: HealthRegistry,
    metrics: ControllerMetrics,
}

impl MonitoringConsumer {
    pub fn new(
        repository: Arc<dyn GroupManagerRepository>,
        wakeup: WakeupCoordinator,
        queue_size: usize,
        health: HealthRegistry,
    ) -> (Self, mpsc::Sender<MonitoringEvent>) {
        let (events_tx, events_rx) = mpsc::channel(queue_size.max(1));

        let consumer = Self {
            repository,
            wakeup,
            events_rx,
            health,
            metrics: ControllerMetrics::new(),
        };

        (consumer, events_tx)
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting monitoring consumer");
        let mut stored = 0u64;

        loop {
            tokio::select! {
                event = self.events_rx.recv() => {
                    let Some(event) = event else {
                        info!("Monitoring channel closed");
                        break;
                    };
                    if self.handle(event).await {
                        stored += 1;
                    }
                }
                _ = shutdown.recv() => {
                    info!(stored = stored, "Shutting down monitoring consumer");
                    break;
                }
            }
        }
    }

    /// Store one event; returns whether the sample was kept
    pub async fn handle(&self, event: MonitoringEvent) -> bool {
        let result = match &event {
            MonitoringEvent::Host { host_id, sample } => {
                match self
                    .repository
                    .add_host_monitoring_sample(host_id, *sample)
                    .await
                {
                    Ok(()) => self.wakeup.mark_active(host_id).await.map(|_| ()),
                    Err(e) => Err(e),
                }
            }
            MonitoringEvent::VirtualMachine { vm_id, sample } => {
                self.repository
                    .add_vm_monitoring_sample(vm_id, *sample)
                    .await
            }
        };

        match result {
            Ok(()) => {
                self.metrics.inc_monitoring_samples();
                self.health.set_healthy(components::MONITORING).await;
                true
            }
            Err(e) => {
                // Samples for departed hosts or VMs are expected after migrations
                debug!(error = %e, "Dropping monitoring sample");
                false
            }
        }
    }
}

/// Forward an event without waiting; false when the queue is full or closed
pub fn try_publish(events_tx: &mpsc::Sender<MonitoringEvent>, event: MonitoringEvent) -> bool {
    match events_tx.try_send(event) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Monitoring queue rejected sample");
            false
        }
    }
}
