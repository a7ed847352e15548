//! Host power management
//!
//! Waking PASSIVE hosts before they receive migrations, and the energy saver
//! loop that powers idle hosts down.

use crate::error::RepositoryError;
use crate::health::{components, HealthRegistry};
use crate::models::{HostId, HostStatus, PowerAction};
use crate::observability::{ControllerMetrics, EventLogger};
use crate::remote::NodeControl;
use crate::repository::GroupManagerRepository;
use crate::state_machine::StateMachine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

/// Drives the PASSIVE → WOKENUP → ACTIVE lifecycle
#[derive(Clone)]
pub struct WakeupCoordinator {
    repository: Arc<dyn GroupManagerRepository>,
    control: Arc<dyn NodeControl>,
    metrics: ControllerMetrics,
    logger: EventLogger,
}

impl WakeupCoordinator {
    pub fn new(
        repository: Arc<dyn GroupManagerRepository>,
        control: Arc<dyn NodeControl>,
        logger: EventLogger,
    ) -> Self {
        Self {
            repository,
            control,
            metrics: ControllerMetrics::new(),
            logger,
        }
    }

    /// Wake every listed host, returning the ids that could not be woken
    ///
    /// Hosts that are already ACTIVE or WOKENUP count as awake.
    pub async fn wake(&self, host_ids: &[HostId]) -> Result<(), Vec<HostId>> {
        let mut failed = Vec::new();
        for host_id in host_ids {
            if let Err(e) = self.wake_one(host_id).await {
                warn!(host_id = %host_id, error = %e, "Failed to wake host");
                failed.push(host_id.clone());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(failed)
        }
    }

    async fn wake_one(&self, host_id: &str) -> anyhow::Result<()> {
        let claimed = self
            .repository
            .compare_and_set_host_status(host_id, HostStatus::Passive, HostStatus::WokenUp)
            .await?;
        if !claimed {
            debug!(host_id = %host_id, "Host already awake");
            return Ok(());
        }

        if let Err(e) = self.control.wake_up(host_id).await {
            self.repository
                .compare_and_set_host_status(host_id, HostStatus::WokenUp, HostStatus::Passive)
                .await?;
            self.logger.log_power_transition(host_id, None, false);
            return Err(e.into());
        }

        self.metrics.inc_hosts_woken();
        self.logger.log_power_transition(host_id, None, true);
        Ok(())
    }

    /// Promote a woken host to ACTIVE once it reports monitoring data
    pub async fn mark_active(&self, host_id: &str) -> Result<bool, RepositoryError> {
        let promoted = self
            .repository
            .compare_and_set_host_status(host_id, HostStatus::WokenUp, HostStatus::Active)
            .await?;
        if promoted {
            info!(host_id = %host_id, "Woken host is active");
        }
        Ok(promoted)
    }
}

/// Periodically powers down idle hosts
///
/// A cycle runs on every interval tick or when [`EnergySaver::notifier`] is
/// notified, and is skipped while the state machine is busy.
pub struct EnergySaver {
    state_machine: StateMachine,
    interval: Duration,
    reserved_hosts: usize,
    action: PowerAction,
    wake_signal: Arc<Notify>,
    health: HealthRegistry,
    metrics: ControllerMetrics,
}

impl EnergySaver {
    pub fn new(
        state_machine: StateMachine,
        interval: Duration,
        reserved_hosts: usize,
        action: PowerAction,
        health: HealthRegistry,
    ) -> Self {
        Self {
            state_machine,
            interval,
            reserved_hosts,
            action,
            wake_signal: Arc::new(Notify::new()),
            health,
            metrics: ControllerMetrics::new(),
        }
    }

    /// Handle that interrupts the timed wait and triggers a cycle early
    pub fn notifier(&self) -> Arc<Notify> {
        self.wake_signal.clone()
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            reserved_hosts = self.reserved_hosts,
            action = %self.action,
            "Starting energy saver"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.wake_signal.notified() => {
                    debug!("Energy saver woken early");
                }
                _ = shutdown.recv() => {
                    info!("Shutting down energy saver");
                    break;
                }
            }

            self.cycle().await;
        }
    }

    /// One idle-host scan; returns the hosts powered down
    pub async fn cycle(&self) -> Vec<HostId> {
        if self.state_machine.is_busy() {
            debug!("State machine busy, skipping energy saver cycle");
            self.metrics.inc_skipped_trigger(components::ENERGY_SAVER);
            return Vec::new();
        }

        match self
            .state_machine
            .power_down_idle_hosts(self.reserved_hosts, self.action)
            .await
        {
            Ok(hosts) => {
                self.health.set_healthy(components::ENERGY_SAVER).await;
                hosts
            }
            Err(e) if e.is_busy() => {
                self.metrics.inc_skipped_trigger(components::ENERGY_SAVER);
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Energy saver cycle failed");
                self.health
                    .set_degraded(components::ENERGY_SAVER, e.to_string())
                    .await;
                Vec::new()
            }
        }
    }
}
