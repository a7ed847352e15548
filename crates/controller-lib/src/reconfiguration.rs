//! Scheduled consolidation
//!
//! Fires [`StateMachine::start_reconfiguration`] on a cron schedule. A firing
//! that finds the state machine busy is dropped, not queued.

use crate::health::{components, HealthRegistry};
use crate::observability::ControllerMetrics;
use crate::state_machine::{ReconfigurationReport, StateMachine};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct ReconfigurationTrigger {
    schedule: Schedule,
    state_machine: StateMachine,
    health: HealthRegistry,
    metrics: ControllerMetrics,
}

impl ReconfigurationTrigger {
    /// Parse a six-field (seconds first) cron expression
    pub fn new(cron_expression: &str, state_machine: StateMachine, health: HealthRegistry) -> Result<Self> {
        let schedule = Schedule::from_str(cron_expression)
            .with_context(|| format!("Invalid reconfiguration schedule: {}", cron_expression))?;

        Ok(Self {
            schedule,
            state_machine,
            health,
            metrics: ControllerMetrics::new(),
        })
    }

    pub fn next_fire_time(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting reconfiguration trigger");

        loop {
            let now = Utc::now();
            let Some(next) = self.next_fire_time(now) else {
                warn!("Reconfiguration schedule has no upcoming firing");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next, "Next reconfiguration scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.fire().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down reconfiguration trigger");
                    break;
                }
            }
        }
    }

    /// Run one reconfiguration now, or skip it if the state machine is busy
    pub async fn fire(&self) -> Option<ReconfigurationReport> {
        match self.state_machine.start_reconfiguration().await {
            Ok(report) => {
                self.health.set_healthy(components::RECONFIGURATION).await;
                Some(report)
            }
            Err(e) if e.is_busy() => {
                info!("State machine busy, skipping scheduled reconfiguration");
                self.metrics.inc_skipped_trigger(components::RECONFIGURATION);
                None
            }
            Err(e) => {
                warn!(error = %e, "Scheduled reconfiguration failed");
                self.health
                    .set_degraded(components::RECONFIGURATION, e.to_string())
                    .await;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{GroupManagerRepository, InMemoryRepository};
    use crate::state_machine::StateMachineBuilder;
    use crate::test_support::{host, vm, MigrationMode, ScriptedNodeControl};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn state_machine(repository: Arc<InMemoryRepository>, control: Arc<ScriptedNodeControl>) -> StateMachine {
        StateMachineBuilder::new()
            .repository(repository)
            .control(control)
            .build()
            .unwrap()
    }

    #[test]
    fn test_invalid_cron_is_rejected() {
        let sm = state_machine(
            Arc::new(InMemoryRepository::new()),
            Arc::new(ScriptedNodeControl::new()),
        );
        assert!(ReconfigurationTrigger::new("not a schedule", sm, HealthRegistry::new()).is_err());
    }

    #[test]
    fn test_next_fire_time_follows_schedule() {
        let sm = state_machine(
            Arc::new(InMemoryRepository::new()),
            Arc::new(ScriptedNodeControl::new()),
        );
        let trigger = ReconfigurationTrigger::new("0 0 3 * * *", sm, HealthRegistry::new()).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(
            trigger.next_fire_time(now),
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 3, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_fire_consolidates() {
        let repository = Arc::new(InMemoryRepository::with_hosts(vec![
            host("a", 10.0, vec![vm("va", [1.0, 1.0, 1.0, 1.0])]),
            host("b", 10.0, vec![vm("vb", [5.0, 5.0, 5.0, 5.0])]),
        ]));
        let sm = state_machine(repository.clone(), Arc::new(ScriptedNodeControl::new()));
        let trigger = ReconfigurationTrigger::new("0 0 3 * * *", sm, HealthRegistry::new()).unwrap();

        let report = trigger.fire().await.unwrap();
        assert_eq!(report.plan.hosts_released, 1);
        let va = repository.get_virtual_machine("va").await.unwrap().unwrap();
        assert_eq!(va.host_id.as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_firing_is_skipped() {
        let repository = Arc::new(InMemoryRepository::with_hosts(vec![
            host("a", 10.0, vec![vm("va", [1.0, 1.0, 1.0, 1.0])]),
            host("b", 10.0, vec![vm("vb", [5.0, 5.0, 5.0, 5.0])]),
        ]));
        let control =
            Arc::new(ScriptedNodeControl::new().with_default_migration(MigrationMode::Pending));
        let sm = state_machine(repository, control.clone());
        let running = {
            let sm = sm.clone();
            tokio::spawn(async move { sm.start_reconfiguration().await })
        };
        while control.count("migrate:") == 0 {
            tokio::task::yield_now().await;
        }

        let trigger = ReconfigurationTrigger::new("0 0 3 * * *", sm.clone(), HealthRegistry::new()).unwrap();
        assert!(trigger.fire().await.is_none());

        sm.on_migration_completed("va", true);
        assert!(running.await.unwrap().is_ok());
    }
}
