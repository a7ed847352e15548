//! Migration plan enforcement
//!
//! Every migration of a plan runs concurrently under its own watchdog. The
//! convergence deadline starts when the migration is registered and covers
//! the migrate call itself as well as the wait for its completion signal; a
//! per-migration termination flag decides the winner, so exactly one of
//! graceful completion or forced suspend takes effect.

use crate::models::{Migration, ReconfigurationPlan, VmId};
use crate::remote::{MigrationStart, NodeControl};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default convergence timeout per migration
pub const DEFAULT_MIGRATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Terminal state of one migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum MigrationOutcome {
    /// Completed before the timeout
    Migrated,
    /// Timed out and converged by suspending the source copy
    ForcedSuspend,
    Failed { reason: String },
}

impl MigrationOutcome {
    /// The VM ended up on its destination
    pub fn is_relocated(&self) -> bool {
        matches!(self, MigrationOutcome::Migrated | MigrationOutcome::ForcedSuspend)
    }

    pub fn label(&self) -> &'static str {
        match self {
            MigrationOutcome::Migrated => "migrated",
            MigrationOutcome::ForcedSuspend => "forced_suspend",
            MigrationOutcome::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for MigrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationOutcome::Failed { reason } => write!(f, "failed: {}", reason),
            other => write!(f, "{}", other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub migration: Migration,
    pub outcome: MigrationOutcome,
}

/// Per-migration outcomes of one enforced plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnforcementReport {
    pub results: Vec<MigrationResult>,
}

impl EnforcementReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn migrated(&self) -> usize {
        self.count(|o| matches!(o, MigrationOutcome::Migrated))
    }

    pub fn forced(&self) -> usize {
        self.count(|o| matches!(o, MigrationOutcome::ForcedSuspend))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, MigrationOutcome::Failed { .. }))
    }

    pub fn outcome_of(&self, vm_id: &str) -> Option<&MigrationOutcome> {
        self.results
            .iter()
            .find(|r| r.migration.vm_id == vm_id)
            .map(|r| &r.outcome)
    }

    fn count(&self, predicate: impl Fn(&MigrationOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| predicate(&r.outcome)).count()
    }
}

struct InFlight {
    terminated: Arc<AtomicBool>,
    completion: oneshot::Sender<bool>,
}

/// Executes reconfiguration plans against the control surface
#[derive(Clone)]
pub struct MigrationPlanEnforcer {
    control: Arc<dyn NodeControl>,
    timeout: Duration,
    in_flight: Arc<DashMap<VmId, InFlight>>,
}

impl MigrationPlanEnforcer {
    pub fn new(control: Arc<dyn NodeControl>, timeout: Duration) -> Self {
        Self {
            control,
            timeout,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Run every migration of the plan to a terminal state
    ///
    /// Individual failures are recorded in the report and never abort the
    /// other migrations.
    pub async fn enforce(&self, plan: &ReconfigurationPlan) -> EnforcementReport {
        let mut tasks = JoinSet::new();
        for migration in plan.iter().cloned() {
            let enforcer = self.clone();
            tasks.spawn(async move { enforcer.enforce_one(migration).await });
        }

        let mut report = EnforcementReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => report.results.push(result),
                Err(e) => warn!(error = %e, "Migration task aborted"),
            }
        }
        report
            .results
            .sort_by(|a, b| a.migration.vm_id.cmp(&b.migration.vm_id));

        info!(
            migrations = report.len(),
            migrated = report.migrated(),
            forced = report.forced(),
            failed = report.failed(),
            "Plan enforcement finished"
        );
        report
    }

    /// Deliver the completion of a running migration
    ///
    /// Returns false when the migration is unknown or its watchdog already
    /// forced convergence.
    pub fn signal_completion(&self, vm_id: &str, success: bool) -> bool {
        let Some((_, in_flight)) = self.in_flight.remove(vm_id) else {
            debug!(vm_id = %vm_id, "Completion for unknown migration ignored");
            return false;
        };
        if in_flight
            .terminated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(vm_id = %vm_id, "Completion arrived after watchdog fired");
            return false;
        }
        in_flight.completion.send(success).is_ok()
    }

    async fn enforce_one(&self, migration: Migration) -> MigrationResult {
        let outcome = self.run_migration(&migration).await;
        self.in_flight.remove(&migration.vm_id);
        debug!(vm_id = %migration.vm_id, outcome = %outcome, "Migration reached terminal state");
        MigrationResult { migration, outcome }
    }

    async fn run_migration(&self, migration: &Migration) -> MigrationOutcome {
        let Some(source) = migration.source.as_deref() else {
            return MigrationOutcome::Failed {
                reason: "virtual machine has no source host".to_string(),
            };
        };

        let (completion, mut receiver) = oneshot::channel();
        let terminated = Arc::new(AtomicBool::new(false));
        self.in_flight.insert(
            migration.vm_id.clone(),
            InFlight {
                terminated: terminated.clone(),
                completion,
            },
        );

        let deadline = Instant::now() + self.timeout;
        let started = tokio::select! {
            completed = &mut receiver => return completion_outcome(completed),
            started = self.control.migrate_virtual_machine(migration) => started,
            _ = tokio::time::sleep_until(deadline) => {
                return self.force_convergence(migration, source, &terminated, receiver).await;
            }
        };

        match started {
            Ok(MigrationStart::Completed) => {
                self.signal_completion(&migration.vm_id, true);
            }
            Ok(MigrationStart::Started) => {}
            Err(e) => {
                self.in_flight.remove(&migration.vm_id);
                return MigrationOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        }

        tokio::select! {
            completed = &mut receiver => completion_outcome(completed),
            _ = tokio::time::sleep_until(deadline) => {
                self.force_convergence(migration, source, &terminated, receiver).await
            }
        }
    }

    /// Deadline path, shared by a hung migrate call and a missing completion
    async fn force_convergence(
        &self,
        migration: &Migration,
        source: &str,
        terminated: &AtomicBool,
        receiver: oneshot::Receiver<bool>,
    ) -> MigrationOutcome {
        if terminated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Completion won the race; its value is on the way
            return completion_outcome(receiver.await);
        }

        self.in_flight.remove(&migration.vm_id);
        warn!(
            vm_id = %migration.vm_id,
            host_id = %source,
            timeout_secs = self.timeout.as_secs(),
            "Migration did not converge, suspending source"
        );
        match self
            .control
            .suspend_virtual_machine_on_migration(source, &migration.vm_id)
            .await
        {
            Ok(()) => MigrationOutcome::ForcedSuspend,
            Err(e) => MigrationOutcome::Failed {
                reason: format!("forced suspend failed: {}", e),
            },
        }
    }
}

fn completion_outcome(completed: Result<bool, oneshot::error::RecvError>) -> MigrationOutcome {
    match completed {
        Ok(true) => MigrationOutcome::Migrated,
        Ok(false) => MigrationOutcome::Failed {
            reason: "migration reported failure".to_string(),
        },
        Err(_) => MigrationOutcome::Failed {
            reason: "completion channel closed".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MigrationMode, ScriptedNodeControl};

    fn plan(vms: &[&str]) -> ReconfigurationPlan {
        let mut plan = ReconfigurationPlan::new();
        for vm in vms {
            plan.add(vm, Some("src".to_string()), "dst".to_string());
        }
        plan
    }

    #[tokio::test]
    async fn test_synchronous_completion() {
        let control = Arc::new(ScriptedNodeControl::new());
        let enforcer = MigrationPlanEnforcer::new(control.clone(), Duration::from_secs(5));

        let report = enforcer.enforce(&plan(&["v1", "v2"])).await;

        assert_eq!(report.migrated(), 2);
        assert_eq!(control.suspend_calls(), 0);
        assert_eq!(enforcer.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_signal_cancels_watchdog() {
        let control =
            Arc::new(ScriptedNodeControl::new().with_default_migration(MigrationMode::Pending));
        let enforcer = MigrationPlanEnforcer::new(control.clone(), Duration::from_secs(30));

        let task = {
            let enforcer = enforcer.clone();
            tokio::spawn(async move { enforcer.enforce(&plan(&["v1"])).await })
        };
        while enforcer.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(enforcer.signal_completion("v1", true));

        let report = task.await.unwrap();
        assert_eq!(report.outcome_of("v1"), Some(&MigrationOutcome::Migrated));
        assert_eq!(control.suspend_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_forces_suspend_on_timeout() {
        let control =
            Arc::new(ScriptedNodeControl::new().with_default_migration(MigrationMode::Pending));
        let enforcer = MigrationPlanEnforcer::new(control.clone(), Duration::from_secs(30));

        let report = enforcer.enforce(&plan(&["v1"])).await;

        assert_eq!(report.outcome_of("v1"), Some(&MigrationOutcome::ForcedSuspend));
        assert_eq!(control.suspend_calls(), 1);
        assert!(control.calls().contains(&"suspend:src:v1".to_string()));
        assert!(!enforcer.signal_completion("v1", true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_covers_hung_migrate_call() {
        let control =
            Arc::new(ScriptedNodeControl::new().with_default_migration(MigrationMode::Hang));
        let enforcer = MigrationPlanEnforcer::new(control.clone(), Duration::from_secs(30));

        let report = tokio::time::timeout(
            Duration::from_secs(3600),
            enforcer.enforce(&plan(&["v1"])),
        )
        .await
        .expect("enforcement must finish once the deadline passes");

        assert_eq!(report.outcome_of("v1"), Some(&MigrationOutcome::ForcedSuspend));
        assert!(control.calls().contains(&"suspend:src:v1".to_string()));
        assert_eq!(enforcer.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_during_hung_call_wins() {
        let control =
            Arc::new(ScriptedNodeControl::new().with_default_migration(MigrationMode::Hang));
        let enforcer = MigrationPlanEnforcer::new(control.clone(), Duration::from_secs(30));

        let task = {
            let enforcer = enforcer.clone();
            tokio::spawn(async move { enforcer.enforce(&plan(&["v1"])).await })
        };
        while enforcer.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(enforcer.signal_completion("v1", true));

        let report = task.await.unwrap();
        assert_eq!(report.outcome_of("v1"), Some(&MigrationOutcome::Migrated));
        assert_eq!(control.suspend_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_forced_suspend_is_reported() {
        let control =
            Arc::new(ScriptedNodeControl::new().with_default_migration(MigrationMode::Pending));
        control.fail_suspend();
        let enforcer = MigrationPlanEnforcer::new(control.clone(), Duration::from_secs(1));

        let report = enforcer.enforce(&plan(&["v1"])).await;
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_siblings() {
        let control = Arc::new(ScriptedNodeControl::new());
        control.set_migration("bad", MigrationMode::Reject);
        let enforcer = MigrationPlanEnforcer::new(control, Duration::from_secs(5));

        let report = enforcer.enforce(&plan(&["bad", "good"])).await;

        assert_eq!(report.len(), 2);
        assert_eq!(report.migrated(), 1);
        assert!(matches!(
            report.outcome_of("bad"),
            Some(MigrationOutcome::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_reported_failure_and_missing_source() {
        let control =
            Arc::new(ScriptedNodeControl::new().with_default_migration(MigrationMode::Pending));
        let enforcer = MigrationPlanEnforcer::new(control, Duration::from_secs(60));

        let mut unsourced = ReconfigurationPlan::new();
        unsourced.add("orphan", None, "dst".to_string());
        let report = enforcer.enforce(&unsourced).await;
        assert_eq!(report.failed(), 1);

        let task = {
            let enforcer = enforcer.clone();
            tokio::spawn(async move { enforcer.enforce(&plan(&["v1"])).await })
        };
        while enforcer.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(enforcer.signal_completion("v1", false));
        let report = task.await.unwrap();
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_completion_and_timeout_race_has_single_winner() {
        for round in 0..50 {
            let control =
                Arc::new(ScriptedNodeControl::new().with_default_migration(MigrationMode::Pending));
            let enforcer = MigrationPlanEnforcer::new(control.clone(), Duration::from_millis(2));
            let vm_id = format!("vm-{}", round);

            let task = {
                let enforcer = enforcer.clone();
                let vm_id = vm_id.clone();
                tokio::spawn(async move { enforcer.enforce(&plan(&[vm_id.as_str()])).await })
            };
            while enforcer.in_flight() == 0 && !task.is_finished() {
                tokio::task::yield_now().await;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
            let signaled = enforcer.signal_completion(&vm_id, true);

            let report = task.await.unwrap();
            match report.outcome_of(&vm_id) {
                Some(MigrationOutcome::Migrated) => {
                    assert!(signaled);
                    assert_eq!(control.suspend_calls(), 0);
                }
                Some(MigrationOutcome::ForcedSuspend) => {
                    assert!(!signaled);
                    assert_eq!(control.suspend_calls(), 1);
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }
}
