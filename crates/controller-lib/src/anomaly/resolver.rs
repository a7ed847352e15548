//! Cluster-level anomaly resolution
//!
//! Phases run Idle → ReadyToResolve → Resolving → Enforcing → Resolved and
//! back to Idle. Any failure returns straight to Idle so the next detection
//! cycle can try again.

use crate::enforcement::{EnforcementReport, MigrationPlanEnforcer};
use crate::error::ResolutionError;
use crate::models::{HostId, LocalControllerState, ReconfigurationPlan};
use crate::policy::RelocationPolicies;
use crate::power::WakeupCoordinator;
use crate::repository::GroupManagerRepository;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverPhase {
    Idle,
    ReadyToResolve,
    Resolving,
    Enforcing,
    Resolved,
}

impl fmt::Display for ResolverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResolverPhase::Idle => "idle",
            ResolverPhase::ReadyToResolve => "ready_to_resolve",
            ResolverPhase::Resolving => "resolving",
            ResolverPhase::Enforcing => "enforcing",
            ResolverPhase::Resolved => "resolved",
        };
        write!(f, "{}", s)
    }
}

/// What a successful resolution did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub host_id: HostId,
    pub state: LocalControllerState,
    pub plan: ReconfigurationPlan,
    /// PASSIVE destinations woken before enforcement
    pub woken: Vec<HostId>,
    pub enforcement: EnforcementReport,
}

pub struct AnomalyResolver {
    repository: Arc<dyn GroupManagerRepository>,
    policies: RelocationPolicies,
    wakeup: WakeupCoordinator,
    enforcer: MigrationPlanEnforcer,
    history_entries: usize,
    phase: watch::Sender<ResolverPhase>,
}

impl AnomalyResolver {
    pub fn new(
        repository: Arc<dyn GroupManagerRepository>,
        policies: RelocationPolicies,
        wakeup: WakeupCoordinator,
        enforcer: MigrationPlanEnforcer,
        history_entries: usize,
    ) -> Self {
        let (phase, _) = watch::channel(ResolverPhase::Idle);
        Self {
            repository,
            policies,
            wakeup,
            enforcer,
            history_entries,
            phase,
        }
    }

    pub fn phase(&self) -> ResolverPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResolverPhase> {
        self.phase.subscribe()
    }

    /// Return to Idle after the caller has committed a resolved plan
    pub fn finish(&self) {
        self.phase.send_replace(ResolverPhase::Idle);
    }

    /// Relocate VMs away from an anomalous host and enforce the plan
    ///
    /// On success the resolver stays in Resolved until [`finish`](Self::finish).
    pub async fn resolve(
        &self,
        host_id: &str,
        state: LocalControllerState,
    ) -> Result<ResolutionReport, ResolutionError> {
        self.phase.send_replace(ResolverPhase::ReadyToResolve);
        let result = self.run(host_id, state).await;
        let next = if result.is_ok() {
            ResolverPhase::Resolved
        } else {
            ResolverPhase::Idle
        };
        self.phase.send_replace(next);
        result
    }

    async fn run(
        &self,
        host_id: &str,
        state: LocalControllerState,
    ) -> Result<ResolutionReport, ResolutionError> {
        let policy = self
            .policies
            .for_state(state)
            .ok_or_else(|| ResolutionError::HostStable {
                host_id: host_id.to_string(),
                state,
            })?;

        let source = self
            .repository
            .get_host_description(host_id, self.history_entries)
            .await?
            .ok_or_else(|| ResolutionError::HostUnknown(host_id.to_string()))?;

        self.phase.send_replace(ResolverPhase::Resolving);
        let mut destinations: Vec<_> = self
            .repository
            .get_host_descriptions(
                self.history_entries,
                !policy.includes_passive_destinations(),
                true,
            )
            .await?
            .into_iter()
            .filter(|h| h.id != source.id)
            .collect();
        if destinations.is_empty() {
            return Err(ResolutionError::NoDestinationCandidates(host_id.to_string()));
        }

        let passive: BTreeSet<HostId> = destinations
            .iter()
            .filter(|h| h.is_passive())
            .map(|h| h.id.clone())
            .collect();

        let plan = policy.relocate(&source, &mut destinations);
        if plan.is_empty() {
            return Err(ResolutionError::EmptyPlan(host_id.to_string()));
        }
        debug!(
            host_id = %host_id,
            policy = policy.name(),
            migrations = plan.len(),
            "Relocation plan computed"
        );

        let woken: Vec<HostId> = plan.destinations().intersection(&passive).cloned().collect();
        if !woken.is_empty() {
            info!(host_id = %host_id, hosts = ?woken, "Waking passive destinations");
            self.wakeup
                .wake(&woken)
                .await
                .map_err(ResolutionError::WakeupFailed)?;
        }

        self.phase.send_replace(ResolverPhase::Enforcing);
        let enforcement = self.enforcer.enforce(&plan).await;

        Ok(ResolutionReport {
            host_id: host_id.to_string(),
            state,
            plan,
            woken,
            enforcement,
        })
    }
}
