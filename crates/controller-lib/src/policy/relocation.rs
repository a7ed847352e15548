//! Relocation away from anomalous hosts
//!
//! Greedy, non-backtracking heuristics: candidates are picked from the
//! anomalous host, then each one goes to the first destination with enough
//! capacity. A VM with no destination is dropped from the plan.

use crate::models::{
    LocalControllerDescription, LocalControllerState, ReconfigurationPlan, VirtualMachineMetaData,
};
use crate::ranking::{Ranking, SortOrder};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default relocation policy for overloaded hosts
pub const DEFAULT_OVERLOAD_POLICY: &str = "GreedyOverload";

/// Default relocation policy for underloaded hosts
pub const DEFAULT_UNDERLOAD_POLICY: &str = "GreedyUnderload";

/// Trait for relocation algorithms
pub trait RelocationPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Whether PASSIVE hosts may be chosen as destinations
    fn includes_passive_destinations(&self) -> bool;

    /// Compute moves away from `source`; destinations are updated in place
    ///
    /// The returned plan may be empty when nothing could be moved.
    fn relocate(
        &self,
        source: &LocalControllerDescription,
        destinations: &mut [LocalControllerDescription],
    ) -> ReconfigurationPlan;
}

/// The relocation policy configured for each anomaly kind
#[derive(Clone)]
pub struct RelocationPolicies {
    pub overload: Arc<dyn RelocationPolicy>,
    pub underload: Arc<dyn RelocationPolicy>,
}

impl RelocationPolicies {
    pub fn new(overload: Arc<dyn RelocationPolicy>, underload: Arc<dyn RelocationPolicy>) -> Self {
        Self {
            overload,
            underload,
        }
    }

    /// Policy for an anomaly; `None` for a stable host
    pub fn for_state(&self, state: LocalControllerState) -> Option<&Arc<dyn RelocationPolicy>> {
        match state {
            LocalControllerState::Overloaded => Some(&self.overload),
            LocalControllerState::Underloaded => Some(&self.underload),
            LocalControllerState::Stable => None,
        }
    }
}

/// Resolve the overload relocation policy by configuration name
pub fn overload_policy_from_name(name: &str, ranking: Ranking) -> Arc<dyn RelocationPolicy> {
    match name.to_ascii_lowercase().as_str() {
        "greedyoverload" | "greedy_overload" | "greedy" => Arc::new(GreedyOverload::new(ranking)),
        "dummyoverload" | "dummy_overload" | "dummy" => Arc::new(GreedyOverload::dummy(ranking)),
        _ => {
            warn!(
                policy = %name,
                fallback = DEFAULT_OVERLOAD_POLICY,
                "Unknown overload relocation policy, using default"
            );
            Arc::new(GreedyOverload::new(ranking))
        }
    }
}

/// Resolve the underload relocation policy by configuration name
pub fn underload_policy_from_name(name: &str, ranking: Ranking) -> Arc<dyn RelocationPolicy> {
    match name.to_ascii_lowercase().as_str() {
        "greedyunderload" | "greedy_underload" | "greedy" => {
            Arc::new(GreedyUnderload::new(ranking))
        }
        _ => {
            warn!(
                policy = %name,
                fallback = DEFAULT_UNDERLOAD_POLICY,
                "Unknown underload relocation policy, using default"
            );
            Arc::new(GreedyUnderload::new(ranking))
        }
    }
}

/// Moves the largest VMs off an overloaded host
///
/// Candidates are taken in decreasing demand until the projected remaining
/// utilization is back under the host's max thresholds. The single-candidate
/// ("dummy") variant moves exactly the largest VM. Destinations are tried
/// least loaded first and may include PASSIVE hosts.
pub struct GreedyOverload {
    ranking: Ranking,
    single_candidate: bool,
}

impl GreedyOverload {
    pub fn new(ranking: Ranking) -> Self {
        Self {
            ranking,
            single_candidate: false,
        }
    }

    pub fn dummy(ranking: Ranking) -> Self {
        Self {
            ranking,
            single_candidate: true,
        }
    }

    fn select_candidates(&self, source: &LocalControllerDescription) -> Vec<VirtualMachineMetaData> {
        let mut vms: Vec<_> = source.virtual_machines.values().cloned().collect();
        self.ranking.sort_vms(&mut vms, SortOrder::Decreasing);

        if self.single_candidate {
            vms.truncate(1);
            return vms;
        }

        let estimator = self.ranking.estimator();
        let max = source.thresholds.max_vector();
        let mut remaining = estimator.estimate_host_utilization(source);
        let mut candidates = Vec::new();

        for vm in vms {
            if remaining.divide(&source.total_capacity).fits_within(&max) {
                break;
            }
            remaining = remaining.saturating_sub(&estimator.estimate_vm_demand(&vm));
            candidates.push(vm);
        }

        candidates
    }
}

impl RelocationPolicy for GreedyOverload {
    fn name(&self) -> &str {
        if self.single_candidate {
            "DummyOverload"
        } else {
            "GreedyOverload"
        }
    }

    fn includes_passive_destinations(&self) -> bool {
        true
    }

    fn relocate(
        &self,
        source: &LocalControllerDescription,
        destinations: &mut [LocalControllerDescription],
    ) -> ReconfigurationPlan {
        let candidates = self.select_candidates(source);
        debug!(
            host_id = %source.id,
            candidates = candidates.len(),
            "Selected overload relocation candidates"
        );
        assign_to_destinations(
            &self.ranking,
            candidates,
            source,
            destinations,
            SortOrder::Increasing,
            true,
        )
    }
}

/// Evacuates every VM of an underloaded host so it can be powered down
///
/// Destinations are tried most loaded first and never include PASSIVE hosts.
pub struct GreedyUnderload {
    ranking: Ranking,
}

impl GreedyUnderload {
    pub fn new(ranking: Ranking) -> Self {
        Self { ranking }
    }
}

impl RelocationPolicy for GreedyUnderload {
    fn name(&self) -> &str {
        "GreedyUnderload"
    }

    fn includes_passive_destinations(&self) -> bool {
        false
    }

    fn relocate(
        &self,
        source: &LocalControllerDescription,
        destinations: &mut [LocalControllerDescription],
    ) -> ReconfigurationPlan {
        let mut candidates: Vec<_> = source.virtual_machines.values().cloned().collect();
        self.ranking.sort_vms(&mut candidates, SortOrder::Decreasing);

        let mut plan = assign_to_destinations(
            &self.ranking,
            candidates,
            source,
            destinations,
            SortOrder::Decreasing,
            false,
        );
        if !plan.is_empty() && plan.len() == source.virtual_machines.len() {
            plan.hosts_released = 1;
        }
        plan
    }
}

fn assign_to_destinations(
    ranking: &Ranking,
    candidates: Vec<VirtualMachineMetaData>,
    source: &LocalControllerDescription,
    destinations: &mut [LocalControllerDescription],
    order: SortOrder,
    include_passive: bool,
) -> ReconfigurationPlan {
    let mut plan = ReconfigurationPlan::new();
    if candidates.is_empty() || destinations.is_empty() {
        return plan;
    }

    ranking.sort_hosts(destinations, order);
    let estimator = ranking.estimator();

    for vm in candidates {
        let target = destinations.iter().position(|host| {
            host.id != source.id
                && (include_passive || !host.is_passive())
                && estimator.has_enough_capacity(&vm, host)
        });

        match target {
            Some(index) => {
                let destination = &mut destinations[index];
                plan.add(&vm.id, Some(source.id.clone()), destination.id.clone());
                destination.assign_virtual_machine(vm);
            }
            None => {
                debug!(
                    vm_id = %vm.id,
                    host_id = %source.id,
                    "No destination with enough capacity, dropping VM from plan"
                );
            }
        }
    }

    plan.hosts_used = plan.destinations().len();
    plan
}
