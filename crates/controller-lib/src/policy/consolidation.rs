//! Cluster-wide consolidation
//!
//! Sercon repeatedly tries to empty the least loaded host by moving its VMs
//! onto the others, most loaded first. Hosts it empties can be powered down.

use super::first_fitting_host;
use crate::models::{HostId, LocalControllerDescription, ReconfigurationPlan, VmId};
use crate::ranking::{Ranking, SortOrder};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default consolidation policy name
pub const DEFAULT_RECONFIGURATION_POLICY: &str = "Sercon";

/// Trait for whole-cluster re-packing algorithms
pub trait ReconfigurationPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Compute a plan over a snapshot of every host
    ///
    /// Never fails: a run that releases nothing returns a possibly empty plan.
    fn reconfigure(&self, hosts: Vec<LocalControllerDescription>) -> ReconfigurationPlan;
}

/// Resolve a consolidation policy by configuration name
pub fn reconfiguration_policy_from_name(name: &str, ranking: Ranking) -> Arc<dyn ReconfigurationPolicy> {
    match name.to_ascii_lowercase().as_str() {
        "sercon" => Arc::new(Sercon::new(ranking)),
        _ => {
            warn!(
                policy = %name,
                fallback = DEFAULT_RECONFIGURATION_POLICY,
                "Unknown reconfiguration policy, using default"
            );
            Arc::new(Sercon::new(ranking))
        }
    }
}

/// Serial consolidation heuristic
///
/// PASSIVE hosts take no part. A host whose VMs cannot all be re-homed keeps
/// them, stays available as a destination and is not tried again as a source.
pub struct Sercon {
    ranking: Ranking,
}

impl Sercon {
    pub fn new(ranking: Ranking) -> Self {
        Self { ranking }
    }
}

impl ReconfigurationPolicy for Sercon {
    fn name(&self) -> &str {
        "Sercon"
    }

    fn reconfigure(&self, hosts: Vec<LocalControllerDescription>) -> ReconfigurationPlan {
        let mut hosts: Vec<_> = hosts.into_iter().filter(|h| !h.is_passive()).collect();
        let mut plan = ReconfigurationPlan::new();
        let mut tried: BTreeSet<HostId> = BTreeSet::new();
        let estimator = self.ranking.estimator().clone();
        let budget = hosts.len();

        for _ in 0..budget {
            self.ranking.sort_hosts(&mut hosts, SortOrder::Decreasing);

            let Some(source_index) = hosts
                .iter()
                .rposition(|h| !tried.contains(&h.id) && h.has_virtual_machines())
            else {
                break;
            };

            let source_id = hosts[source_index].id.clone();
            tried.insert(source_id.clone());

            let mut vms: Vec<_> = hosts[source_index].virtual_machines.values().cloned().collect();
            self.ranking.sort_vms(&mut vms, SortOrder::Decreasing);

            let mut tentative: Vec<(VmId, usize)> = Vec::with_capacity(vms.len());
            for vm in &vms {
                match first_fitting_host(estimator.as_ref(), vm, &hosts, Some(&source_id)) {
                    Some(index) => {
                        hosts[index].assign_virtual_machine(vm.clone());
                        tentative.push((vm.id.clone(), index));
                    }
                    None => break,
                }
            }

            if tentative.len() == vms.len() {
                for (vm_id, index) in &tentative {
                    plan.add(vm_id, Some(source_id.clone()), hosts[*index].id.clone());
                }
                hosts.remove(source_index);
                plan.hosts_released += 1;
                debug!(host_id = %source_id, moved = tentative.len(), "Sercon released host");
            } else {
                for (vm_id, index) in &tentative {
                    hosts[*index].remove_virtual_machine(vm_id);
                }
                debug!(
                    host_id = %source_id,
                    placed = tentative.len(),
                    total = vms.len(),
                    "Sercon could not empty host, rolled back"
                );
            }
        }

        plan.hosts_used = hosts.iter().filter(|h| h.has_virtual_machines()).count();
        info!(
            migrations = plan.len(),
            hosts_used = plan.hosts_used,
            hosts_released = plan.hosts_released,
            "Sercon consolidation computed"
        );
        plan
    }
}
