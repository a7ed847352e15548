//! Placement of newly submitted VMs

use super::first_fitting_host;
use crate::estimator::ResourceDemandEstimator;
use crate::models::{Assignment, LocalControllerDescription, PlacementPlan, VirtualMachineMetaData};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default placement policy name
pub const DEFAULT_PLACEMENT_POLICY: &str = "FirstFit";

/// Trait for VM placement algorithms
///
/// Hosts are updated in place as VMs are assigned so later VMs of the same
/// batch see the occupancy left by earlier ones. VMs that fit nowhere are
/// returned as unassigned; that is not an error.
pub trait PlacementPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn place(
        &self,
        vms: Vec<VirtualMachineMetaData>,
        hosts: &mut [LocalControllerDescription],
    ) -> PlacementPlan;
}

/// Resolve a placement policy by configuration name
pub fn placement_policy_from_name(
    name: &str,
    estimator: Arc<dyn ResourceDemandEstimator>,
) -> Arc<dyn PlacementPolicy> {
    match name.to_ascii_lowercase().as_str() {
        "firstfit" | "first_fit" => Arc::new(FirstFit::new(estimator)),
        "roundrobin" | "round_robin" => Arc::new(RoundRobin::new(estimator)),
        _ => {
            warn!(
                policy = %name,
                fallback = DEFAULT_PLACEMENT_POLICY,
                "Unknown placement policy, using default"
            );
            Arc::new(FirstFit::new(estimator))
        }
    }
}

/// Assigns every VM to the first host, in host order, with enough capacity
pub struct FirstFit {
    estimator: Arc<dyn ResourceDemandEstimator>,
}

impl FirstFit {
    pub fn new(estimator: Arc<dyn ResourceDemandEstimator>) -> Self {
        Self { estimator }
    }
}

impl PlacementPolicy for FirstFit {
    fn name(&self) -> &str {
        "FirstFit"
    }

    fn place(
        &self,
        vms: Vec<VirtualMachineMetaData>,
        hosts: &mut [LocalControllerDescription],
    ) -> PlacementPlan {
        let mut plan = PlacementPlan::default();

        for vm in vms {
            match first_fitting_host(self.estimator.as_ref(), &vm, hosts, None) {
                Some(index) => {
                    let host = &mut hosts[index];
                    debug!(vm_id = %vm.id, host_id = %host.id, "FirstFit assigned VM");
                    host.assign_virtual_machine(vm.clone());
                    plan.assignments.push(Assignment::new(vm, host.id.clone()));
                }
                None => {
                    debug!(vm_id = %vm.id, "FirstFit found no host with enough capacity");
                    plan.unassigned.push(vm);
                }
            }
        }

        plan
    }
}

/// Cycles through hosts, one VM per viable host per pass
///
/// The cursor survives across batches so consecutive submissions keep
/// spreading from where the previous one stopped.
pub struct RoundRobin {
    estimator: Arc<dyn ResourceDemandEstimator>,
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new(estimator: Arc<dyn ResourceDemandEstimator>) -> Self {
        Self {
            estimator,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl PlacementPolicy for RoundRobin {
    fn name(&self) -> &str {
        "RoundRobin"
    }

    fn place(
        &self,
        vms: Vec<VirtualMachineMetaData>,
        hosts: &mut [LocalControllerDescription],
    ) -> PlacementPlan {
        let mut plan = PlacementPlan::default();
        if hosts.is_empty() {
            plan.unassigned = vms;
            return plan;
        }

        let host_count = hosts.len();
        let mut cursor = self.cursor.load(Ordering::Relaxed) % host_count;

        for vm in vms {
            let chosen = (0..host_count)
                .map(|offset| (cursor + offset) % host_count)
                .find(|&index| self.estimator.has_enough_capacity(&vm, &hosts[index]));

            match chosen {
                Some(index) => {
                    let host = &mut hosts[index];
                    debug!(vm_id = %vm.id, host_id = %host.id, "RoundRobin assigned VM");
                    host.assign_virtual_machine(vm.clone());
                    plan.assignments.push(Assignment::new(vm, host.id.clone()));
                    cursor = (index + 1) % host_count;
                }
                None => {
                    debug!(vm_id = %vm.id, "RoundRobin found no host with enough capacity");
                    plan.unassigned.push(vm);
                }
            }
        }

        self.cursor.store(cursor, Ordering::Relaxed);
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::estimator_from_name;
    use crate::models::ResourceVector;

    fn estimator() -> Arc<dyn ResourceDemandEstimator> {
        estimator_from_name("average", 10, 10)
    }

    fn host(id: &str, capacity: [f64; 4]) -> LocalControllerDescription {
        LocalControllerDescription::new(id, ResourceVector::from(capacity), 10)
    }

    fn vm(id: &str, requested: [f64; 4]) -> VirtualMachineMetaData {
        VirtualMachineMetaData::new(id, ResourceVector::from(requested), 10)
    }

    fn assert_capacity_respected(hosts: &[LocalControllerDescription]) {
        for host in hosts {
            assert!(host.requested_capacity().fits_within(&host.total_capacity));
        }
    }

    #[test]
    fn test_first_fit_example_second_vm_unassigned() {
        let policy = FirstFit::new(estimator());
        let mut hosts = vec![host("h1", [8.0, 16384.0, 1000.0, 1000.0])];

        let plan = policy.place(
            vec![
                vm("vm1", [4.0, 8192.0, 200.0, 200.0]),
                vm("vm2", [6.0, 10000.0, 200.0, 200.0]),
            ],
            &mut hosts,
        );

        assert_eq!(plan.host_of("vm1").map(String::as_str), Some("h1"));
        assert_eq!(plan.assignments[0].vm.host_id.as_deref(), Some("h1"));
        assert_eq!(plan.unassigned.len(), 1);
        assert!(plan.unassigned[0].host_id.is_none());
        assert_eq!(plan.unassigned[0].id, "vm2");
        assert_capacity_respected(&hosts);
    }

    #[test]
    fn test_first_fit_uses_host_order() {
        let policy = FirstFit::new(estimator());
        let mut hosts = vec![
            host("h1", [2.0, 2.0, 2.0, 2.0]),
            host("h2", [8.0, 8.0, 8.0, 8.0]),
        ];

        let plan = policy.place(
            vec![vm("a", [2.0, 2.0, 1.0, 1.0]), vm("b", [1.0, 1.0, 1.0, 1.0])],
            &mut hosts,
        );

        assert_eq!(plan.host_of("a").map(String::as_str), Some("h1"));
        // h1 is full after "a"
        assert_eq!(plan.host_of("b").map(String::as_str), Some("h2"));
        assert_capacity_respected(&hosts);
    }

    #[test]
    fn test_round_robin_spreads_one_per_host() {
        let policy = RoundRobin::new(estimator());
        let mut hosts = vec![
            host("h1", [8.0, 8.0, 8.0, 8.0]),
            host("h2", [8.0, 8.0, 8.0, 8.0]),
            host("h3", [8.0, 8.0, 8.0, 8.0]),
        ];

        let vms = (0..4).map(|i| vm(&format!("vm{}", i), [1.0, 1.0, 1.0, 1.0])).collect();
        let plan = policy.place(vms, &mut hosts);

        let placed: Vec<_> = plan.assignments.iter().map(|a| a.host_id.as_str()).collect();
        assert_eq!(placed, vec!["h1", "h2", "h3", "h1"]);
        assert!(plan
            .assignments
            .iter()
            .all(|a| a.vm.host_id.as_ref() == Some(&a.host_id)));
    }

    #[test]
    fn test_round_robin_skips_full_hosts_and_persists_cursor() {
        let policy = RoundRobin::new(estimator());
        let mut hosts = vec![
            host("h1", [8.0, 8.0, 8.0, 8.0]),
            host("small", [0.5, 0.5, 0.5, 0.5]),
            host("h3", [8.0, 8.0, 8.0, 8.0]),
        ];

        let plan = policy.place(vec![vm("a", [1.0, 1.0, 1.0, 1.0])], &mut hosts);
        assert_eq!(plan.host_of("a").map(String::as_str), Some("h1"));

        let plan = policy.place(vec![vm("b", [1.0, 1.0, 1.0, 1.0])], &mut hosts);
        assert_eq!(plan.host_of("b").map(String::as_str), Some("h3"));
    }

    #[test]
    fn test_empty_inputs_yield_empty_plans() {
        for policy in [
            placement_policy_from_name("FirstFit", estimator()),
            placement_policy_from_name("RoundRobin", estimator()),
        ] {
            let plan = policy.place(vec![], &mut []);
            assert!(plan.assignments.is_empty());
            assert!(plan.unassigned.is_empty());

            let plan = policy.place(vec![vm("x", [1.0, 1.0, 1.0, 1.0])], &mut []);
            assert!(plan.assignments.is_empty());
            assert_eq!(plan.unassigned.len(), 1);
        }
    }

    #[test]
    fn test_unknown_policy_falls_back_to_first_fit() {
        let policy = placement_policy_from_name("BestFitDeluxe", estimator());
        assert_eq!(policy.name(), "FirstFit");
    }
}
