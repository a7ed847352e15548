//! Norm-based ranking of VMs and hosts
//!
//! Policies sort candidates by the norm of their estimated demand. The norm
//! is a deployment-wide setting; the direction is chosen per call.

use crate::estimator::ResourceDemandEstimator;
use crate::models::{HostStatus, LocalControllerDescription, ResourceVector, VirtualMachineMetaData};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Norm used to collapse a resource vector into a scalar load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortNorm {
    /// Sum of absolute components
    #[default]
    L1,
    /// Euclidean length
    Euclid,
    /// Largest component
    Max,
}

impl SortNorm {
    pub fn apply(&self, vector: &ResourceVector) -> f64 {
        match self {
            SortNorm::L1 => vector.iter().map(f64::abs).sum(),
            SortNorm::Euclid => vector.iter().map(|v| v * v).sum::<f64>().sqrt(),
            SortNorm::Max => vector.iter().map(f64::abs).fold(0.0, f64::max),
        }
    }

    /// Parse a configuration name, logging and defaulting to L1 when unknown
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "l1" => SortNorm::L1,
            "euclid" | "euclidean" | "l2" => SortNorm::Euclid,
            "max" | "linf" => SortNorm::Max,
            other => {
                tracing::warn!(norm = %other, "Unknown sort norm, using L1");
                SortNorm::L1
            }
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Increasing,
    Decreasing,
}

/// Comparator over VMs and hosts parameterized by norm and estimator
#[derive(Clone)]
pub struct Ranking {
    norm: SortNorm,
    estimator: Arc<dyn ResourceDemandEstimator>,
}

impl Ranking {
    pub fn new(norm: SortNorm, estimator: Arc<dyn ResourceDemandEstimator>) -> Self {
        Self { norm, estimator }
    }

    pub fn norm(&self) -> SortNorm {
        self.norm
    }

    pub fn estimator(&self) -> &Arc<dyn ResourceDemandEstimator> {
        &self.estimator
    }

    pub fn vm_load(&self, vm: &VirtualMachineMetaData) -> f64 {
        self.norm.apply(&self.estimator.estimate_vm_demand(vm))
    }

    pub fn host_load(&self, host: &LocalControllerDescription) -> f64 {
        self.norm.apply(&self.estimator.estimate_host_utilization(host))
    }

    pub fn compare_vms(
        &self,
        a: &VirtualMachineMetaData,
        b: &VirtualMachineMetaData,
        order: SortOrder,
    ) -> Ordering {
        directed(self.vm_load(a).total_cmp(&self.vm_load(b)), order)
    }

    /// Hosts with equal load keep ACTIVE ahead of PASSIVE in either direction
    pub fn compare_hosts(
        &self,
        a: &LocalControllerDescription,
        b: &LocalControllerDescription,
        order: SortOrder,
    ) -> Ordering {
        directed(self.host_load(a).total_cmp(&self.host_load(b)), order)
            .then_with(|| status_rank(a.status).cmp(&status_rank(b.status)))
    }

    pub fn sort_vms(&self, vms: &mut [VirtualMachineMetaData], order: SortOrder) {
        let mut keyed: Vec<(f64, VirtualMachineMetaData)> =
            vms.iter().map(|vm| (self.vm_load(vm), vm.clone())).collect();
        keyed.sort_by(|(la, _), (lb, _)| directed(la.total_cmp(lb), order));
        for (slot, (_, vm)) in vms.iter_mut().zip(keyed) {
            *slot = vm;
        }
    }

    pub fn sort_hosts(&self, hosts: &mut [LocalControllerDescription], order: SortOrder) {
        let mut keyed: Vec<(f64, LocalControllerDescription)> = hosts
            .iter()
            .map(|host| (self.host_load(host), host.clone()))
            .collect();
        keyed.sort_by(|(la, a), (lb, b)| {
            directed(la.total_cmp(lb), order)
                .then_with(|| status_rank(a.status).cmp(&status_rank(b.status)))
        });
        for (slot, (_, host)) in hosts.iter_mut().zip(keyed) {
            *slot = host;
        }
    }
}

fn directed(ordering: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Increasing => ordering,
        SortOrder::Decreasing => ordering.reverse(),
    }
}

fn status_rank(status: HostStatus) -> u8 {
    match status {
        HostStatus::Active => 0,
        HostStatus::WokenUp => 1,
        HostStatus::Passive => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::estimator_from_name;
    use crate::models::MonitoringSample;

    fn ranking(norm: SortNorm) -> Ranking {
        Ranking::new(norm, estimator_from_name("average", 10, 10))
    }

    fn vm(id: &str, usage: [f64; 4]) -> VirtualMachineMetaData {
        let mut vm = VirtualMachineMetaData::new(id, ResourceVector::from(usage), 10);
        vm.history
            .push(MonitoringSample::new(0, ResourceVector::from(usage)));
        vm
    }

    fn host(id: &str, status: HostStatus, vms: Vec<VirtualMachineMetaData>) -> LocalControllerDescription {
        let mut host = LocalControllerDescription::new(id, ResourceVector::new(100.0, 100.0, 100.0, 100.0), 10);
        host.status = status;
        for vm in vms {
            host.assign_virtual_machine(vm);
        }
        host
    }

    #[test]
    fn test_norms() {
        let v = ResourceVector::new(3.0, 4.0, 0.0, 0.0);
        assert_eq!(SortNorm::L1.apply(&v), 7.0);
        assert_eq!(SortNorm::Euclid.apply(&v), 5.0);
        assert_eq!(SortNorm::Max.apply(&v), 4.0);
    }

    #[test]
    fn test_unknown_norm_defaults_to_l1() {
        assert_eq!(SortNorm::from_name("manhattan-ish"), SortNorm::L1);
        assert_eq!(SortNorm::from_name("Euclid"), SortNorm::Euclid);
    }

    #[test]
    fn test_sort_vms_decreasing() {
        let ranking = ranking(SortNorm::L1);
        let mut vms = vec![
            vm("small", [1.0, 1.0, 0.0, 0.0]),
            vm("large", [5.0, 5.0, 0.0, 0.0]),
            vm("medium", [2.0, 2.0, 0.0, 0.0]),
        ];

        ranking.sort_vms(&mut vms, SortOrder::Decreasing);
        let ids: Vec<_> = vms.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["large", "medium", "small"]);

        ranking.sort_vms(&mut vms, SortOrder::Increasing);
        let ids: Vec<_> = vms.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["small", "medium", "large"]);
    }

    #[test]
    fn test_norm_changes_order() {
        let a = vm("a", [3.0, 3.0, 3.0, 0.0]);
        let b = vm("b", [5.0, 0.0, 0.0, 0.0]);

        assert_eq!(
            ranking(SortNorm::L1).compare_vms(&a, &b, SortOrder::Increasing),
            Ordering::Greater
        );
        assert_eq!(
            ranking(SortNorm::Max).compare_vms(&a, &b, SortOrder::Increasing),
            Ordering::Less
        );
    }

    #[test]
    fn test_equal_hosts_prefer_active_in_both_directions() {
        let ranking = ranking(SortNorm::L1);
        let passive = host("p", HostStatus::Passive, vec![]);
        let active = host("a", HostStatus::Active, vec![]);

        for order in [SortOrder::Increasing, SortOrder::Decreasing] {
            let mut hosts = vec![passive.clone(), active.clone()];
            ranking.sort_hosts(&mut hosts, order);
            assert_eq!(hosts[0].id, "a");
            assert_eq!(ranking.compare_hosts(&active, &passive, order), Ordering::Less);
        }
    }

    #[test]
    fn test_hosts_sorted_by_load_before_status() {
        let ranking = ranking(SortNorm::L1);
        let busy_active = host("busy", HostStatus::Active, vec![vm("v", [10.0, 0.0, 0.0, 0.0])]);
        let idle_passive = host("idle", HostStatus::Passive, vec![]);

        let mut hosts = vec![busy_active, idle_passive];
        ranking.sort_hosts(&mut hosts, SortOrder::Increasing);
        assert_eq!(hosts[0].id, "idle");
    }

    #[test]
    fn test_identical_vms_compare_equal() {
        let ranking = ranking(SortNorm::Euclid);
        let a = vm("a", [1.0, 2.0, 3.0, 4.0]);
        let b = vm("b", [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(ranking.compare_vms(&a, &b, SortOrder::Decreasing), Ordering::Equal);
    }
}
