//! Resource demand estimation
//!
//! Turns bounded monitoring histories into demand vectors that every policy
//! can compare, and answers capacity-sufficiency questions.

mod windowed;

pub use windowed::{Aggregation, WindowedEstimator};

use crate::models::{LocalControllerDescription, Resource, ResourceVector, VirtualMachineMetaData};
use std::sync::Arc;

/// Default estimator name
pub const DEFAULT_ESTIMATOR: &str = "average";

/// Trait for demand estimator implementations
pub trait ResourceDemandEstimator: Send + Sync {
    /// Registry name of this estimator
    fn name(&self) -> &str;

    /// Number of most recent samples considered
    fn window_size(&self) -> usize;

    /// Estimated demand of a VM, each component aggregated independently
    fn estimate_vm_demand(&self, vm: &VirtualMachineMetaData) -> ResourceVector;

    /// Estimated usage of one resource by the host itself
    fn estimate_host_resource(&self, host: &LocalControllerDescription, resource: Resource) -> f64;

    /// Host overhead vector built from the per-resource scalar estimates
    fn estimate_host_overhead(&self, host: &LocalControllerDescription) -> ResourceVector {
        let mut overhead = ResourceVector::zero();
        for resource in Resource::ALL {
            overhead.set(resource, self.estimate_host_resource(host, resource));
        }
        overhead
    }

    /// Sum of VM demand estimates plus the host's own overhead
    fn estimate_host_utilization(&self, host: &LocalControllerDescription) -> ResourceVector {
        let vm_demand: ResourceVector = host
            .virtual_machines
            .values()
            .map(|vm| self.estimate_vm_demand(vm))
            .sum();
        vm_demand + self.estimate_host_overhead(host)
    }

    /// Host utilization as fractions of its total capacity
    fn normalized_host_utilization(&self, host: &LocalControllerDescription) -> ResourceVector {
        self.estimate_host_utilization(host)
            .divide(&host.total_capacity)
    }

    /// True iff `host.used + vm.requested <= host.total` on every dimension
    fn has_enough_capacity(
        &self,
        vm: &VirtualMachineMetaData,
        host: &LocalControllerDescription,
    ) -> bool {
        (host.requested_capacity() + vm.requested).fits_within(&host.total_capacity)
    }
}

/// Resolve an estimator by configuration name
///
/// Unknown names are logged and replaced by the average estimator.
pub fn estimator_from_name(
    name: &str,
    window_size: usize,
    history_capacity: usize,
) -> Arc<dyn ResourceDemandEstimator> {
    let aggregation = match name.to_ascii_lowercase().as_str() {
        "average" | "mean" => Aggregation::Average,
        "max" | "maximum" => Aggregation::Maximum,
        other => {
            tracing::warn!(
                estimator = %other,
                fallback = DEFAULT_ESTIMATOR,
                "Unknown estimator, using default"
            );
            Aggregation::Average
        }
    };

    Arc::new(WindowedEstimator::new(
        aggregation,
        window_size,
        history_capacity,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MonitoringSample;

    fn host_with_vm(vm_requested: ResourceVector) -> LocalControllerDescription {
        let mut host = LocalControllerDescription::new(
            "h1",
            ResourceVector::new(8.0, 16384.0, 1000.0, 1000.0),
            10,
        );
        host.assign_virtual_machine(VirtualMachineMetaData::new("vm1", vm_requested, 10));
        host
    }

    #[test]
    fn test_unknown_estimator_falls_back_to_average() {
        let estimator = estimator_from_name("neural-net", 5, 10);
        assert_eq!(estimator.name(), "average");
        assert_eq!(estimator.window_size(), 5);
    }

    #[test]
    fn test_max_estimator_resolved() {
        let estimator = estimator_from_name("MAX", 5, 10);
        assert_eq!(estimator.name(), "max");
    }

    #[test]
    fn test_has_enough_capacity_is_and_across_dimensions() {
        let estimator = estimator_from_name("average", 5, 10);
        let host = host_with_vm(ResourceVector::new(4.0, 8192.0, 200.0, 200.0));

        let fits = VirtualMachineMetaData::new("vm2", ResourceVector::new(4.0, 8192.0, 800.0, 800.0), 10);
        let too_big = VirtualMachineMetaData::new("vm3", ResourceVector::new(6.0, 10000.0, 200.0, 200.0), 10);
        let net_too_big = VirtualMachineMetaData::new("vm4", ResourceVector::new(1.0, 1.0, 801.0, 1.0), 10);

        assert!(estimator.has_enough_capacity(&fits, &host));
        assert!(!estimator.has_enough_capacity(&too_big, &host));
        assert!(!estimator.has_enough_capacity(&net_too_big, &host));
    }

    #[test]
    fn test_host_utilization_includes_overhead() {
        let estimator = estimator_from_name("average", 5, 10);
        let mut host = host_with_vm(ResourceVector::new(4.0, 8192.0, 200.0, 200.0));

        host.virtual_machines
            .get_mut("vm1")
            .unwrap()
            .history
            .push(MonitoringSample::new(1, ResourceVector::new(2.0, 4096.0, 100.0, 100.0)));
        host.history
            .push(MonitoringSample::new(1, ResourceVector::new(1.0, 1024.0, 0.0, 0.0)));

        assert_eq!(
            estimator.estimate_host_utilization(&host),
            ResourceVector::new(3.0, 5120.0, 100.0, 100.0)
        );

        let normalized = estimator.normalized_host_utilization(&host);
        assert!((normalized.get(Resource::Cpu) - 0.375).abs() < 1e-9);
        assert!((normalized.get(Resource::Memory) - 0.3125).abs() < 1e-9);
    }
}
