//! Scheduling policies
//!
//! This module provides:
//! - Placement of newly submitted VMs (FirstFit, RoundRobin)
//! - Relocation away from anomalous hosts (GreedyOverload, DummyOverload, GreedyUnderload)
//! - Cluster-wide consolidation (Sercon)
//!
//! Policies are selected by configuration name. Unknown names are logged and
//! replaced by the built-in default for that kind.

mod consolidation;
mod placement;
mod relocation;

pub use consolidation::{reconfiguration_policy_from_name, ReconfigurationPolicy, Sercon};
pub use placement::{placement_policy_from_name, FirstFit, PlacementPolicy, RoundRobin};
pub use relocation::{
    overload_policy_from_name, underload_policy_from_name, GreedyOverload, GreedyUnderload,
    RelocationPolicies, RelocationPolicy,
};

use crate::estimator::ResourceDemandEstimator;
use crate::models::{LocalControllerDescription, VirtualMachineMetaData};

/// Index of the first host (in slice order) able to take the VM
pub(crate) fn first_fitting_host(
    estimator: &dyn ResourceDemandEstimator,
    vm: &VirtualMachineMetaData,
    hosts: &[LocalControllerDescription],
    skip: Option<&str>,
) -> Option<usize> {
    hosts.iter().position(|host| {
        skip != Some(host.id.as_str()) && estimator.has_enough_capacity(vm, host)
    })
}
