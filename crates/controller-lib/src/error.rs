//! Error types for the group controller

use crate::models::{HostId, LocalControllerState, VmId};
use thiserror::Error;

/// Failures reported by the cluster-state repository
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("host {0} is not known to the repository")]
    HostNotFound(HostId),

    #[error("virtual machine {0} is not known to the repository")]
    VmNotFound(VmId),

    #[error("repository backend error: {0}")]
    Backend(String),
}

/// Failures talking to a local controller
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("local controller {host_id} is unreachable: {reason}")]
    Unreachable { host_id: HostId, reason: String },

    #[error("local controller {host_id} rejected the request: {reason}")]
    Rejected { host_id: HostId, reason: String },
}

/// Reasons an anomaly resolution is abandoned
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("no description available for host {0}")]
    HostUnknown(HostId),

    #[error("host {host_id} reported {state}, nothing to resolve")]
    HostStable {
        host_id: HostId,
        state: LocalControllerState,
    },

    #[error("no destination candidates for host {0}")]
    NoDestinationCandidates(HostId),

    #[error("relocation plan for host {0} is empty")]
    EmptyPlan(HostId),

    #[error("failed to wake up hosts {0:?}")]
    WakeupFailed(Vec<HostId>),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Failures of state machine workflows
#[derive(Debug, Error)]
pub enum StateMachineError {
    #[error("state machine is busy with another workflow")]
    Busy,

    #[error("virtual machine {0} is not known")]
    UnknownVirtualMachine(VmId),

    #[error("virtual machine {0} is not assigned to a host")]
    UnassignedVirtualMachine(VmId),

    #[error("host {0} cannot receive virtual machines")]
    InvalidDestination(HostId),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Control(#[from] ControlError),
}

impl StateMachineError {
    pub fn is_busy(&self) -> bool {
        matches!(self, StateMachineError::Busy)
    }
}
